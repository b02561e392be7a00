//! Codec session: decoder resolution and the send/receive seam.
//!
//! The first video stream of the container is bound to a decoder. Codecs
//! with a dedicated hardware decoder (the NVIDIA V4L2 family) try that
//! decoder by name first. If it is missing from the FFmpeg build, or the
//! codec has no table entry, FFmpeg's default decoder for the codec id is
//! used instead.
//!
//! [`FrameDecoder`] is the three-call protocol the packet decoder drives.
//! [`CodecSession`] implements it over an opened FFmpeg video decoder.

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use ffmpeg_next::{
    Codec, Error as FfmpegError, Packet, codec::Id, codec::context::Context as CodecContext,
    decoder, decoder::Video as VideoDecoder, frame::Video as VideoFrame, media::Type,
    util::error::EAGAIN,
};

use crate::configuration::DecodeOptions;
use crate::error::{CodecOpenStage, FrameDumpError};
#[cfg(feature = "hardware")]
use crate::hardware_acceleration;
use crate::sink::PlanarFrame;
use crate::source::{CompressedPacket, MediaKind, StreamInfo, StreamSource};

/// Non-success outcome of a decoder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecStatus {
    /// The decoder needs more input (receive) or must be drained (send).
    WouldBlock,
    /// The decoder has been flushed and holds no more frames.
    EndOfStream,
    /// Any other failure.
    Failed(String),
}

impl From<FfmpegError> for CodecStatus {
    fn from(error: FfmpegError) -> Self {
        match error {
            FfmpegError::Eof => CodecStatus::EndOfStream,
            FfmpegError::Other { errno } if errno == EAGAIN => CodecStatus::WouldBlock,
            other => CodecStatus::Failed(other.to_string()),
        }
    }
}

impl Display for CodecStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CodecStatus::WouldBlock => f.write_str("resource temporarily unavailable"),
            CodecStatus::EndOfStream => f.write_str("end of stream"),
            CodecStatus::Failed(reason) => f.write_str(reason),
        }
    }
}

/// The send-packet / receive-frame protocol of a decoder.
pub trait FrameDecoder {
    /// Compressed input unit.
    type Packet: CompressedPacket;
    /// Decoded output picture.
    type Frame: PlanarFrame;

    /// Submit one compressed packet.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), CodecStatus>;

    /// Signal that no more packets will follow.
    fn send_eof(&mut self) -> Result<(), CodecStatus>;

    /// Retrieve one decoded frame into a freshly allocated picture.
    fn receive_frame(&mut self) -> Result<Self::Frame, CodecStatus>;
}

/// Which decoder implementation was bound to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderSelection {
    /// The preferred hardware decoder was found by name.
    Hardware(String),
    /// The preferred decoder was unavailable; the default one is used.
    Fallback(String),
    /// The codec has no preferred decoder; the default one is used.
    Software(String),
}

impl DecoderSelection {
    /// Name of the resolved decoder.
    pub fn name(&self) -> &str {
        match self {
            DecoderSelection::Hardware(name)
            | DecoderSelection::Fallback(name)
            | DecoderSelection::Software(name) => name,
        }
    }

    /// Whether a dedicated hardware decoder is in use.
    pub fn is_hardware(&self) -> bool {
        matches!(self, DecoderSelection::Hardware(_))
    }
}

impl Display for DecoderSelection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DecoderSelection::Hardware(name) => write!(f, "{name} (hardware)"),
            DecoderSelection::Fallback(name) => write!(f, "{name} (fallback)"),
            DecoderSelection::Software(name) => write!(f, "{name} (software)"),
        }
    }
}

/// Dedicated hardware decoder for `codec`, if one exists.
pub fn preferred_hardware_decoder(codec: Id) -> Option<&'static str> {
    match codec {
        Id::H264 => Some("h264_nvv4l2dec"),
        Id::HEVC => Some("hevc_nvv4l2dec"),
        Id::MPEG2VIDEO => Some("mpeg2_nvv4l2dec"),
        Id::MPEG4 => Some("mpeg4_nvv4l2dec"),
        Id::VP8 => Some("vp8_nvv4l2dec"),
        Id::VP9 => Some("vp9_nvv4l2dec"),
        _ => None,
    }
}

/// The first video stream in `streams`.
///
/// # Errors
///
/// Returns [`FrameDumpError::NoVideoStream`] if there is none.
pub fn select_video_stream(streams: &[StreamInfo]) -> Result<&StreamInfo, FrameDumpError> {
    streams
        .iter()
        .find(|stream| stream.kind == MediaKind::Video)
        .ok_or(FrameDumpError::NoVideoStream)
}

/// Resolve a video decoder for `codec_id`.
fn resolve_decoder(
    codec_id: Id,
    options: &DecodeOptions,
) -> Result<(Codec, DecoderSelection), FrameDumpError> {
    let preferred = options
        .decoder_name_override(codec_id)
        .or_else(|| preferred_hardware_decoder(codec_id));

    if let Some(name) = preferred {
        match decoder::find_by_name(name) {
            Some(codec) if codec.medium() == Type::Video => {
                return Ok((codec, DecoderSelection::Hardware(name.to_string())));
            }
            Some(_) => log::warn!("Decoder {name} is not a video decoder, ignoring it"),
            None => log::warn!("Decoder {name} is not available in this FFmpeg build"),
        }
    }

    let codec = decoder::find(codec_id)
        .filter(|codec| codec.medium() == Type::Video)
        .ok_or_else(|| FrameDumpError::UnsupportedCodec(format!("{codec_id:?}")))?;
    let name = codec.name().to_string();
    let selection = if preferred.is_some() {
        DecoderSelection::Fallback(name)
    } else {
        DecoderSelection::Software(name)
    };

    Ok((codec, selection))
}

/// An opened decoder bound to one video stream.
pub struct CodecSession {
    decoder: VideoDecoder,
    stream_index: usize,
    selection: DecoderSelection,
    #[cfg(feature = "hardware")]
    hardware_device: bool,
}

impl Debug for CodecSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CodecSession")
            .field("stream_index", &self.stream_index)
            .field("selection", &self.selection)
            .field("width", &self.decoder.width())
            .field("height", &self.decoder.height())
            .finish()
    }
}

impl CodecSession {
    /// Bind a decoder to the first video stream of `source` and open it.
    ///
    /// # Errors
    ///
    /// - [`FrameDumpError::NoVideoStream`] if the container has no video.
    /// - [`FrameDumpError::UnsupportedCodec`] if no video decoder exists
    ///   for the stream's codec.
    /// - [`FrameDumpError::CodecOpen`] if allocating, initializing or
    ///   opening the decoder context fails.
    pub fn open(source: &StreamSource, options: &DecodeOptions) -> Result<Self, FrameDumpError> {
        let streams = source.streams();
        let stream_info = select_video_stream(&streams)?;
        let stream_index = stream_info.index;

        let (codec, selection) = resolve_decoder(stream_info.codec_id, options)?;
        log::info!(
            "Video stream #{stream_index}: {:?} {}x{}, decoder {selection}",
            stream_info.codec_id,
            stream_info.width,
            stream_info.height
        );

        let stream = source
            .input()
            .and_then(|input| input.stream(stream_index))
            .ok_or(FrameDumpError::NoVideoStream)?;

        let mut context = CodecContext::new_with_codec(codec);
        if unsafe { context.as_ptr().is_null() } {
            return Err(FrameDumpError::CodecOpen {
                stage: CodecOpenStage::Allocate,
                reason: "out of memory".to_string(),
            });
        }

        context
            .set_parameters(stream.parameters())
            .map_err(|error| FrameDumpError::CodecOpen {
                stage: CodecOpenStage::Parameters,
                reason: error.to_string(),
            })?;

        #[cfg(feature = "hardware")]
        let hardware_device = !selection.is_hardware()
            && hardware_acceleration::attach_device_context(
                &mut context,
                options.hardware_acceleration,
            )
            .is_some();

        let decoder = context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|error| FrameDumpError::CodecOpen {
                stage: CodecOpenStage::Open,
                reason: error.to_string(),
            })?;

        Ok(Self {
            decoder,
            stream_index,
            selection,
            #[cfg(feature = "hardware")]
            hardware_device,
        })
    }

    /// Index of the bound video stream.
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// The resolved decoder.
    pub fn selection(&self) -> &DecoderSelection {
        &self.selection
    }

    /// Coded picture width.
    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    /// Coded picture height.
    pub fn height(&self) -> u32 {
        self.decoder.height()
    }
}

impl FrameDecoder for CodecSession {
    type Packet = Packet;
    type Frame = VideoFrame;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecStatus> {
        self.decoder.send_packet(packet).map_err(CodecStatus::from)
    }

    fn send_eof(&mut self) -> Result<(), CodecStatus> {
        self.decoder.send_eof().map_err(CodecStatus::from)
    }

    fn receive_frame(&mut self) -> Result<VideoFrame, CodecStatus> {
        let mut frame = VideoFrame::empty();
        self.decoder
            .receive_frame(&mut frame)
            .map_err(CodecStatus::from)?;

        #[cfg(feature = "hardware")]
        if self.hardware_device && hardware_acceleration::is_hardware_frame(&frame) {
            return hardware_acceleration::transfer_to_system_memory(&frame)
                .map_err(|error| CodecStatus::Failed(error.to_string()));
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(index: usize, kind: MediaKind) -> StreamInfo {
        StreamInfo {
            index,
            kind,
            codec_id: Id::H264,
            width: 0,
            height: 0,
            bit_rate: 0,
        }
    }

    #[test]
    fn first_video_stream_wins() {
        let streams = vec![
            stream(0, MediaKind::Audio),
            stream(1, MediaKind::Video),
            stream(2, MediaKind::Video),
        ];
        assert_eq!(select_video_stream(&streams).unwrap().index, 1);
    }

    #[test]
    fn audio_only_has_no_video_stream() {
        let streams = vec![stream(0, MediaKind::Audio), stream(1, MediaKind::Data)];
        assert!(matches!(
            select_video_stream(&streams),
            Err(FrameDumpError::NoVideoStream)
        ));
    }

    #[test]
    fn hardware_table() {
        assert_eq!(preferred_hardware_decoder(Id::H264), Some("h264_nvv4l2dec"));
        assert_eq!(preferred_hardware_decoder(Id::HEVC), Some("hevc_nvv4l2dec"));
        assert_eq!(
            preferred_hardware_decoder(Id::MPEG2VIDEO),
            Some("mpeg2_nvv4l2dec")
        );
        assert_eq!(preferred_hardware_decoder(Id::VP9), Some("vp9_nvv4l2dec"));
        assert_eq!(preferred_hardware_decoder(Id::AV1), None);
    }

    #[test]
    fn ffmpeg_errors_map_to_statuses() {
        assert_eq!(CodecStatus::from(FfmpegError::Eof), CodecStatus::EndOfStream);
        assert_eq!(
            CodecStatus::from(FfmpegError::Other { errno: EAGAIN }),
            CodecStatus::WouldBlock
        );
        assert!(matches!(
            CodecStatus::from(FfmpegError::InvalidData),
            CodecStatus::Failed(_)
        ));
    }

    #[test]
    fn missing_hardware_decoder_falls_back() {
        ffmpeg_next::init().unwrap();
        let options = DecodeOptions::new("input.mp4", "out.yuv")
            .with_decoder_name(Id::MPEG4, "framedump_no_such_decoder");
        let Ok((codec, selection)) = resolve_decoder(Id::MPEG4, &options) else {
            // FFmpeg built without an MPEG-4 decoder.
            return;
        };
        assert_eq!(codec.medium(), Type::Video);
        assert!(matches!(selection, DecoderSelection::Fallback(_)));
    }

    #[test]
    fn non_video_codec_is_unsupported() {
        ffmpeg_next::init().unwrap();
        let options = DecodeOptions::new("input.mp4", "out.yuv");
        assert!(matches!(
            resolve_decoder(Id::AAC, &options),
            Err(FrameDumpError::UnsupportedCodec(_))
        ));
    }
}
