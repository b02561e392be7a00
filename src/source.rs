//! Stream source: container open, probe and packet reads.
//!
//! [`StreamSource`] opens a file or network locator through FFmpeg's
//! demuxer, probes it for elementary streams, and yields compressed packets
//! through the [`PacketSource`] trait. The decode worker only depends on the
//! trait, so tests can drive it with scripted packets.
//!
//! Locators using the `rtsp:` scheme get a connection/read timeout so a
//! camera that never answers cannot hang the open forever. Every other
//! locator is opened with FFmpeg's defaults.

use std::ffi::CString;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::ptr;

use ffmpeg_next::{
    Dictionary, Error as FfmpegError, Packet, codec::Id, format::context::Input, media::Type,
    util::error::EAGAIN,
};
use ffmpeg_sys_next::{
    AVFormatContext, avformat_find_stream_info, avformat_open_input, avformat_version,
};

use crate::configuration::DecodeOptions;
use crate::error::FrameDumpError;

/// Scheme prefix that receives the network timeout.
const TIMEOUT_SCHEME: &str = "rtsp:";

/// First libavformat major version whose rtsp demuxer reads the socket
/// timeout from `timeout`. Older ones use `stimeout`, where `timeout`
/// means a listen timeout in seconds and turns on listen mode.
const RTSP_TIMEOUT_RENAMED_IN: u32 = 59;

/// Why a packet read did not yield a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// No packet is available right now; try again.
    WouldBlock,
    /// The container has no more packets.
    EndOfStream,
    /// Any other read failure.
    Other(String),
}

/// A compressed data unit as seen by the decode worker.
pub trait CompressedPacket {
    /// Index of the elementary stream this packet belongs to.
    fn stream_index(&self) -> usize;
    /// Payload length in bytes.
    fn size(&self) -> usize;
    /// Whether the packet carries a payload buffer (possibly zero-length).
    fn has_data(&self) -> bool;
    /// Whether the demuxer flagged the packet as corrupt.
    fn is_corrupt(&self) -> bool;
}

/// Producer of compressed packets.
pub trait PacketSource {
    /// Packet type handed to the decoder.
    type Packet: CompressedPacket;

    /// Read the next packet from any stream.
    fn read_packet(&mut self) -> Result<Self::Packet, ReadError>;

    /// Release the underlying resources. Must be safe to call twice.
    fn close(&mut self) {}
}

impl CompressedPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn size(&self) -> usize {
        Packet::size(self)
    }

    fn has_data(&self) -> bool {
        self.data().is_some()
    }

    fn is_corrupt(&self) -> bool {
        Packet::is_corrupt(self)
    }
}

/// Kind of media carried by an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl From<Type> for MediaKind {
    fn from(medium: Type) -> Self {
        match medium {
            Type::Video => MediaKind::Video,
            Type::Audio => MediaKind::Audio,
            Type::Subtitle => MediaKind::Subtitle,
            Type::Data => MediaKind::Data,
            Type::Attachment => MediaKind::Attachment,
            _ => MediaKind::Unknown,
        }
    }
}

/// Parameters of one probed elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index of the stream inside the container.
    pub index: usize,
    /// Kind of media.
    pub kind: MediaKind,
    /// Compression identifier.
    pub codec_id: Id,
    /// Picture width in pixels (0 for non-video streams).
    pub width: u32,
    /// Picture height in pixels (0 for non-video streams).
    pub height: u32,
    /// Declared bitrate in bits per second (0 when unknown).
    pub bit_rate: i64,
}

/// An opened, probed container.
pub struct StreamSource {
    /// `None` once closed.
    input: Option<Input>,
    locator: String,
}

impl Debug for StreamSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StreamSource")
            .field("locator", &self.locator)
            .field("open", &self.input.is_some())
            .finish()
    }
}

/// Demuxer option carrying the rtsp socket timeout (in microseconds) for
/// libavformat major version `avformat_major`.
pub fn network_timeout_option(avformat_major: u32) -> &'static str {
    if avformat_major < RTSP_TIMEOUT_RENAMED_IN {
        "stimeout"
    } else {
        "timeout"
    }
}

/// Whether `locator` receives the network timeout.
pub fn uses_network_timeout(locator: &str) -> bool {
    locator.starts_with(TIMEOUT_SCHEME)
}

impl StreamSource {
    /// Open `locator` and probe its streams.
    ///
    /// # Errors
    ///
    /// - [`FrameDumpError::SourceOpen`] if the locator is empty or the
    ///   demuxer cannot open it (including an `rtsp:` timeout).
    /// - [`FrameDumpError::NoStreamInfo`] if the stream layout cannot be
    ///   determined.
    /// - [`FrameDumpError::EmptyContainer`] if probing finds zero streams.
    pub fn open(locator: &str, options: &DecodeOptions) -> Result<Self, FrameDumpError> {
        let open_error = |reason: String| FrameDumpError::SourceOpen {
            locator: locator.to_string(),
            reason,
        };

        if locator.is_empty() {
            return Err(open_error("empty locator".to_string()));
        }
        let c_locator = CString::new(locator)
            .map_err(|_| open_error("locator contains a NUL byte".to_string()))?;

        ffmpeg_next::init()
            .map_err(|error| open_error(format!("FFmpeg initialisation failed: {error}")))?;
        ffmpeg_next::format::network::init();

        let mut dictionary = Dictionary::new();
        if uses_network_timeout(locator) {
            let micros = options.network_timeout.as_micros().min(i64::MAX as u128);
            let avformat_major = unsafe { avformat_version() } >> 16;
            let key = network_timeout_option(avformat_major);
            dictionary.set(key, &micros.to_string());
            log::info!(
                "Using a {:?} connection timeout for {locator} ({key})",
                options.network_timeout
            );
        }

        let mut context: *mut AVFormatContext = ptr::null_mut();
        let result = unsafe {
            let mut raw_options = dictionary.disown();
            let result = avformat_open_input(
                &mut context,
                c_locator.as_ptr(),
                ptr::null_mut(),
                &mut raw_options,
            );
            // Options the demuxer did not consume are handed back to us.
            drop(Dictionary::own(raw_options));
            result
        };
        if result < 0 {
            let reason = FfmpegError::from(result).to_string();
            log::error!("Failed to open {locator}: {reason}");
            return Err(open_error(reason));
        }
        log::debug!("Opened {locator}");

        // From here on the input context is closed by `Input`'s destructor.
        let mut input = unsafe { Input::wrap(context) };

        let probe = unsafe { avformat_find_stream_info(input.as_mut_ptr(), ptr::null_mut()) };
        if probe < 0 {
            return Err(FrameDumpError::NoStreamInfo {
                locator: locator.to_string(),
                reason: FfmpegError::from(probe).to_string(),
                stream_count: input.nb_streams() as usize,
            });
        }

        let stream_count = input.nb_streams() as usize;
        if stream_count == 0 {
            return Err(FrameDumpError::EmptyContainer {
                locator: locator.to_string(),
            });
        }

        log::info!(
            "{locator}: found {stream_count} streams (format={})",
            input.format().name()
        );

        Ok(Self {
            input: Some(input),
            locator: locator.to_string(),
        })
    }

    /// The locator this source was opened from.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Whether the source still holds its demuxer.
    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Short name of the container format, if open.
    pub fn format_name(&self) -> Option<String> {
        self.input
            .as_ref()
            .map(|input| input.format().name().to_string())
    }

    /// Describe every elementary stream in the container.
    ///
    /// Returns an empty list once the source is closed.
    pub fn streams(&self) -> Vec<StreamInfo> {
        let Some(input) = self.input.as_ref() else {
            return Vec::new();
        };

        input
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                let raw = unsafe { &*parameters.as_ptr() };
                StreamInfo {
                    index: stream.index(),
                    kind: MediaKind::from(parameters.medium()),
                    codec_id: parameters.id(),
                    width: raw.width.max(0) as u32,
                    height: raw.height.max(0) as u32,
                    bit_rate: raw.bit_rate,
                }
            })
            .collect()
    }

    /// Borrow the demuxer, if open.
    pub(crate) fn input(&self) -> Option<&Input> {
        self.input.as_ref()
    }

    /// Release the demuxer. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if self.input.take().is_some() {
            log::debug!("Closed input {}", self.locator);
        }
    }
}

impl PacketSource for StreamSource {
    type Packet = Packet;

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        // A closed source has nothing left to give.
        let Some(input) = self.input.as_mut() else {
            return Err(ReadError::EndOfStream);
        };

        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => Ok(packet),
            Err(FfmpegError::Eof) => Err(ReadError::EndOfStream),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Err(ReadError::WouldBlock),
            Err(error) => Err(ReadError::Other(error.to_string())),
        }
    }

    fn close(&mut self) {
        StreamSource::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rtsp_gets_a_timeout() {
        assert!(uses_network_timeout("rtsp://192.168.1.10:554/live"));
        assert!(!uses_network_timeout("http://example.com/stream.m3u8"));
        assert!(!uses_network_timeout("/videos/rtsp:capture.mp4"));
        assert!(!uses_network_timeout("capture.mp4"));
    }

    #[test]
    fn timeout_option_follows_the_library_version() {
        assert_eq!(network_timeout_option(58), "stimeout");
        assert_eq!(network_timeout_option(57), "stimeout");
        assert_eq!(network_timeout_option(59), "timeout");
        assert_eq!(network_timeout_option(61), "timeout");

        let linked = unsafe { avformat_version() } >> 16;
        assert!(["stimeout", "timeout"].contains(&network_timeout_option(linked)));
    }

    #[test]
    fn empty_locator_is_rejected() {
        let options = DecodeOptions::new("", "out.yuv");
        let error = StreamSource::open("", &options).unwrap_err();
        assert!(matches!(error, FrameDumpError::SourceOpen { .. }));
        assert!(error.is_setup());
    }

    #[test]
    fn media_kind_from_ffmpeg_type() {
        assert_eq!(MediaKind::from(Type::Video), MediaKind::Video);
        assert_eq!(MediaKind::from(Type::Audio), MediaKind::Audio);
        assert_eq!(MediaKind::from(Type::Unknown), MediaKind::Unknown);
    }
}
