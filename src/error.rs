//! Error types for the `framedump` crate.
//!
//! [`FrameDumpError`] is returned by every fallible operation. Each variant
//! belongs to one [`ErrorCategory`], which tells the controller whether the
//! failure happened during setup (nothing was spawned), inside the decode
//! loop, or while writing output.
//!
//! Data-quality problems (corrupt packets or frames) and frames in a pixel
//! format the sink cannot serialize are not errors: the decode worker drops
//! them with a log line and keeps going.

use std::io::Error as IoError;

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The stage of codec session setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOpenStage {
    /// Allocating a decode context for the resolved implementation.
    Allocate,
    /// Copying the stream's codec parameters into the context.
    Parameters,
    /// Opening the decoder.
    Open,
}

impl std::fmt::Display for CodecOpenStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CodecOpenStage::Allocate => "allocating the decoder context",
            CodecOpenStage::Parameters => "initializing the decoder context",
            CodecOpenStage::Open => "opening the video codec",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`FrameDumpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Source open, stream probe, codec resolution or codec open. Raised
    /// before any worker starts.
    Setup,
    /// A packet read kept failing after the configured retry limit.
    TransientIo,
    /// The decoder rejected a submission or a retrieval.
    Protocol,
    /// The raw frame sink could not be written.
    Output,
    /// Picture conversion or JPEG encoding failed.
    Conversion,
}

/// The unified error type for all `framedump` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameDumpError {
    /// The input locator could not be opened.
    #[error("Failed to open input {locator}: {reason}")]
    SourceOpen {
        /// File path or URL passed to the source.
        locator: String,
        /// Underlying reason reported by the demuxer.
        reason: String,
    },

    /// The container was opened but its stream layout could not be probed.
    #[error(
        "Could not find codec parameters for {locator}: {reason}{}",
        empty_container_note(.stream_count)
    )]
    NoStreamInfo {
        /// File path or URL of the input.
        locator: String,
        /// Underlying reason reported by the demuxer.
        reason: String,
        /// Number of streams the demuxer saw before giving up.
        stream_count: usize,
    },

    /// Probing succeeded but the container holds no streams at all.
    #[error("Container {locator} has no streams")]
    EmptyContainer {
        /// File path or URL of the input.
        locator: String,
    },

    /// The container does not hold a video stream.
    #[error("No video stream found in input")]
    NoVideoStream,

    /// No video decoder implementation could be resolved for the stream.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A codec session setup step failed.
    #[error("Error {stage}: {reason}")]
    CodecOpen {
        /// Which setup step failed.
        stage: CodecOpenStage,
        /// Underlying reason reported by the codec library.
        reason: String,
    },

    /// The decoder rejected a packet submission or frame retrieval.
    #[error("Decoder protocol error: {0}")]
    Protocol(String),

    /// Packet reads failed more often than the retry policy allows.
    #[error("Gave up reading packets after {attempts} attempts: {last_error}")]
    ReadRetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
        /// Description of the last failure.
        last_error: String,
    },

    /// The background decode thread panicked.
    #[error("Decode worker panicked")]
    WorkerPanicked,

    /// A raw picture buffer does not match its declared geometry.
    #[error("Invalid picture: {0}")]
    InvalidPicture(String),

    /// The requested conversion is not supported.
    #[error("Unsupported conversion: {0}")]
    UnsupportedConversion(String),

    /// JPEG encoding failed.
    #[error("JPEG encoding error: {0}")]
    JpegEncode(String),

    /// JPEG quality must lie in `0..=100`.
    #[error("JPEG quality {0} is out of range (0-100)")]
    InvalidQuality(u8),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while writing output.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate during JPEG encoding.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

fn empty_container_note(stream_count: &usize) -> &'static str {
    if *stream_count == 0 {
        " (container has no streams)"
    } else {
        ""
    }
}

impl FrameDumpError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FrameDumpError::SourceOpen { .. }
            | FrameDumpError::NoStreamInfo { .. }
            | FrameDumpError::EmptyContainer { .. }
            | FrameDumpError::NoVideoStream
            | FrameDumpError::UnsupportedCodec(_)
            | FrameDumpError::CodecOpen { .. } => ErrorCategory::Setup,
            FrameDumpError::ReadRetriesExhausted { .. } => ErrorCategory::TransientIo,
            FrameDumpError::Protocol(_)
            | FrameDumpError::WorkerPanicked
            | FrameDumpError::Ffmpeg(_) => ErrorCategory::Protocol,
            FrameDumpError::Io(_) => ErrorCategory::Output,
            FrameDumpError::InvalidPicture(_)
            | FrameDumpError::UnsupportedConversion(_)
            | FrameDumpError::JpegEncode(_)
            | FrameDumpError::InvalidQuality(_)
            | FrameDumpError::Image(_) => ErrorCategory::Conversion,
        }
    }

    /// Returns `true` for errors raised before the decode worker starts.
    pub fn is_setup(&self) -> bool {
        self.category() == ErrorCategory::Setup
    }

    /// Returns `true` for errors that end a running decode session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientIo | ErrorCategory::Protocol | ErrorCategory::Output
        )
    }
}

impl From<FfmpegError> for FrameDumpError {
    fn from(error: FfmpegError) -> Self {
        FrameDumpError::Ffmpeg(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_classified() {
        let error = FrameDumpError::SourceOpen {
            locator: "rtsp://camera/stream".into(),
            reason: "Connection refused".into(),
        };
        assert!(error.is_setup());
        assert_eq!(
            FrameDumpError::CodecOpen {
                stage: CodecOpenStage::Open,
                reason: "bad".into()
            }
            .category(),
            ErrorCategory::Setup
        );
        assert_eq!(FrameDumpError::NoVideoStream.category(), ErrorCategory::Setup);
    }

    #[test]
    fn decode_loop_errors_are_not_setup() {
        assert_eq!(
            FrameDumpError::Protocol("Invalid data".into()).category(),
            ErrorCategory::Protocol
        );
        let retries = FrameDumpError::ReadRetriesExhausted {
            attempts: 5,
            last_error: "Input/output error".into(),
        };
        assert_eq!(retries.category(), ErrorCategory::TransientIo);
        assert!(!retries.is_setup());
        assert!(retries.is_fatal());
        assert!(!FrameDumpError::NoVideoStream.is_fatal());
        assert!(!FrameDumpError::InvalidQuality(120).is_fatal());
    }

    #[test]
    fn empty_probe_mentions_missing_streams() {
        let error = FrameDumpError::NoStreamInfo {
            locator: "broken.ts".into(),
            reason: "Invalid data found when processing input".into(),
            stream_count: 0,
        };
        assert!(error.to_string().contains("container has no streams"));

        let error = FrameDumpError::NoStreamInfo {
            locator: "broken.ts".into(),
            reason: "Invalid data".into(),
            stream_count: 2,
        };
        assert!(!error.to_string().contains("no streams"));
    }

    #[test]
    fn codec_open_message_names_the_stage() {
        let error = FrameDumpError::CodecOpen {
            stage: CodecOpenStage::Parameters,
            reason: "Invalid argument".into(),
        };
        assert_eq!(
            error.to_string(),
            "Error initializing the decoder context: Invalid argument"
        );
    }
}
