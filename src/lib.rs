//! # framedump
//!
//! Decode a video stream and dump a bounded number of raw frames to disk.
//!
//! `framedump` opens a local file or a network stream (`rtsp:` locators get a
//! connection timeout), picks the first video stream, resolves a decoder
//! (preferring a hardware implementation by name and falling back to the
//! default software decoder), and writes the first N decoded pictures as
//! tightly packed planar YUV into a single output file. Decoding runs on a
//! dedicated worker thread; the caller only waits for the report.
//!
//! Built on FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Dump frames from a file
//!
//! ```no_run
//! use framedump::{DecodeOptions, DecodeWorker, MediaSession};
//!
//! let options = DecodeOptions::new("input.mp4", "frames.yuv").with_frame_count(10);
//! let session = MediaSession::open(&options)?;
//! let report = DecodeWorker::spawn(session)?.join()?;
//! println!("{} frames, {} packets read", report.frames_written, report.packets);
//! # Ok::<(), framedump::FrameDumpError>(())
//! ```
//!
//! ### Read a camera with bounded retries
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framedump::{DecodeOptions, DecodeWorker, MediaSession, RetryPolicy};
//!
//! let options = DecodeOptions::new("rtsp://10.0.0.7/live", "camera.yuv")
//!     .with_frame_count(250)
//!     .with_network_timeout(Duration::from_secs(5))
//!     .with_retry_policy(RetryPolicy::limited(50));
//! let worker = DecodeWorker::spawn(MediaSession::open(&options)?)?;
//! let report = worker.join()?;
//! # Ok::<(), framedump::FrameDumpError>(())
//! ```
//!
//! ### Encode a raw picture as JPEG
//!
//! ```no_run
//! use framedump::{JpegEncoder, JpegSettings, SoftwareJpegEncoder};
//!
//! let mut encoder = SoftwareJpegEncoder::new(JpegSettings::new(640, 480).with_quality(85))?;
//! let yuv = std::fs::read("frame.yuv")?;
//! std::fs::write("frame.jpg", encoder.encode(&yuv)?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `hardware` | Attach an FFmpeg hardware device (CUDA, VAAPI, DXVA2, D3D11VA, VideoToolbox, QSV) to software-fallback decoders |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod codec;
pub mod configuration;
pub mod convert;
pub mod decode;
pub mod error;
pub mod ffmpeg;
#[cfg(feature = "hardware")]
pub mod hardware_acceleration;
pub mod jpeg;
pub mod pixel;
pub mod progress;
pub mod session;
pub mod sink;
pub mod source;
#[cfg(test)]
mod testing;
pub mod worker;

pub use codec::{
    CodecSession, CodecStatus, DecoderSelection, FrameDecoder, preferred_hardware_decoder,
    select_video_stream,
};
pub use configuration::{DEFAULT_NETWORK_TIMEOUT, DecodeOptions, RetryPolicy};
pub use convert::{
    ConversionSettings, CropRect, FlipMode, Interpolation, PictureConverter, PictureParams,
    SoftwareConverter,
};
pub use decode::{DEFAULT_DRAIN_TIMEOUT, DecodeState, DecodeStep, PacketDecoder};
pub use error::{CodecOpenStage, ErrorCategory, FrameDumpError};
pub use ffmpeg::{FfmpegLogLevel, ffmpeg_log_level, set_ffmpeg_log_level};
#[cfg(feature = "hardware")]
pub use hardware_acceleration::{
    HardwareAccelerationMode, HardwareDeviceType, available_hardware_devices,
};
pub use jpeg::{DEFAULT_JPEG_QUALITY, JpegEncoder, JpegSettings, SoftwareJpegEncoder};
pub use pixel::{PixelFormat, PlaneLayout};
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo};
pub use session::{EndReason, MediaSession, Session, SessionReport, StreamCounters};
pub use sink::{FrameConsumer, FrameSink, PlanarFrame, RawFrame, SinkStatus, write_planes};
pub use source::{CompressedPacket, MediaKind, PacketSource, ReadError, StreamInfo, StreamSource};
pub use worker::DecodeWorker;
