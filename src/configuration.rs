//! Decode configuration.
//!
//! [`DecodeOptions`] is a builder that carries the user-supplied
//! parameters (input locator, output path, frame budget) together with the
//! operational knobs of the decode worker: network timeout, read retry
//! policy, decoder overrides, progress reporting and cancellation.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framedump::{DecodeOptions, RetryPolicy};
//!
//! let options = DecodeOptions::new("rtsp://camera.local/stream", "out.yuv")
//!     .with_frame_count(30)
//!     .with_network_timeout(Duration::from_secs(5))
//!     .with_retry_policy(RetryPolicy::limited(100));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::codec::Id;

#[cfg(feature = "hardware")]
use crate::hardware_acceleration::HardwareAccelerationMode;
use crate::decode::DEFAULT_DRAIN_TIMEOUT;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Connection/read timeout applied to `rtsp:` locators by default.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// How the decode worker reacts to packet read failures.
///
/// Would-block and generic read errors are never fatal by themselves. The
/// worker sleeps with exponential backoff between attempts, starting at
/// `initial_backoff` and doubling up to `max_backoff`. A successful read
/// resets both the delay and the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before giving up. `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
    /// First delay after a failed read.
    pub initial_backoff: Duration,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Retry forever with the default backoff.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Give up after `attempts` consecutive failures.
    pub fn limited(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::default()
        }
    }

    /// Set the backoff bounds. `max` is raised to `initial` if smaller.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Returns `true` once `attempts` consecutive failures exceed the limit.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|limit| attempts >= limit)
    }
}

/// Configuration for one decode session.
#[derive(Clone)]
pub struct DecodeOptions {
    /// File path or URL of the container to decode.
    pub(crate) input: String,
    /// Where raw frames are written.
    pub(crate) output: PathBuf,
    /// Number of frames to write before the sink closes.
    pub(crate) frame_count: u64,
    /// Timeout applied to `rtsp:` locators.
    pub(crate) network_timeout: Duration,
    /// Read failure handling.
    pub(crate) retry_policy: RetryPolicy,
    /// How long the drain phase waits for the decoder's end of stream.
    pub(crate) drain_timeout: Duration,
    /// Per-codec overrides of the hardware decoder name table.
    pub(crate) decoder_names: Vec<(Id, String)>,
    /// Progress callback. Defaults to a no-op.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// External stop request. `None` means only the worker stops itself.
    pub(crate) cancellation: Option<CancellationToken>,
    #[cfg(feature = "hardware")]
    pub(crate) hardware_acceleration: HardwareAccelerationMode,
}

impl Debug for DecodeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DecodeOptions")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("frame_count", &self.frame_count)
            .field("network_timeout", &self.network_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("drain_timeout", &self.drain_timeout)
            .field("decoder_overrides", &self.decoder_names.len())
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl DecodeOptions {
    /// Create options for decoding `input` into `output`.
    ///
    /// Defaults: one frame, 10 second network timeout, unlimited retries,
    /// 5 second drain timeout.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            frame_count: 1,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            decoder_names: Vec::new(),
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            #[cfg(feature = "hardware")]
            hardware_acceleration: HardwareAccelerationMode::default(),
        }
    }

    /// Set the number of frames to write.
    #[must_use]
    pub fn with_frame_count(mut self, count: u64) -> Self {
        self.frame_count = count;
        self
    }

    /// Set the connection/read timeout used for `rtsp:` locators.
    #[must_use]
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Set how packet read failures are retried.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bound how long the decoder may take to release its buffered frames
    /// after end of input.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Prefer the decoder named `name` for streams compressed with `codec`.
    #[must_use]
    pub fn with_decoder_name(mut self, codec: Id, name: impl Into<String>) -> Self {
        self.decoder_names.retain(|(existing, _)| *existing != codec);
        self.decoder_names.push((codec, name.into()));
        self
    }

    /// Attach a progress callback, invoked after every written frame.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a token that stops the worker when cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the device-context acceleration used when no dedicated hardware
    /// decoder is available for the stream.
    #[cfg(feature = "hardware")]
    #[must_use]
    pub fn with_hardware_acceleration(mut self, mode: HardwareAccelerationMode) -> Self {
        self.hardware_acceleration = mode;
        self
    }

    /// The input locator.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// The output path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The frame budget.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The network timeout for `rtsp:` locators.
    pub fn network_timeout(&self) -> Duration {
        self.network_timeout
    }

    /// How failed packet reads are retried.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// The drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub(crate) fn decoder_name_override(&self, codec: Id) -> Option<&str> {
        self.decoder_names
            .iter()
            .find(|(existing, _)| *existing == codec)
            .map(|(_, name)| name.as_str())
    }
}
