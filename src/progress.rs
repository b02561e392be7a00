//! Progress reporting and stop signalling.
//!
//! [`CancellationToken`] is the single cross-thread signal between the decode
//! worker and its controller. The worker sets it itself when the stream ends
//! or the frame budget is reached; an external caller may set it to ask the
//! worker to stop at the next packet boundary.
//!
//! [`ProgressCallback`] receives a [`ProgressInfo`] snapshot after every frame
//! written to the sink.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framedump::{DecodeOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{}/{} frames", info.frames_written, info.budget);
//!     }
//! }
//!
//! let options = DecodeOptions::new("input.mp4", "out.yuv")
//!     .with_frame_count(10)
//!     .with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

/// A snapshot of decode progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Frames written to the sink so far.
    pub frames_written: u64,
    /// Frames the sink will accept in total.
    pub budget: u64,
    /// Video packets submitted to the decoder so far.
    pub packets: u64,
    /// Compressed bytes submitted to the decoder so far.
    pub bytes: u64,
    /// Wall-clock time since the worker started.
    pub elapsed: Duration,
}

impl ProgressInfo {
    /// Completion percentage (0.0 - 100.0).
    pub fn percentage(&self) -> f32 {
        if self.budget == 0 {
            100.0
        } else {
            (self.frames_written as f32 / self.budget as f32 * 100.0).min(100.0)
        }
    }
}

/// Trait for receiving progress updates from the decode worker.
///
/// Implementations must be [`Send`] and [`Sync`] because the worker runs on
/// its own thread. Callbacks observe but cannot halt the decode; use
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    /// Called after each frame is written.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative stop flag backed by an [`AtomicBool`].
///
/// Clones share the same flag.
///
/// ```
/// use framedump::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
/// assert!(!worker_view.is_cancelled());
///
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a stop. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn cancellation_is_visible_across_threads() {
        let token = CancellationToken::new();
        let remote = token.clone();
        thread::spawn(move || remote.cancel())
            .join()
            .expect("thread panicked");
        assert!(token.is_cancelled());
    }

    #[test]
    fn percentage_is_clamped() {
        let info = ProgressInfo {
            frames_written: 3,
            budget: 2,
            packets: 10,
            bytes: 4096,
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(info.percentage(), 100.0);

        let info = ProgressInfo {
            frames_written: 1,
            budget: 4,
            ..info
        };
        assert_eq!(info.percentage(), 25.0);
    }
}
