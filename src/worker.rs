//! Background decode worker.
//!
//! [`DecodeWorker::spawn`] moves a [`Session`] onto a dedicated thread that
//! runs [`Session::run`] and then releases the session's resources. The
//! controller blocks on [`DecodeWorker::join`] and gets the
//! [`SessionReport`] back. The session's stop flag is the only state shared
//! with the controller; [`DecodeWorker::request_stop`] sets it and the loop
//! exits at the next packet boundary.
//!
//! # Example
//!
//! ```no_run
//! use framedump::{DecodeOptions, DecodeWorker, MediaSession};
//!
//! let options = DecodeOptions::new("rtsp://camera.local/stream", "out.yuv")
//!     .with_frame_count(100);
//! let session = MediaSession::open(&options)?;
//! let worker = DecodeWorker::spawn(session)?;
//! let report = worker.join()?;
//! println!("wrote {} frames", report.frames_written);
//! # Ok::<(), framedump::FrameDumpError>(())
//! ```

use std::io::Write;
use std::thread::{self, JoinHandle};

use crate::codec::FrameDecoder;
use crate::error::FrameDumpError;
use crate::progress::CancellationToken;
use crate::session::{Session, SessionReport};
use crate::source::PacketSource;

const WORKER_THREAD_NAME: &str = "framedump-decode";

/// Handle to a running decode thread.
#[derive(Debug)]
pub struct DecodeWorker {
    handle: JoinHandle<Result<SessionReport, FrameDumpError>>,
    stop: CancellationToken,
}

impl DecodeWorker {
    /// Start the worker loop for `session` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Io`] if the thread cannot be spawned. The
    /// session is released in that case.
    pub fn spawn<S, D, W>(session: Session<S, D, W>) -> Result<Self, FrameDumpError>
    where
        S: PacketSource + Send + 'static,
        D: FrameDecoder<Packet = S::Packet> + Send + 'static,
        W: Write + Send + 'static,
    {
        let stop = session.stop_token();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut session = session;
                let outcome = session.run();
                let released = session.close();
                let report = outcome?;
                released?;
                Ok(report)
            })?;
        log::debug!("Spawned decode worker thread");

        Ok(Self { handle, stop })
    }

    /// Ask the worker to stop at the next packet boundary.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Whether the worker has stopped or been asked to.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker exits and return its report.
    ///
    /// # Errors
    ///
    /// Returns the worker's own error, or [`FrameDumpError::WorkerPanicked`]
    /// if the thread panicked.
    pub fn join(self) -> Result<SessionReport, FrameDumpError> {
        self.handle
            .join()
            .map_err(|_| FrameDumpError::WorkerPanicked)?
    }
}
