//! The packet/frame state machine.
//!
//! [`PacketDecoder`] drives a [`FrameDecoder`] through the send/receive
//! protocol:
//!
//! 1. A real packet is submitted once, then frames are retrieved until the
//!    decoder reports that it needs more input. One packet can yield zero,
//!    one or several frames.
//! 2. When the source is exhausted, [`flush`](PacketDecoder::flush) sends
//!    the end-of-stream signal and [`drain`](PacketDecoder::drain) keeps
//!    retrieving until the decoder reports end of stream.
//!
//! Corrupt frames count as produced but never reach the consumer. Packets
//! that carry a buffer of length zero are skipped without touching the
//! decoder.
//!
//! ```text
//!  Running ──flush──▶ Draining ──end of stream / stop──▶ Finished
//!     │                  │
//!     └──── fatal codec error ─────▶ Failed
//! ```

use std::thread;
use std::time::{Duration, Instant};

use crate::codec::{CodecStatus, FrameDecoder};
use crate::error::FrameDumpError;
use crate::progress::CancellationToken;
use crate::sink::{FrameConsumer, PlanarFrame, SinkStatus};
use crate::source::CompressedPacket;

/// How long [`PacketDecoder::drain`] waits for end of stream by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const IDLE_DRAIN_DELAY: Duration = Duration::from_millis(1);

/// Lifecycle of a [`PacketDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Accepting packets.
    Running,
    /// End of stream signalled; retrieving trailing frames.
    Draining,
    /// No more frames will be produced or consumed.
    Finished,
    /// The decoder reported an unrecoverable error.
    Failed,
}

/// Result of one decode attempt.
#[derive(Debug)]
pub enum DecodeStep<F> {
    /// A frame was produced.
    Frame(F),
    /// The decoder needs more input before it can produce a frame.
    NoFrameYet,
    /// The decoder is fully drained.
    EndOfStream,
}

/// Whether `packet` has a payload buffer of length zero.
pub fn is_empty_payload<P: CompressedPacket + ?Sized>(packet: &P) -> bool {
    packet.has_data() && packet.size() == 0
}

/// Send/receive state machine over a [`FrameDecoder`].
#[derive(Debug)]
pub struct PacketDecoder<D: FrameDecoder> {
    decoder: D,
    state: DecodeState,
    failure: Option<String>,
    frames_decoded: u64,
    corrupt_frames: u64,
    drain_timeout: Duration,
}

impl<D: FrameDecoder> PacketDecoder<D> {
    /// Wrap an opened decoder.
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            state: DecodeState::Running,
            failure: None,
            frames_decoded: 0,
            corrupt_frames: 0,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Bound the wall-clock time [`drain`](Self::drain) waits for the
    /// decoder to signal end of stream.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Current state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Frames produced by the decoder, corrupt ones included.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Corrupt frames dropped before the consumer.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Borrow the wrapped decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Mark the machine finished. Used when the worker is told to stop.
    pub fn finish(&mut self) {
        if self.state != DecodeState::Failed {
            self.state = DecodeState::Finished;
        }
    }

    fn fail(&mut self, reason: String) -> FrameDumpError {
        log::error!("{reason}");
        self.state = DecodeState::Failed;
        self.failure = Some(reason.clone());
        FrameDumpError::Protocol(reason)
    }

    fn failed_error(&self) -> FrameDumpError {
        FrameDumpError::Protocol(
            self.failure
                .clone()
                .unwrap_or_else(|| "decoder failed".to_string()),
        )
    }

    /// One decode attempt: submit `packet` if present, then try to
    /// retrieve one frame.
    ///
    /// An absent packet only retrieves. To signal end of stream use
    /// [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Protocol`] if submission fails with
    /// anything but end of stream, or retrieval fails with anything but
    /// "no frame yet" or end of stream. The machine then stays failed.
    pub fn decode(
        &mut self,
        packet: Option<&D::Packet>,
    ) -> Result<DecodeStep<D::Frame>, FrameDumpError> {
        match self.state {
            DecodeState::Failed => return Err(self.failed_error()),
            DecodeState::Finished => return Ok(DecodeStep::EndOfStream),
            DecodeState::Running | DecodeState::Draining => {}
        }

        if let Some(packet) = packet {
            match self.decoder.send_packet(packet) {
                Ok(()) | Err(CodecStatus::EndOfStream) => {}
                Err(status) => {
                    return Err(
                        self.fail(format!("Error submitting a packet for decoding: {status}"))
                    );
                }
            }
        }

        match self.decoder.receive_frame() {
            Ok(frame) => {
                self.frames_decoded += 1;
                Ok(DecodeStep::Frame(frame))
            }
            Err(CodecStatus::WouldBlock) => Ok(DecodeStep::NoFrameYet),
            Err(CodecStatus::EndOfStream) => {
                log::debug!("Decoder reached end of stream");
                self.state = DecodeState::Finished;
                Ok(DecodeStep::EndOfStream)
            }
            Err(CodecStatus::Failed(reason)) => {
                Err(self.fail(format!("Error during decoding: {reason}")))
            }
        }
    }

    /// Send the end-of-stream signal and move to [`DecodeState::Draining`].
    ///
    /// Flushing a decoder that is already draining is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Protocol`] if the decoder rejects the
    /// signal.
    pub fn flush(&mut self) -> Result<(), FrameDumpError> {
        match self.state {
            DecodeState::Failed => return Err(self.failed_error()),
            DecodeState::Finished => return Ok(()),
            DecodeState::Running | DecodeState::Draining => {}
        }

        match self.decoder.send_eof() {
            Ok(()) | Err(CodecStatus::EndOfStream) => {
                self.state = DecodeState::Draining;
                Ok(())
            }
            Err(status) => Err(self.fail(format!("Error flushing the decoder: {status}"))),
        }
    }

    /// Hand a produced frame to `consumer` unless it is corrupt.
    fn deliver<C>(
        &mut self,
        frame: &D::Frame,
        consumer: &mut C,
    ) -> Result<SinkStatus, FrameDumpError>
    where
        C: FrameConsumer<D::Frame> + ?Sized,
    {
        if frame.is_corrupt() {
            self.corrupt_frames += 1;
            log::warn!("Dropping corrupt decoded frame");
            return Ok(SinkStatus::Continue);
        }

        let status = consumer.consume(frame)?;
        if status == SinkStatus::Stop {
            self.state = DecodeState::Finished;
        }
        Ok(status)
    }

    /// Submit one real packet and drain every frame it yields into
    /// `consumer`.
    ///
    /// Returns [`SinkStatus::Stop`] once the consumer stops or the decoder
    /// reaches end of stream.
    ///
    /// # Errors
    ///
    /// Propagates decoder protocol errors and consumer errors.
    pub fn process_packet<C>(
        &mut self,
        packet: &D::Packet,
        consumer: &mut C,
    ) -> Result<SinkStatus, FrameDumpError>
    where
        C: FrameConsumer<D::Frame> + ?Sized,
    {
        if self.state == DecodeState::Finished {
            return Ok(SinkStatus::Stop);
        }
        if is_empty_payload(packet) {
            log::debug!("Skipping zero-length packet");
            return Ok(SinkStatus::Continue);
        }

        let mut step = self.decode(Some(packet))?;
        loop {
            match step {
                DecodeStep::Frame(frame) => {
                    if self.deliver(&frame, consumer)? == SinkStatus::Stop {
                        return Ok(SinkStatus::Stop);
                    }
                }
                DecodeStep::NoFrameYet => return Ok(SinkStatus::Continue),
                DecodeStep::EndOfStream => return Ok(SinkStatus::Stop),
            }
            step = self.decode(None)?;
        }
    }

    /// Flush the decoder and drain its trailing frames into `consumer`.
    ///
    /// Keeps retrieving until the decoder reports end of stream. Stops
    /// early when `consumer` stops, `stop` is cancelled, or the decoder
    /// stays silent past the drain timeout (logged as a warning, since any
    /// frames it still holds are lost). Ends in [`DecodeState::Finished`]
    /// unless an error occurs.
    ///
    /// # Errors
    ///
    /// Propagates decoder protocol errors and consumer errors.
    pub fn drain<C>(
        &mut self,
        consumer: &mut C,
        stop: &CancellationToken,
    ) -> Result<SinkStatus, FrameDumpError>
    where
        C: FrameConsumer<D::Frame> + ?Sized,
    {
        self.flush()?;

        let started = Instant::now();
        while self.state == DecodeState::Draining {
            if stop.is_cancelled() {
                log::debug!("Stop requested while draining");
                self.finish();
                return Ok(SinkStatus::Stop);
            }

            match self.decode(None)? {
                DecodeStep::Frame(frame) => {
                    if self.deliver(&frame, consumer)? == SinkStatus::Stop {
                        return Ok(SinkStatus::Stop);
                    }
                }
                DecodeStep::NoFrameYet => {
                    if started.elapsed() >= self.drain_timeout {
                        log::warn!(
                            "Decoder did not signal end of stream within {:?}; \
                             trailing frames it still holds are lost",
                            self.drain_timeout
                        );
                        self.finish();
                        break;
                    }
                    thread::sleep(IDLE_DRAIN_DELAY);
                }
                DecodeStep::EndOfStream => break,
            }
        }

        Ok(SinkStatus::Stop)
    }
}
