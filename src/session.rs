//! The decode session and its worker loop.
//!
//! A [`Session`] owns everything one decode run needs: the packet source,
//! the packet decoder, the frame sink, the selected video stream and the
//! diagnostic counters. [`MediaSession::open`] performs the setup phase
//! against real media; [`Session::run`] is the loop the decode worker
//! executes.
//!
//! Fields are declared in release order. Dropping or closing a session
//! releases the sink first, then the decoder, then the source: the reverse
//! of the order in which [`MediaSession::open`] acquires them.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::codec::{CodecSession, FrameDecoder};
use crate::configuration::{DecodeOptions, RetryPolicy};
use crate::decode::{DecodeState, PacketDecoder, is_empty_payload};
use crate::error::FrameDumpError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback, ProgressInfo};
use crate::sink::{FrameConsumer, FrameSink, PlanarFrame, SinkStatus};
use crate::source::{CompressedPacket, PacketSource, ReadError, StreamSource};

/// Cumulative size of the video packets handed to the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounters {
    /// Compressed bytes submitted.
    pub bytes: u64,
    /// Packets submitted.
    pub packets: u64,
}

impl StreamCounters {
    fn record(&mut self, size: usize) {
        self.bytes += size as u64;
        self.packets += 1;
    }
}

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The source ran out of packets and the decoder was drained.
    EndOfStream,
    /// The frame budget was met and the sink closed itself.
    BudgetReached,
    /// A stop was requested from outside the worker.
    Stopped,
}

/// Summary of a finished decode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Frames serialized to the sink.
    pub frames_written: u64,
    /// Frames produced by the decoder, corrupt ones included.
    pub frames_decoded: u64,
    /// Video packets dropped because the demuxer flagged them corrupt.
    pub corrupt_packets: u64,
    /// Decoded frames dropped because the decoder flagged them corrupt.
    pub corrupt_frames: u64,
    /// Zero-length video packets skipped.
    pub skipped_packets: u64,
    /// Frames dropped because the sink cannot write their pixel format.
    pub unsupported_frames: u64,
    /// Compressed bytes submitted to the decoder.
    pub bytes: u64,
    /// Packets submitted to the decoder.
    pub packets: u64,
    /// Why the loop ended.
    pub end: EndReason,
    /// Wall-clock duration of the loop.
    pub elapsed: Duration,
}

/// Attempt counter after one more failed read. Saturates so that unlimited
/// retries never overflow.
fn next_attempt(attempts: u32) -> u32 {
    attempts.saturating_add(1)
}

/// Frame consumer that reports progress after every written frame.
struct ReportingSink<'a, W: Write> {
    sink: &'a mut FrameSink<W>,
    progress: &'a dyn ProgressCallback,
    counters: StreamCounters,
    started: Instant,
}

impl<W: Write, F: PlanarFrame + ?Sized> FrameConsumer<F> for ReportingSink<'_, W> {
    fn consume(&mut self, frame: &F) -> Result<SinkStatus, FrameDumpError> {
        let before = self.sink.frames_written();
        let status = self.sink.write_frame(frame)?;

        if self.sink.frames_written() > before {
            self.progress.on_progress(&ProgressInfo {
                frames_written: self.sink.frames_written(),
                budget: self.sink.budget(),
                packets: self.counters.packets,
                bytes: self.counters.bytes,
                elapsed: self.started.elapsed(),
            });
        }

        Ok(status)
    }
}

/// State of one decode run.
pub struct Session<S, D, W>
where
    S: PacketSource,
    D: FrameDecoder<Packet = S::Packet>,
    W: Write,
{
    sink: FrameSink<W>,
    decoder: PacketDecoder<D>,
    source: S,
    video_stream: usize,
    counters: StreamCounters,
    corrupt_packets: u64,
    skipped_packets: u64,
    stop: CancellationToken,
    retry_policy: RetryPolicy,
    progress: Arc<dyn ProgressCallback>,
}

/// A session over a real container, decoder and output file.
pub type MediaSession = Session<StreamSource, CodecSession, BufWriter<File>>;

impl<S, D, W> Debug for Session<S, D, W>
where
    S: PacketSource,
    D: FrameDecoder<Packet = S::Packet>,
    W: Write,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Session")
            .field("video_stream", &self.video_stream)
            .field("state", &self.decoder.state())
            .field("frames_written", &self.sink.frames_written())
            .field("budget", &self.sink.budget())
            .field("counters", &self.counters)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl MediaSession {
    /// Run the setup phase: open the source, bind the decoder, create the
    /// output file.
    ///
    /// # Errors
    ///
    /// Any setup failure from [`StreamSource::open`] or
    /// [`CodecSession::open`], or [`FrameDumpError::Io`] if the output
    /// cannot be created. Whatever was acquired before the failure is
    /// released before returning.
    pub fn open(options: &DecodeOptions) -> Result<Self, FrameDumpError> {
        let source = StreamSource::open(&options.input, options)?;
        let codec = CodecSession::open(&source, options)?;
        let video_stream = codec.stream_index();
        let sink = FrameSink::create(&options.output, options.frame_count)?;

        log::info!(
            "Decoding {} into {} ({} frames)",
            options.input,
            options.output.display(),
            options.frame_count
        );

        Ok(Session::new(source, codec, video_stream, sink)
            .with_retry_policy(options.retry_policy)
            .with_drain_timeout(options.drain_timeout)
            .with_progress(Arc::clone(&options.progress))
            .with_stop_token(options.cancellation.clone().unwrap_or_default()))
    }
}

impl<S, D, W> Session<S, D, W>
where
    S: PacketSource,
    D: FrameDecoder<Packet = S::Packet>,
    W: Write,
{
    /// Assemble a session from already acquired parts.
    pub fn new(source: S, decoder: D, video_stream: usize, sink: FrameSink<W>) -> Self {
        Self {
            sink,
            decoder: PacketDecoder::new(decoder),
            source,
            video_stream,
            counters: StreamCounters::default(),
            corrupt_packets: 0,
            skipped_packets: 0,
            stop: CancellationToken::new(),
            retry_policy: RetryPolicy::default(),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Set how packet read failures are retried.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bound how long the drain phase waits for end of stream.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.decoder = self.decoder.with_drain_timeout(timeout);
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Share a stop flag with the controller.
    #[must_use]
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// A handle to the session's stop flag.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Index of the video stream being decoded.
    pub fn video_stream(&self) -> usize {
        self.video_stream
    }

    /// The wrapped decoder.
    pub fn decoder(&self) -> &D {
        self.decoder.decoder()
    }

    /// Packet counters so far.
    pub fn counters(&self) -> StreamCounters {
        self.counters
    }

    fn back_off(&self, attempts: u32, last_error: &str) -> Result<(), FrameDumpError> {
        if self.retry_policy.is_exhausted(attempts) {
            log::error!("Giving up after {attempts} failed reads: {last_error}");
            return Err(FrameDumpError::ReadRetriesExhausted {
                attempts,
                last_error: last_error.to_string(),
            });
        }
        thread::sleep(self.retry_policy.backoff_for(attempts));
        Ok(())
    }

    /// Run the decode loop until the source is exhausted, the budget is
    /// met, a stop is requested or a fatal error occurs.
    ///
    /// Read failures are retried with exponential backoff; only exhausting
    /// a finite [`RetryPolicy`] makes them fatal. The sink is flushed and
    /// closed before this returns, and the stop flag is left set.
    ///
    /// # Errors
    ///
    /// - [`FrameDumpError::Protocol`] if the decoder fails.
    /// - [`FrameDumpError::ReadRetriesExhausted`] if reads keep failing.
    /// - [`FrameDumpError::Io`] if the output cannot be written.
    pub fn run(&mut self) -> Result<SessionReport, FrameDumpError> {
        let started = Instant::now();
        log::info!(
            "Decode worker started on stream #{} (budget {})",
            self.video_stream,
            self.sink.budget()
        );

        let outcome = self.decode_loop(started);
        self.stop.cancel();
        let closed = self.sink.close();
        let end = outcome?;
        closed?;

        let report = SessionReport {
            frames_written: self.sink.frames_written(),
            frames_decoded: self.decoder.frames_decoded(),
            corrupt_packets: self.corrupt_packets,
            corrupt_frames: self.decoder.corrupt_frames(),
            skipped_packets: self.skipped_packets,
            unsupported_frames: self.sink.unsupported_frames(),
            bytes: self.counters.bytes,
            packets: self.counters.packets,
            end,
            elapsed: started.elapsed(),
        };
        log::info!(
            "Decode worker finished ({:?}): {} frames written, {} decoded, {} packets, {} bytes",
            report.end,
            report.frames_written,
            report.frames_decoded,
            report.packets,
            report.bytes
        );

        Ok(report)
    }

    fn stopped_reason(&self) -> EndReason {
        if self.sink.is_closed() {
            EndReason::BudgetReached
        } else if self.decoder.state() == DecodeState::Finished && !self.stop.is_cancelled() {
            EndReason::EndOfStream
        } else {
            EndReason::Stopped
        }
    }

    fn decode_loop(&mut self, started: Instant) -> Result<EndReason, FrameDumpError> {
        let mut failed_reads: u32 = 0;

        loop {
            if self.stop.is_cancelled() {
                log::info!("Stop requested, leaving the decode loop");
                self.decoder.finish();
                return Ok(self.stopped_reason());
            }

            let packet = match self.source.read_packet() {
                Ok(packet) => {
                    failed_reads = 0;
                    packet
                }
                Err(ReadError::EndOfStream) => {
                    log::info!("End of input reached");
                    break;
                }
                Err(ReadError::WouldBlock) => {
                    failed_reads = next_attempt(failed_reads);
                    log::debug!("No packet available yet (attempt {failed_reads})");
                    self.back_off(failed_reads, "resource temporarily unavailable")?;
                    continue;
                }
                Err(ReadError::Other(reason)) => {
                    failed_reads = next_attempt(failed_reads);
                    log::warn!("Failed to read a packet (attempt {failed_reads}): {reason}");
                    self.back_off(failed_reads, &reason)?;
                    continue;
                }
            };

            if packet.stream_index() != self.video_stream {
                continue;
            }
            if packet.is_corrupt() {
                self.corrupt_packets += 1;
                log::warn!("Dropping corrupt video packet ({} bytes)", packet.size());
                continue;
            }
            if is_empty_payload(&packet) {
                self.skipped_packets += 1;
                log::debug!("Skipping zero-length video packet");
                continue;
            }

            self.counters.record(packet.size());
            let mut consumer = ReportingSink {
                sink: &mut self.sink,
                progress: self.progress.as_ref(),
                counters: self.counters,
                started,
            };
            if self.decoder.process_packet(&packet, &mut consumer)? == SinkStatus::Stop {
                let reason = self.stopped_reason();
                log::debug!("Decode loop stopping: {reason:?}");
                return Ok(reason);
            }
        }

        let mut consumer = ReportingSink {
            sink: &mut self.sink,
            progress: self.progress.as_ref(),
            counters: self.counters,
            started,
        };
        self.decoder.drain(&mut consumer, &self.stop)?;

        Ok(self.stopped_reason())
    }

    /// Release the sink, then the decoder, then the source.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDumpError::Io`] if flushing the sink fails. The
    /// decoder and source are released regardless.
    pub fn close(self) -> Result<(), FrameDumpError> {
        let Session {
            mut sink,
            decoder,
            mut source,
            ..
        } = self;

        let flushed = sink.close();
        drop(sink);
        drop(decoder);
        source.close();

        flushed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::codec::CodecStatus;
    use crate::testing::{
        FRAME_BYTES, ScriptedDecoder, ScriptedSource, SharedBuffer, TestPacket, frame,
    };

    type TestSession = Session<ScriptedSource, ScriptedDecoder, SharedBuffer>;

    fn session(
        source: ScriptedSource,
        decoder: ScriptedDecoder,
        budget: u64,
    ) -> (TestSession, SharedBuffer) {
        let output = SharedBuffer::default();
        let sink = FrameSink::new(output.clone(), budget);
        let fast_retries = RetryPolicy::unlimited()
            .with_backoff(Duration::from_micros(10), Duration::from_micros(100));
        let session = Session::new(source, decoder, 0, sink).with_retry_policy(fast_retries);
        (session, output)
    }

    fn single_frame_packets(count: u8) -> Vec<TestPacket> {
        (1..=count).map(|value| TestPacket::video(vec![frame(value)])).collect()
    }

    #[test]
    fn budget_three_of_five_frames() {
        let source = ScriptedSource::packets(single_frame_packets(5));
        let reads = source.reads();
        let (mut session, output) = session(source, ScriptedDecoder::new(), 3);

        let report = session.run().unwrap();

        assert_eq!(report.frames_written, 3);
        assert_eq!(report.end, EndReason::BudgetReached);
        assert_eq!(output.len(), 3 * FRAME_BYTES);
        // The fourth frame closed the sink; the fifth packet was never read.
        assert_eq!(reads.get(), 4);
        assert!(session.stop_token().is_cancelled());
    }

    #[test]
    fn exact_budget_runs_to_end_of_stream() {
        let source = ScriptedSource::packets(single_frame_packets(3));
        let (mut session, output) = session(source, ScriptedDecoder::new(), 3);

        let report = session.run().unwrap();

        assert_eq!(report.frames_written, 3);
        assert_eq!(report.end, EndReason::EndOfStream);
        assert_eq!(output.contents()[..FRAME_BYTES], [1; FRAME_BYTES]);
        assert_eq!(output.contents()[2 * FRAME_BYTES..], [3; FRAME_BYTES]);
    }

    #[test]
    fn corrupt_packets_are_neither_decoded_nor_counted() {
        let source = ScriptedSource::packets(vec![
            TestPacket::video(vec![frame(1)]).with_size(10),
            TestPacket::video(vec![frame(2)]).with_size(20).corrupt(),
            TestPacket::video(vec![frame(3)]).with_size(30),
        ]);
        let decoder = ScriptedDecoder::new();
        let submitted = decoder.submitted();
        let (mut session, _) = session(source, decoder, 10);

        let report = session.run().unwrap();

        assert_eq!(submitted.get(), 2);
        assert_eq!(report.packets, 2);
        assert_eq!(report.bytes, 40);
        assert_eq!(report.corrupt_packets, 1);
        assert_eq!(report.frames_written, 2);
    }

    #[test]
    fn zero_length_packet_mid_stream_changes_nothing() {
        let source = ScriptedSource::packets(vec![
            TestPacket::video(vec![frame(1)]),
            TestPacket::zero_length(),
            TestPacket::video(vec![frame(2)]),
        ]);
        let decoder = ScriptedDecoder::new();
        let submitted = decoder.submitted();
        let (mut session, output) = session(source, decoder, 10);

        let report = session.run().unwrap();

        assert_eq!(submitted.get(), 2);
        assert_eq!(report.packets, 2);
        assert_eq!(report.skipped_packets, 1);
        assert_eq!(report.frames_written, 2);
        assert!(!output.contents().contains(&0xFF));
    }

    #[test]
    fn packets_of_other_streams_are_ignored() {
        let source = ScriptedSource::packets(vec![
            TestPacket::video(vec![frame(9)]).on_stream(1),
            TestPacket::video(vec![frame(1)]),
        ]);
        let (mut session, _) = session(source, ScriptedDecoder::new(), 10);

        let report = session.run().unwrap();
        assert_eq!(report.packets, 1);
        assert_eq!(report.frames_written, 1);
    }

    #[test]
    fn flush_recovers_trailing_frames() {
        let source = ScriptedSource::packets(vec![TestPacket::video(vec![frame(1)])]);
        let decoder = ScriptedDecoder::new().with_trailing(vec![frame(2), frame(3)]);
        let (mut session, _) = session(source, decoder, 10);

        let report = session.run().unwrap();
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.frames_decoded, 3);
        assert_eq!(report.end, EndReason::EndOfStream);
    }

    #[test]
    fn slow_trailing_frames_are_not_lost() {
        let source = ScriptedSource::packets(vec![TestPacket::video(vec![frame(1)])]);
        let decoder = ScriptedDecoder::new()
            .with_trailing(vec![frame(2)])
            .with_eof_delay(150);
        let (mut session, output) = session(source, decoder, 10);

        let report = session.run().unwrap();
        assert_eq!(report.frames_written, 2);
        assert_eq!(report.end, EndReason::EndOfStream);
        assert_eq!(output.contents()[FRAME_BYTES..], [2; FRAME_BYTES]);
    }

    #[test]
    fn attempt_counter_saturates() {
        assert_eq!(next_attempt(0), 1);
        assert_eq!(next_attempt(u32::MAX - 1), u32::MAX);
        assert_eq!(next_attempt(u32::MAX), u32::MAX);
    }

    #[test]
    fn transient_read_errors_are_retried() {
        let source = ScriptedSource::new(vec![
            Err(ReadError::WouldBlock),
            Err(ReadError::Other("Connection timed out".into())),
            Ok(TestPacket::video(vec![frame(1)])),
            Err(ReadError::WouldBlock),
            Ok(TestPacket::video(vec![frame(2)])),
        ]);
        let (mut session, _) = session(source, ScriptedDecoder::new(), 10);

        let report = session.run().unwrap();
        assert_eq!(report.frames_written, 2);
    }

    #[test]
    fn finite_retry_limit_is_fatal() {
        let source = ScriptedSource::packets(vec![TestPacket::video(vec![frame(1)])])
            .then(ReadError::Other("Input/output error".into()));
        let reads = source.reads();
        let (session, _) = session(source, ScriptedDecoder::new(), 10);
        let mut session = session.with_retry_policy(
            RetryPolicy::limited(4).with_backoff(Duration::ZERO, Duration::ZERO),
        );

        let error = session.run().unwrap_err();
        assert!(matches!(
            error,
            FrameDumpError::ReadRetriesExhausted { attempts: 4, .. }
        ));
        assert_eq!(reads.get(), 5);
    }

    #[test]
    fn decoder_failure_ends_the_loop() {
        let source = ScriptedSource::packets(vec![
            TestPacket::video(vec![frame(1)]),
            TestPacket::video(vec![]).with_send_error(CodecStatus::Failed("Invalid data".into())),
            TestPacket::video(vec![frame(3)]),
        ]);
        let reads = source.reads();
        let (mut session, output) = session(source, ScriptedDecoder::new(), 10);

        let error = session.run().unwrap_err();
        assert!(matches!(error, FrameDumpError::Protocol(_)));
        assert_eq!(reads.get(), 2);
        // The frame written before the failure is flushed out.
        assert_eq!(output.len(), FRAME_BYTES);
    }

    #[test]
    fn external_stop_before_first_read() {
        let source = ScriptedSource::packets(single_frame_packets(3));
        let reads = source.reads();
        let (mut session, _) = session(source, ScriptedDecoder::new(), 10);
        session.stop_token().cancel();

        let report = session.run().unwrap();
        assert_eq!(report.end, EndReason::Stopped);
        assert_eq!(report.frames_written, 0);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn progress_is_reported_per_written_frame() {
        struct Recorder(Mutex<Vec<(u64, u64)>>);
        impl ProgressCallback for Recorder {
            fn on_progress(&self, info: &ProgressInfo) {
                self.0.lock().unwrap().push((info.frames_written, info.packets));
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let source = ScriptedSource::packets(vec![
            TestPacket::video(vec![frame(1), frame(2)]),
            TestPacket::video(vec![frame(3)]),
        ]);
        let (session, _) = session(source, ScriptedDecoder::new(), 10);
        let mut session = session.with_progress(recorder.clone());

        session.run().unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 1), (2, 1), (3, 2)]);
    }

    #[test]
    fn close_releases_everything_once() {
        let source = ScriptedSource::packets(single_frame_packets(1));
        let (mut session, _) = session(source, ScriptedDecoder::new(), 1);
        session.run().unwrap();
        session.close().unwrap();
    }
}
