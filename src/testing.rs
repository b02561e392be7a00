//! Scripted stand-ins for the demuxer, the decoder and the output file.

use std::collections::VecDeque;
use std::io::{Result as IoResult, Write};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::codec::{CodecStatus, FrameDecoder};
use crate::pixel::PixelFormat;
use crate::sink::RawFrame;
use crate::source::{CompressedPacket, PacketSource, ReadError};

/// 4x4 YUV420 frame filled with `value`: 24 bytes when serialized.
pub(crate) fn frame(value: u8) -> RawFrame {
    RawFrame::packed(PixelFormat::Yuv420, 4, 4, &[value; 24]).unwrap()
}

pub(crate) const FRAME_BYTES: usize = 24;

#[derive(Debug, Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory output that stays readable after the sink drops its writer.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// A packet that tells the scripted decoder which frames it decodes to.
#[derive(Debug, Clone)]
pub(crate) struct TestPacket {
    stream: usize,
    size: usize,
    has_data: bool,
    corrupt: bool,
    frames: Vec<RawFrame>,
    send_error: Option<CodecStatus>,
}

impl TestPacket {
    pub(crate) fn video(frames: Vec<RawFrame>) -> Self {
        Self {
            stream: 0,
            size: 100,
            has_data: true,
            corrupt: false,
            frames,
            send_error: None,
        }
    }

    pub(crate) fn zero_length() -> Self {
        Self {
            size: 0,
            ..Self::video(vec![frame(0xFF)])
        }
    }

    pub(crate) fn on_stream(mut self, stream: usize) -> Self {
        self.stream = stream;
        self
    }

    pub(crate) fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }

    pub(crate) fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub(crate) fn with_send_error(mut self, status: CodecStatus) -> Self {
        self.send_error = Some(status);
        self
    }
}

impl CompressedPacket for TestPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }

    fn size(&self) -> usize {
        self.size
    }

    fn has_data(&self) -> bool {
        self.has_data
    }

    fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

/// Replays a fixed list of read results, then repeats `exhausted`.
#[derive(Debug)]
pub(crate) struct ScriptedSource {
    script: VecDeque<Result<TestPacket, ReadError>>,
    exhausted: ReadError,
    reads: Counter,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<Result<TestPacket, ReadError>>) -> Self {
        Self {
            script: script.into(),
            exhausted: ReadError::EndOfStream,
            reads: Counter::default(),
        }
    }

    pub(crate) fn packets(packets: Vec<TestPacket>) -> Self {
        Self::new(packets.into_iter().map(Ok).collect())
    }

    pub(crate) fn then(mut self, error: ReadError) -> Self {
        self.exhausted = error;
        self
    }

    pub(crate) fn reads(&self) -> Counter {
        self.reads.clone()
    }
}

impl PacketSource for ScriptedSource {
    type Packet = TestPacket;

    fn read_packet(&mut self) -> Result<TestPacket, ReadError> {
        self.reads.increment();
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(self.exhausted.clone()))
    }
}

/// Emits the frames carried by each submitted packet, plus `trailing`
/// frames once end of stream is signalled.
#[derive(Debug, Default)]
pub(crate) struct ScriptedDecoder {
    queue: VecDeque<RawFrame>,
    trailing: Vec<RawFrame>,
    eof_sent: bool,
    eof_delay: usize,
    receive_error: Option<String>,
    submitted: Counter,
}

impl ScriptedDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_trailing(mut self, frames: Vec<RawFrame>) -> Self {
        self.trailing = frames;
        self
    }

    /// Answer "no frame yet" `polls` times after end of stream is
    /// signalled before releasing the trailing frames.
    pub(crate) fn with_eof_delay(mut self, polls: usize) -> Self {
        self.eof_delay = polls;
        self
    }

    pub(crate) fn with_receive_error(mut self, reason: &str) -> Self {
        self.receive_error = Some(reason.to_string());
        self
    }

    pub(crate) fn submitted(&self) -> Counter {
        self.submitted.clone()
    }
}

impl FrameDecoder for ScriptedDecoder {
    type Packet = TestPacket;
    type Frame = RawFrame;

    fn send_packet(&mut self, packet: &TestPacket) -> Result<(), CodecStatus> {
        if let Some(status) = packet.send_error.clone() {
            return Err(status);
        }
        if self.eof_sent {
            return Err(CodecStatus::EndOfStream);
        }
        self.submitted.increment();
        self.queue.extend(packet.frames.iter().cloned());
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecStatus> {
        if self.eof_sent {
            return Err(CodecStatus::EndOfStream);
        }
        self.eof_sent = true;
        self.queue.extend(self.trailing.drain(..));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<RawFrame, CodecStatus> {
        if let Some(reason) = &self.receive_error {
            return Err(CodecStatus::Failed(reason.clone()));
        }
        if self.eof_sent && self.eof_delay > 0 {
            self.eof_delay -= 1;
            return Err(CodecStatus::WouldBlock);
        }
        match self.queue.pop_front() {
            Some(frame) => Ok(frame),
            None if self.eof_sent => Err(CodecStatus::EndOfStream),
            None => Err(CodecStatus::WouldBlock),
        }
    }
}
