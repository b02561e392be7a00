//! Media fixtures shared by the integration tests.
//!
//! The checked-in fixtures under `tests/fixtures/` are used when present
//! (see `generate_fixtures.sh`). Otherwise a small clip is encoded on the
//! fly with FFmpeg's built-in MPEG-4 encoder, so the decode tests always run.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Packet, Rational,
    codec::{self, Id, encoder::video::Encoder as VideoEncoder},
    format::{self, Pixel, context::Output},
    frame::Video as VideoFrame,
};

pub const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

pub const GENERATED_WIDTH: u32 = 64;
pub const GENERATED_HEIGHT: u32 = 48;
pub const GENERATED_FRAMES: usize = 12;

const GENERATED_FPS: i32 = 10;

/// A video file to decode: the checked-in fixture, or a clip encoded into
/// `directory`.
pub fn sample_video(directory: &Path) -> PathBuf {
    if Path::new(SAMPLE_VIDEO).exists() {
        return PathBuf::from(SAMPLE_VIDEO);
    }
    let path = directory.join("generated.mp4");
    encode_test_clip(&path);
    path
}

/// Encode a short MPEG-4 clip whose frames are flat grey levels.
pub fn encode_test_clip(path: &Path) {
    ffmpeg_next::init().expect("Failed to initialise FFmpeg");

    let mut output = format::output(path).expect("Failed to create output");
    let needs_global_header = output
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let mpeg4 = ffmpeg_next::encoder::find(Id::MPEG4).expect("MPEG-4 encoder not available");
    let mut stream = output.add_stream(mpeg4).expect("Failed to add stream");
    let stream_index = stream.index();

    let mut encoder = codec::context::Context::from_parameters(stream.parameters())
        .expect("Failed to create codec context")
        .encoder()
        .video()
        .expect("Not a video encoder");
    let time_base = Rational::new(1, GENERATED_FPS);
    encoder.set_width(GENERATED_WIDTH);
    encoder.set_height(GENERATED_HEIGHT);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(GENERATED_FPS, 1)));
    if needs_global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    let mut encoder = encoder.open_as(mpeg4).expect("Failed to open encoder");
    stream.set_parameters(&encoder);
    output.write_header().expect("Failed to write header");
    let stream_time_base = output
        .stream(stream_index)
        .expect("Stream disappeared")
        .time_base();

    for index in 0..GENERATED_FRAMES {
        let mut frame = VideoFrame::new(Pixel::YUV420P, GENERATED_WIDTH, GENERATED_HEIGHT);
        let luma = 16 + (index as u8) * 16;
        frame.data_mut(0).fill(luma);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(index as i64));

        encoder.send_frame(&frame).expect("Failed to send frame");
        write_pending(&mut encoder, &mut output, stream_index, time_base, stream_time_base);
    }
    encoder.send_eof().expect("Failed to flush encoder");
    write_pending(&mut encoder, &mut output, stream_index, time_base, stream_time_base);

    output.write_trailer().expect("Failed to write trailer");
}

fn write_pending(
    encoder: &mut VideoEncoder,
    output: &mut Output,
    stream_index: usize,
    time_base: Rational,
    stream_time_base: Rational,
) {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(time_base, stream_time_base);
        packet
            .write_interleaved(output)
            .expect("Failed to write packet");
    }
}

/// Write one second of 8 kHz mono silence as a PCM WAV file.
pub fn silent_wav(path: &Path) {
    const SAMPLE_RATE: u32 = 8_000;
    let data_len = SAMPLE_RATE * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    std::fs::write(path, bytes).expect("Failed to write WAV file");
}
