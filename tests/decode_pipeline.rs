//! End-to-end decode tests. They use the checked-in sample when present
//! and an MPEG-4 clip encoded on the fly otherwise.

mod common;

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use framedump::{
    DecodeOptions, DecodeWorker, EndReason, MediaKind, MediaSession, PixelFormat,
    ProgressCallback, ProgressInfo, StreamSource, select_video_stream,
};

fn geometry(path: &Path) -> (usize, usize) {
    let locator = path.to_string_lossy();
    let options = DecodeOptions::new(&*locator, "unused.yuv");
    let source = StreamSource::open(&locator, &options).expect("Failed to open sample");
    let streams = source.streams();
    let video = select_video_stream(&streams).expect("Sample has no video stream");
    (video.width as usize, video.height as usize)
}

#[test]
fn writes_exactly_the_frame_budget() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let sample = common::sample_video(temporary_directory.path());
    let (width, height) = geometry(&sample);

    let output = temporary_directory.path().join("frames.yuv");
    let options =
        DecodeOptions::new(sample.to_string_lossy(), &output).with_frame_count(3);

    let session = MediaSession::open(&options).expect("Failed to open session");
    let report = DecodeWorker::spawn(session)
        .expect("Failed to spawn worker")
        .join()
        .expect("Decode failed");

    assert_eq!(report.frames_written, 3);
    assert_eq!(report.end, EndReason::BudgetReached);
    assert!(report.packets >= 1);

    let frame_size = PixelFormat::Yuv420
        .raw_frame_size(width, height)
        .expect("YUV420 has a layout");
    let written = std::fs::metadata(&output).expect("Output missing").len();
    assert_eq!(written as usize, 3 * frame_size);
}

#[test]
fn short_stream_ends_at_end_of_stream() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let sample = common::sample_video(temporary_directory.path());
    let options = DecodeOptions::new(
        sample.to_string_lossy(),
        temporary_directory.path().join("all.yuv"),
    )
    .with_frame_count(1_000_000);

    let session = MediaSession::open(&options).expect("Failed to open session");
    let report = DecodeWorker::spawn(session).unwrap().join().unwrap();

    assert_eq!(report.end, EndReason::EndOfStream);
    assert!(report.frames_written > 0);
    assert!(report.frames_written < 1_000_000);
}

#[test]
fn generated_clip_decodes_every_frame() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let clip = temporary_directory.path().join("clip.mp4");
    common::encode_test_clip(&clip);

    let output = temporary_directory.path().join("clip.yuv");
    let options = DecodeOptions::new(clip.to_string_lossy(), &output).with_frame_count(100);
    let report = DecodeWorker::spawn(MediaSession::open(&options).unwrap())
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.frames_written, common::GENERATED_FRAMES as u64);

    let frame_size = PixelFormat::Yuv420
        .raw_frame_size(
            common::GENERATED_WIDTH as usize,
            common::GENERATED_HEIGHT as usize,
        )
        .unwrap();
    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), common::GENERATED_FRAMES * frame_size);

    // The first frame is dark, the last one bright.
    let first_luma = written[frame_size / 3] as i32;
    let last_luma = written[(common::GENERATED_FRAMES - 1) * frame_size + frame_size / 3] as i32;
    assert!(last_luma > first_luma + 100, "{first_luma} -> {last_luma}");
}

#[test]
fn progress_is_reported_per_frame() {
    struct Recorder(Mutex<Vec<u64>>);

    impl ProgressCallback for Recorder {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.lock().unwrap().push(info.frames_written);
        }
    }

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let sample = common::sample_video(temporary_directory.path());
    let options = DecodeOptions::new(
        sample.to_string_lossy(),
        temporary_directory.path().join("p.yuv"),
    )
    .with_frame_count(4)
    .with_progress(recorder.clone());

    let session = MediaSession::open(&options).unwrap();
    DecodeWorker::spawn(session).unwrap().join().unwrap();

    assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn source_close_is_idempotent() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let sample = common::sample_video(temporary_directory.path());
    let locator = sample.to_string_lossy();

    let options = DecodeOptions::new(&*locator, "unused.yuv");
    let mut source = StreamSource::open(&locator, &options).unwrap();
    assert!(source.is_open());
    assert!(source.streams().iter().any(|s| s.kind == MediaKind::Video));

    source.close();
    source.close();
    assert!(!source.is_open());
    assert!(source.streams().is_empty());
}
