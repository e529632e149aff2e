//! Voice pipeline integration tests
//!
//! Tests capture and playback scheduling without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use tokio_test::{assert_ok, assert_pending, task};

use driveassist::voice::{
    CapturePipeline, PlaybackScheduler, SAMPLE_RATE, decode_frame, encode_frame,
    encode_frame_base64, samples_to_wav,
};

mod common;
use common::{FakeInput, FakeOutput};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn scheduler() -> (PlaybackScheduler, FakeOutput) {
    let output = FakeOutput::new();
    let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
    scheduler.open().unwrap();
    (scheduler, output)
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV should have reasonable size
    assert!(wav_data.len() > 44); // WAV header is 44 bytes
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    // Read WAV back
    let cursor = Cursor::new(wav_data);
    let mut reader = hound::WavReader::new(cursor).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[1], 16384);
    assert_eq!(read_samples[3], i16::MAX);
}

#[test]
fn test_codec_error_bound_on_speech() {
    let samples = generate_sine_samples(220.0, 0.25, 0.9);
    let decoded = decode_frame(&encode_frame(&samples)).unwrap();

    assert_eq!(decoded.len(), samples.len());
    for (a, b) in samples.iter().zip(&decoded) {
        assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
    }
}

#[test]
fn test_scheduling_is_monotonic() {
    let (mut scheduler, output) = scheduler();
    let lengths = [2400, 480, 7200, 1200, 2400];
    let mut last_start = 0.0;

    for (i, len) in lengths.iter().enumerate() {
        // Clock jumps past the cursor halfway through (late chunk)
        if i == 3 {
            output.advance(2.0);
        }
        let now = output.now();
        let buffer = scheduler
            .on_audio_chunk(&encode_frame_base64(&vec![0.1; *len]))
            .unwrap()
            .unwrap();

        assert!(buffer.start_time >= last_start);
        assert!(buffer.start_time >= now);
        last_start = buffer.start_time;
    }
}

#[test]
fn test_no_gap_when_chunks_arrive_early() {
    let (mut scheduler, output) = scheduler();

    let mut buffers = Vec::new();
    for _ in 0..6 {
        buffers.push(
            scheduler
                .on_audio_chunk(&encode_frame_base64(&vec![0.1; 2400]))
                .unwrap()
                .unwrap(),
        );
        // Playback consumes slower than chunks arrive
        output.advance(0.05);
    }

    for pair in buffers.windows(2) {
        assert!((pair[1].start_time - pair[0].end_time()).abs() < 1e-9);
    }
    assert!((scheduler.next_start_time() - 0.6).abs() < 1e-9);
}

#[test]
fn test_finished_buffers_are_reaped() {
    let (mut scheduler, output) = scheduler();
    for _ in 0..3 {
        scheduler
            .on_audio_chunk(&encode_frame_base64(&vec![0.1; 2400]))
            .unwrap();
    }
    assert_eq!(scheduler.scheduled().len(), 3);

    output.advance(0.25);
    assert_eq!(scheduler.reap(), 2);
    assert!(!scheduler.is_drained());

    output.advance(0.1);
    assert!(scheduler.is_drained());
}

#[test]
fn test_interrupt_stops_every_buffer() {
    let (mut scheduler, output) = scheduler();
    for _ in 0..3 {
        scheduler
            .on_audio_chunk(&encode_frame_base64(&vec![0.1; 2400]))
            .unwrap();
    }

    assert_eq!(scheduler.interrupt(), 3);
    assert!(scheduler.scheduled().is_empty());
    assert!(scheduler.next_start_time().abs() < f64::EPSILON);

    let stopped = output.stopped();
    let handles: Vec<_> = output.scheduled().iter().map(|s| s.handle).collect();
    assert_eq!(stopped, handles);

    // Nothing left to stop
    assert_eq!(scheduler.interrupt(), 0);
}

#[test]
fn test_closed_sink_ignores_chunks() {
    let (mut scheduler, output) = scheduler();
    scheduler.close();
    scheduler.close();

    assert!(!output.is_open());
    let result = scheduler
        .on_audio_chunk(&encode_frame_base64(&[0.1; 240]))
        .unwrap();
    assert!(result.is_none());
    assert!(output.scheduled().is_empty());
}

#[test]
fn test_resampled_chunks_stay_contiguous() {
    for rate in [48000_u32, 44100] {
        let output = FakeOutput::with_rate(rate);
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        scheduler.open().unwrap();

        // 40ms chunks, one second in total
        for _ in 0..25 {
            scheduler
                .on_audio_chunk(&encode_frame_base64(&[0.25; 960]))
                .unwrap();
        }
        scheduler.finish_turn().unwrap();

        let per_chunk = 960 * rate as usize / 24000;
        let scheduled = output.scheduled();
        let total: usize = scheduled.iter().map(|s| s.samples).sum();
        assert_eq!(total, 25 * per_chunk, "{rate}");

        // Only the first chunk and the flushed tail differ in length
        for s in &scheduled[1..scheduled.len() - 1] {
            assert_eq!(s.samples, per_chunk, "{rate}");
        }
        for pair in scheduled.windows(2) {
            let end = pair[0].start_at + pair[0].samples as f64 / f64::from(rate);
            assert!((pair[1].start_at - end).abs() < 1e-9, "{rate}");
        }
        assert!((scheduler.next_start_time() - 1.0).abs() < 1e-9, "{rate}");
    }
}

#[test]
fn test_interrupt_discards_resampler_tail() {
    let output = FakeOutput::with_rate(48000);
    let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
    scheduler.open().unwrap();

    scheduler
        .on_audio_chunk(&encode_frame_base64(&[0.25; 960]))
        .unwrap();
    scheduler.interrupt();
    let before = output.scheduled().len();

    assert!(scheduler.finish_turn().unwrap().is_none());
    assert_eq!(output.scheduled().len(), before);
}

#[tokio::test]
async fn test_capture_pipeline_encodes_blocks() {
    let input = FakeInput::new();
    let mut pipeline = CapturePipeline::new(Box::new(input.clone()));

    pipeline.start().unwrap();
    pipeline.start().unwrap();
    assert!(input.is_open());
    assert_eq!(input.state.lock().unwrap().opens, 1);

    let block = generate_sine_samples(440.0, 0.256, 0.5);
    assert!(input.feed(block.clone()));

    let frame = pipeline.next_frame().await.unwrap().unwrap();
    assert_eq!(frame, encode_frame(&block));
    assert_eq!(pipeline.frames_captured(), 1);

    pipeline.stop();
    pipeline.stop();
    assert!(!input.is_open());
    assert!(!pipeline.is_running());
}

#[test]
fn test_stopped_pipeline_never_yields() {
    let input = FakeInput::new();
    let mut pipeline = CapturePipeline::new(Box::new(input.clone()));

    let mut frame = task::spawn(pipeline.next_frame());
    assert_pending!(frame.poll());
    assert!(!input.feed(vec![0.0; 4]));
    assert_pending!(frame.poll());
}

#[tokio::test]
async fn test_source_hangup_ends_stream() {
    let input = FakeInput::new();
    let mut pipeline = CapturePipeline::new(Box::new(input.clone()));
    assert_ok!(pipeline.start());

    // Device vanished without stop()
    input.state.lock().unwrap().blocks = None;

    let frame = tokio::time::timeout(Duration::from_secs(1), pipeline.next_frame())
        .await
        .unwrap();
    assert!(frame.is_none());
}

#[test]
fn test_denied_microphone_reports_permission() {
    let mut pipeline = CapturePipeline::new(Box::new(FakeInput::denied()));
    assert!(matches!(
        pipeline.acquire(),
        Err(driveassist::Error::PermissionDenied(_))
    ));
    assert!(!pipeline.holds_device());
}
