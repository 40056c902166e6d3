// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests driving the producer thread against a fake encoder.
//!
//! # Test Coverage
//!
//! - Batch reads, acknowledgments and stale (metadata) batches
//! - Origin establishment, per-epoch reset and origin sharing between streams
//! - Queue overflow, idle placeholders and lease bookkeeping
//! - Stop, end of stream and read failure propagation to `pull()`
//! - Encoder parameter handling on an open device

mod common;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::*;
use dreamenc::{
    Command, EncoderStream, Error, StreamConfig, StreamKind, StreamRegistry, VideoFormat,
    ticks_to_nanos,
};
use tracing::info;

/// Poll timeout long enough that no placeholder shows up during a test.
const QUIET_POLL_MS: u64 = 10_000;

fn quiet(kind: StreamKind) -> StreamConfig {
    StreamConfig {
        kind,
        poll_timeout_ms: QUIET_POLL_MS,
        ..Default::default()
    }
}

#[test]
fn metadata_batch_then_two_frames() {
    let (stream, device, feeder) = setup(StreamConfig {
        bitrate: Some(128),
        ..quiet(StreamKind::Audio)
    });
    assert_eq!(device.bitrate(), Some(128_000));

    feeder.send_batch(&[metadata(StreamKind::Audio)]);
    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 100, 1000),
        data(StreamKind::Audio, 100, 50, 2000),
    ]);

    let first = pull_data(&stream);
    assert_eq!(first.pts, Some(0));
    assert_eq!(first.dts, Some(0));
    assert_eq!(first.data(), ring_bytes(0, 100).as_slice());

    let second = pull_data(&stream);
    assert_eq!(second.pts, Some(ticks_to_nanos(2000 - 1000)));
    assert_eq!(second.data(), ring_bytes(100, 50).as_slice());

    assert_eq!(stream.origin(), Some(ticks_to_nanos(1000)));
    assert!(wait_for(|| device.acks() == vec![1, 2]));
    assert_eq!(stream.queued_frames(), 0);
}

#[test]
fn metadata_skips_rest_of_batch() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Audio));

    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 10, 900),
        metadata(StreamKind::Audio),
        data(StreamKind::Audio, 10, 10, 1000),
        data(StreamKind::Audio, 20, 10, 1100),
    ]);
    feeder.send_batch(&[data(StreamKind::Audio, 30, 10, 1200)]);

    let first = pull_data(&stream);
    assert_eq!(first.data(), ring_bytes(0, 10).as_slice());
    let next = pull_data(&stream);
    assert_eq!(next.data(), ring_bytes(30, 10).as_slice());
    assert_eq!(next.pts, Some(ticks_to_nanos(1200) - ticks_to_nanos(900)));

    assert!(wait_for(|| device.acks() == vec![4, 1]));
}

#[test]
fn one_ack_per_drained_batch() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Video));

    let mut expected = Vec::new();
    for batch in 0..3u32 {
        let records: Vec<_> = (0..=batch)
            .map(|i| data(StreamKind::Video, batch * 1000 + i * 100, 100, u64::from(batch * 10 + i)))
            .collect();
        expected.push(batch + 1);
        feeder.send_batch(&records);
    }

    for _ in 0..6 {
        pull_data(&stream);
    }
    assert!(wait_for(|| device.acks() == expected));
}

#[test]
fn end_marker_is_consumed_silently() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Audio));

    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 8, 100),
        end_marker(StreamKind::Audio),
        data(StreamKind::Audio, 8, 8, 200),
    ]);

    assert_eq!(pull_data(&stream).data(), ring_bytes(0, 8).as_slice());
    assert_eq!(pull_data(&stream).data(), ring_bytes(8, 8).as_slice());
    assert!(wait_for(|| device.acks() == vec![3]));
}

#[test]
fn origin_is_stable_within_an_epoch() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Audio));

    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 10, 9000),
        data(StreamKind::Audio, 10, 10, 18000),
        data(StreamKind::Audio, 20, 10, 4500),
    ]);
    let timestamps: Vec<_> = (0..3).map(|_| pull_data(&stream).pts).collect();
    assert_eq!(
        timestamps,
        vec![Some(0), Some(ticks_to_nanos(9000)), None],
        "frames before the origin carry no timestamp"
    );
    assert_eq!(stream.origin(), Some(ticks_to_nanos(9000)));

    // A new play epoch establishes a new origin.
    stream.pause().unwrap();
    stream.play().unwrap();
    assert_eq!(stream.origin(), None);
    feeder.send_batch(&[data(StreamKind::Audio, 30, 10, 27000)]);
    assert_eq!(pull_data(&stream).pts, Some(0));
    assert_eq!(stream.origin(), Some(ticks_to_nanos(27000)));
}

#[test]
fn play_discards_frames_from_previous_epoch() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Audio));

    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 10, 9000),
        data(StreamKind::Audio, 10, 10, 18000),
    ]);
    assert!(wait_for(|| device.acks() == vec![2]));
    assert_eq!(stream.queued_frames(), 2);

    stream.pause().unwrap();
    stream.play().unwrap();
    assert_eq!(stream.queued_frames(), 0);
    assert_eq!(stream.outstanding_buffers(), 0);

    feeder.send_batch(&[data(StreamKind::Audio, 20, 10, 900_000)]);
    let frame = pull_data(&stream);
    assert_eq!(frame.pts, Some(0));
    assert_eq!(frame.data(), ring_bytes(20, 10).as_slice());
    assert_eq!(stream.origin(), Some(ticks_to_nanos(900_000)));
}

#[test]
fn video_origin_uses_dts() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Video));

    feeder.send_batch(&[
        video_data(0, 10, 3600, 1800),
        video_data(10, 10, 7200, 3600),
    ]);
    let first = pull_data(&stream);
    assert_eq!(stream.origin(), Some(ticks_to_nanos(1800)));
    assert_eq!(first.pts, Some(ticks_to_nanos(3600) - ticks_to_nanos(1800)));
    let second = pull_data(&stream);
    assert_eq!(second.pts, Some(ticks_to_nanos(7200) - ticks_to_nanos(1800)));
}

#[test]
fn paired_streams_share_origin() {
    init_logging();
    let registry = StreamRegistry::new();
    let audio =
        EncoderStream::with_registry(quiet(StreamKind::Audio), &registry, "dreamaudiosource0")
            .unwrap();
    let video =
        EncoderStream::with_registry(quiet(StreamKind::Video), &registry, "dreamvideosource0")
            .unwrap();
    let (audio_device, audio_feeder) = FakeDevice::new(StreamKind::Audio);
    let (video_device, video_feeder) = FakeDevice::new(StreamKind::Video);
    audio.start_with_device(audio_device).unwrap();
    video.start_with_device(video_device).unwrap();
    audio.play().unwrap();
    video.play().unwrap();

    audio_feeder.send_batch(&[data(StreamKind::Audio, 0, 10, 5000)]);
    assert_eq!(pull_data(&audio).pts, Some(0));
    assert_eq!(audio.origin(), Some(ticks_to_nanos(5000)));

    video_feeder.send_batch(&[data(StreamKind::Video, 0, 10, 7000)]);
    let frame = pull_data(&video);
    assert_eq!(video.origin(), audio.origin());
    assert_eq!(frame.pts, Some(ticks_to_nanos(7000) - ticks_to_nanos(5000)));
    info!("Video adopted audio origin {:?}", video.origin());
}

#[test]
fn unpaired_stream_uses_own_origin() {
    init_logging();
    let registry = StreamRegistry::new();
    let video =
        EncoderStream::with_registry(quiet(StreamKind::Video), &registry, "dreamvideosource0")
            .unwrap();
    let (device, feeder) = FakeDevice::new(StreamKind::Video);
    video.start_with_device(device).unwrap();
    video.play().unwrap();

    feeder.send_batch(&[data(StreamKind::Video, 0, 10, 7000)]);
    assert_eq!(pull_data(&video).pts, Some(0));
    assert_eq!(video.origin(), Some(ticks_to_nanos(7000)));
}

#[test]
fn stop_interrupts_blocked_producer() {
    let (stream, _device, _feeder) = setup(quiet(StreamKind::Audio));
    let stream = Arc::new(stream);

    let consumer = {
        let stream = stream.clone();
        thread::spawn(move || stream.pull())
    };
    // Let both threads block: the producer in poll, the consumer in pull.
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    stream.stop().unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(matches!(consumer.join().unwrap(), Err(Error::Flushing)));
    assert!(matches!(stream.pull(), Err(Error::Flushing)));
    assert!(!stream.is_running());
}

#[test]
fn flush_unblocks_pull_until_cleared() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Audio));
    let stream = Arc::new(stream);

    let consumer = {
        let stream = stream.clone();
        thread::spawn(move || stream.pull())
    };
    thread::sleep(Duration::from_millis(20));
    stream.set_flushing(true);
    assert!(matches!(consumer.join().unwrap(), Err(Error::Flushing)));
    assert!(matches!(stream.pull(), Err(Error::Flushing)));

    stream.set_flushing(false);
    feeder.send_batch(&[data(StreamKind::Audio, 0, 4, 10)]);
    assert_eq!(pull_data(&stream).len(), 4);
}

#[test]
fn idle_timeout_emits_placeholder() {
    let (stream, device, _feeder) = setup(StreamConfig {
        poll_timeout_ms: 20,
        ..StreamConfig::audio()
    });

    // Current behaviour: an idle encoder yields empty frames without timestamps.
    let frame = stream.pull().unwrap();
    assert!(frame.is_placeholder());
    assert!(frame.is_empty());
    assert_eq!(frame.pts, None);
    assert!(device.acks().is_empty());
}

#[test]
fn overflow_evicts_oldest_and_releases_it() {
    let (stream, device, feeder) = setup(StreamConfig {
        buffer_size: 2,
        ..quiet(StreamKind::Audio)
    });

    feeder.send_batch(&[
        data(StreamKind::Audio, 0, 10, 100),
        data(StreamKind::Audio, 10, 10, 200),
        data(StreamKind::Audio, 20, 10, 300),
        data(StreamKind::Audio, 30, 10, 400),
    ]);
    assert!(wait_for(|| device.acks() == vec![4]));

    assert_eq!(stream.queued_frames(), 2);
    assert_eq!(stream.outstanding_buffers(), 2);
    assert_eq!(stream.memory_bounds(), (20, 40));

    assert_eq!(pull_data(&stream).data(), ring_bytes(20, 10).as_slice());
    assert_eq!(pull_data(&stream).data(), ring_bytes(30, 10).as_slice());
}

#[test]
fn releasing_last_buffer_resets_bounds() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Audio));
    assert_eq!(stream.memory_bounds(), (usize::MAX, 0));

    feeder.send_batch(&[
        data(StreamKind::Audio, 64, 32, 100),
        data(StreamKind::Audio, 128, 32, 200),
    ]);
    let first = pull_data(&stream);
    let second = pull_data(&stream);
    assert_eq!(stream.memory_bounds(), (64, 160));

    drop(first);
    assert_eq!(stream.memory_bounds(), (128, 160));
    drop(second);
    assert_eq!(stream.memory_bounds(), (usize::MAX, 0));
    assert_eq!(stream.outstanding_buffers(), 0);
}

#[test]
fn buffers_outlive_their_stream() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Audio));
    feeder.send_batch(&[data(StreamKind::Audio, 0, 16, 100)]);
    let frame = pull_data(&stream);

    drop(stream);
    assert_eq!(frame.data(), ring_bytes(0, 16).as_slice());
    drop(frame);
}

#[test]
fn out_of_ring_descriptor_is_skipped() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Audio));
    let ring_size = StreamKind::Audio.ring_size() as u32;

    feeder.send_batch(&[
        data(StreamKind::Audio, ring_size - 4, 16, 100),
        data(StreamKind::Audio, 0, 16, 200),
    ]);
    let frame = pull_data(&stream);
    assert_eq!(frame.data(), ring_bytes(0, 16).as_slice());
    assert!(wait_for(|| device.acks() == vec![2]));
}

#[test]
fn end_of_stream_reaches_pull_once() {
    let (stream, _device, feeder) = setup(quiet(StreamKind::Audio));

    feeder.send_batch(&[data(StreamKind::Audio, 0, 8, 100)]);
    assert_eq!(pull_data(&stream).len(), 8);
    feeder.end_of_stream();

    assert!(matches!(stream.pull(), Err(Error::Eos)));
    assert!(matches!(stream.pull(), Err(Error::Flushing)));
    assert!(!stream.is_running());
}

#[test]
fn partial_record_fails_the_stream() {
    let (stream, device, feeder) = setup(quiet(StreamKind::Video));

    feeder.send_raw(&[0u8; 10]);
    assert!(matches!(stream.pull(), Err(Error::ReadFailed(_))));
    assert!(matches!(stream.pull(), Err(Error::Flushing)));
    assert!(device.acks().is_empty());
}

#[test]
fn set_bitrate_twice_is_idempotent() {
    let (stream, device, _feeder) = setup(quiet(StreamKind::Audio));
    assert_eq!(device.bitrate(), Some(128_000));

    stream.set_bitrate(256).unwrap();
    stream.set_bitrate(256).unwrap();
    let sent = device
        .commands()
        .iter()
        .filter(|command| **command == Command::SetBitrate(256_000))
        .count();
    assert_eq!(sent, 2);
    assert_eq!(device.bitrate(), Some(256_000));
    assert_eq!(stream.bitrate(), 256);
}

#[test]
fn rejected_setting_keeps_previous_value() {
    let (stream, device, _feeder) = setup(quiet(StreamKind::Video));
    stream.set_video_format(VideoFormat::default()).unwrap();

    device.reject(Some("set-resolution"));
    let full_hd = VideoFormat {
        width: 1920,
        height: 1080,
        framerate: 25,
    };
    assert!(matches!(
        stream.set_video_format(full_hd),
        Err(Error::DeviceIoctlFailed { .. })
    ));
    assert_eq!(stream.video_format(), Some(VideoFormat::default()));
    assert!(stream.is_running());
}

#[test]
fn rejected_parameter_fails_start() {
    init_logging();
    let stream = EncoderStream::new(quiet(StreamKind::Audio)).unwrap();
    let (device, _feeder) = FakeDevice::new(StreamKind::Audio);
    device.reject(Some("set-bitrate"));
    assert!(matches!(
        stream.start_with_device(device),
        Err(Error::DeviceIoctlFailed { .. })
    ));
    assert!(!stream.is_running());
    assert!(matches!(stream.pull(), Err(Error::Flushing)));
}

#[test]
fn play_and_pause_drive_the_encoder() {
    let (stream, device, _feeder) = setup(quiet(StreamKind::Audio));
    assert!(stream.is_encoding());
    stream.pause().unwrap();
    assert!(!stream.is_encoding());
    stream.stop().unwrap();
    assert_eq!(
        device.commands(),
        vec![Command::SetBitrate(128_000), Command::Start, Command::Stop]
    );
}

#[test]
fn missing_device_is_unavailable() {
    init_logging();
    let stream = EncoderStream::new(StreamConfig {
        device_path: Some("/nonexistent/aenc0".into()),
        ..StreamConfig::audio()
    })
    .unwrap();
    assert!(matches!(
        stream.start(),
        Err(Error::DeviceUnavailable { .. })
    ));
}

#[test]
fn restart_after_stop() {
    let (stream, _device, _feeder) = setup(quiet(StreamKind::Audio));
    stream.stop().unwrap();

    let (device, feeder) = FakeDevice::new(StreamKind::Audio);
    stream.start_with_device(device).unwrap();
    stream.play().unwrap();
    feeder.send_batch(&[data(StreamKind::Audio, 0, 8, 100)]);
    assert_eq!(pull_data(&stream).pts, Some(0));
    assert!(matches!(
        stream.start_with_device(FakeDevice::new(StreamKind::Audio).0),
        Err(Error::InvalidArg(_))
    ));
}
