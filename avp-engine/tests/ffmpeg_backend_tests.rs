//! FFmpeg backend against generated container files

#![cfg(feature = "ffmpeg")]

mod helpers;

use avp_engine::backend::FfmpegBackend;
use avp_engine::media::{FrameDecoder, MediaBackend, MediaSource, StreamKind, StreamParams};
use avp_engine::{OpenError, PlaybackState, PlayerEvent, ReadError};
use helpers::avi::AviFixture;
use helpers::{test_player, wait_for, FrameCapture};
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write_avi(dir: &TempDir, fixture: &AviFixture) -> PathBuf {
    let path = dir.path().join("clip.avi");
    fixture.write(&path).unwrap();
    path
}

fn expected_pixel(n: u32) -> [u8; 4] {
    let [r, g, b] = AviFixture::frame_color(n);
    [r, g, b, 255]
}

#[test]
fn test_opens_both_streams() {
    let dir = TempDir::new().unwrap();
    let fixture = AviFixture::default();
    let path = write_avi(&dir, &fixture);

    let media = FfmpegBackend::new().open(&format!("file://{}", path.display())).unwrap();
    assert_eq!(media.video.kind, StreamKind::Video);
    assert_eq!(media.video.codec, "rawvideo");
    assert!(matches!(
        media.video.params,
        StreamParams::Video { width: 16, height: 16, .. }
    ));
    assert_eq!(media.video.frame_interval_ms(), Some(100.0));

    assert_eq!(media.audio.kind, StreamKind::Audio);
    assert_eq!(media.audio.codec, "pcm_s16le");
    assert_eq!(
        media.audio.params,
        StreamParams::Audio {
            sample_rate: 48_000,
            channels: 2
        }
    );
    assert_eq!(media.total_ms(), fixture.duration_ms());
    assert_eq!(media.source.streams().len(), 2);
}

#[test]
fn test_decodes_rgba_frames_and_f32_audio() {
    let dir = TempDir::new().unwrap();
    let fixture = AviFixture::default();
    let path = write_avi(&dir, &fixture);
    let mut media = FfmpegBackend::new().open(path.to_str().unwrap()).unwrap();

    let mut video_frames = Vec::new();
    let mut audio_frames = Vec::new();
    loop {
        match media.source.read_packet() {
            Ok(packet) if packet.stream_index == media.video.index => {
                video_frames.extend(media.video_decoder.decode(&packet).unwrap());
            }
            Ok(packet) if packet.stream_index == media.audio.index => {
                audio_frames.extend(media.audio_decoder.decode(&packet).unwrap());
            }
            Ok(packet) => panic!("packet from unexpected stream {}", packet.stream_index),
            Err(ReadError::EndOfStream) => break,
            Err(e) => panic!("unexpected read error: {}", e),
        }
    }

    assert_eq!(video_frames.len(), fixture.frames as usize);
    for (n, frame) in video_frames.iter().enumerate() {
        assert_eq!((frame.width, frame.height), (16, 16));
        assert_eq!(frame.rgba.len(), 16 * 16 * 4);
        assert_eq!(&frame.rgba[..4], &expected_pixel(n as u32));
        assert_eq!(media.video.position_ms(frame.pts), n as i64 * 100);
    }

    let total: usize = audio_frames.iter().map(|f| f.frame_count()).sum();
    assert_eq!(total, 48_000);
    let first = &audio_frames[0];
    assert_eq!((first.sample_rate, first.channels), (48_000, 2));
    let level = AviFixture::audio_level(0) as f32 / 32_768.0;
    assert!((first.samples[0] - level).abs() < 1e-4, "sample {}", first.samples[0]);
}

#[test]
fn test_seek_lands_at_or_before_target() {
    let dir = TempDir::new().unwrap();
    let path = write_avi(&dir, &AviFixture::default());
    let mut media = FfmpegBackend::new().open(path.to_str().unwrap()).unwrap();

    let target = media.audio.start_ts + media.audio.ms_to_ts(500);
    media.source.seek(media.audio.index, target).unwrap();
    let packet = media.source.read_packet().unwrap();
    let stream = if packet.stream_index == media.video.index {
        &media.video
    } else {
        &media.audio
    };
    let landed = stream.position_ms(packet.pts);
    assert!((300..=500).contains(&landed), "landed at {}", landed);

    assert!(media.source.seek(42, 0).is_err());
}

#[test]
fn test_audio_only_file_lacks_video() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for n in 0..44_100u32 {
        let t = n as f32 / 44_100.0;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let err = FfmpegBackend::new().open(path.to_str().unwrap()).unwrap_err();
    assert_eq!(err, OpenError::MissingStream(StreamKind::Video));
}

#[test]
fn test_missing_file_is_unreadable() {
    let err = FfmpegBackend::new().open("/nonexistent/avp/clip.avi").unwrap_err();
    assert!(matches!(err, OpenError::Unreadable { .. }));
}

#[test]
fn test_unreachable_network_url_is_unreadable() {
    let backend = FfmpegBackend::new().with_network_timeout(Duration::from_secs(1));
    let err = backend.open("http://127.0.0.1:9/clip.mp4").unwrap_err();
    assert!(matches!(err, OpenError::Unreadable { .. }), "{:?}", err);
}

#[test]
#[serial]
fn test_plays_container_to_end() {
    let dir = TempDir::new().unwrap();
    let fixture = AviFixture::default();
    let path = write_avi(&dir, &fixture);

    let (mut player, audio) = test_player();
    let frames = player.take_frame_receiver().unwrap();
    let mut events = player.subscribe();
    player.open(path.to_str().unwrap()).unwrap();
    assert_eq!(player.state(), PlaybackState::Ready);
    assert_eq!(player.current_position(), (0, 1000));
    player.play().unwrap();

    let mut sink = FrameCapture::default();
    let ended = wait_for(Duration::from_secs(5), || {
        frames.pump(&mut sink);
        matches!(events.try_recv(), Ok(PlayerEvent::EndOfStream { .. }))
    });
    frames.pump(&mut sink);
    player.close().unwrap();

    assert!(ended);
    let expected: Vec<i64> = (0..10).map(|i| i * 100).collect();
    assert_eq!(sink.positions, expected);
    let pixels: Vec<[u8; 4]> = (0..10).map(expected_pixel).collect();
    assert_eq!(sink.first_pixels, pixels);
    assert!(audio.duration_ms() >= 900, "audio {} ms", audio.duration_ms());
}

#[test]
#[serial]
fn test_seek_in_container_skips_earlier_frames() {
    let dir = TempDir::new().unwrap();
    let path = write_avi(&dir, &AviFixture::default());

    let (mut player, _audio) = test_player();
    let frames = player.take_frame_receiver().unwrap();
    let mut events = player.subscribe();
    player.open(path.to_str().unwrap()).unwrap();
    player.play().unwrap();
    player.seek_to(500).unwrap();

    let mut sink = FrameCapture::default();
    let ended = wait_for(Duration::from_secs(5), || {
        frames.pump(&mut sink);
        matches!(events.try_recv(), Ok(PlayerEvent::EndOfStream { .. }))
    });
    frames.pump(&mut sink);
    player.close().unwrap();

    assert!(ended);
    assert!(sink.positions.iter().all(|p| *p >= 500), "{:?}", sink.positions);
    assert_eq!(sink.positions.first(), Some(&500));
    assert_eq!(sink.positions.last(), Some(&900));
}
