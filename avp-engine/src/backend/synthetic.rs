//! Synthetic test media (`synth://` urls)
//!
//! Generates a container with one video and one audio stream without touching
//! the filesystem. Packets still go through a real encode/decode step: video
//! packets carry a frame index that the decoder renders into an RGBA test
//! pattern, audio packets carry 16-bit PCM of a sine tone.
//!
//! `synth://name?duration_ms=10000&fps=25&width=320&height=180&sample_rate=48000&channels=2&tone_hz=440`
//!
//! `audio=false` or `video=false` omits a stream.

use crate::error::{Error, OpenError, ReadError, Result};
use crate::media::{
    AudioFrame, FrameDecoder, MediaBackend, MediaSource, OpenedMedia, Packet, StreamInfo, StreamKind,
    StreamParams, VideoFrame,
};
use avp_common::TimeBase;
use std::f64::consts::TAU;
use std::str::FromStr;
use tracing::{debug, trace};

/// Url scheme handled by [`SyntheticBackend`]
pub const SCHEME: &str = "synth://";

/// Sample frames per audio packet
const AUDIO_PACKET_FRAMES: u64 = 1024;

/// Tone amplitude relative to full scale
const TONE_AMPLITUDE: f64 = 0.25;

/// Longest generated media: one day
const MAX_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;

/// Parameters parsed from a `synth://` url
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub duration_ms: i64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub tone_hz: f64,
    pub video: bool,
    pub audio: bool,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            fps: 25,
            width: 320,
            height: 180,
            sample_rate: 48_000,
            channels: 2,
            tone_hz: 440.0,
            video: true,
            audio: true,
        }
    }
}

impl SyntheticParams {
    /// Parse the query string of a `synth://` url
    pub fn parse(url: &str) -> std::result::Result<Self, OpenError> {
        let invalid = |reason: String| OpenError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid(format!("expected {} scheme", SCHEME)))?;

        let mut params = Self::default();
        let query = match rest.split_once('?') {
            Some((_, query)) => query,
            None => return Ok(params),
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("parameter '{}' has no value", pair)))?;

            match key {
                "duration_ms" => params.duration_ms = parse_value(key, value).map_err(invalid)?,
                "fps" => params.fps = parse_value(key, value).map_err(invalid)?,
                "width" => params.width = parse_value(key, value).map_err(invalid)?,
                "height" => params.height = parse_value(key, value).map_err(invalid)?,
                "sample_rate" => params.sample_rate = parse_value(key, value).map_err(invalid)?,
                "channels" => params.channels = parse_value(key, value).map_err(invalid)?,
                "tone_hz" => params.tone_hz = parse_value(key, value).map_err(invalid)?,
                "video" => params.video = parse_value(key, value).map_err(invalid)?,
                "audio" => params.audio = parse_value(key, value).map_err(invalid)?,
                other => return Err(invalid(format!("unknown parameter '{}'", other))),
            }
        }

        params.validate().map_err(invalid)?;
        Ok(params)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(1..=MAX_DURATION_MS).contains(&self.duration_ms) {
            return Err(format!("duration_ms must be in 1..={}", MAX_DURATION_MS));
        }
        if !(1..=240).contains(&self.fps) {
            return Err("fps must be in 1..=240".to_string());
        }
        if !(1..=4096).contains(&self.width) || !(1..=4096).contains(&self.height) {
            return Err("width and height must be in 1..=4096".to_string());
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err("sample_rate must be in 8000..=192000".to_string());
        }
        if !(1..=8).contains(&self.channels) {
            return Err("channels must be in 1..=8".to_string());
        }
        if !self.tone_hz.is_finite() || self.tone_hz < 0.0 {
            return Err("tone_hz must be a non-negative number".to_string());
        }
        Ok(())
    }

    fn video_frames(&self) -> u64 {
        // ceil(duration * fps / 1000)
        (self.duration_ms as u64 * self.fps as u64).div_ceil(1000)
    }

    fn audio_samples(&self) -> u64 {
        self.duration_ms as u64 * self.sample_rate as u64 / 1000
    }

    fn video_stream(&self) -> StreamInfo {
        StreamInfo {
            index: VIDEO_INDEX,
            kind: StreamKind::Video,
            codec: "synth-pattern".to_string(),
            time_base: TimeBase::MPEG,
            start_ts: 0,
            duration_ts: Some(TimeBase::MPEG.ms_to_ticks(self.duration_ms)),
            params: StreamParams::Video {
                width: self.width,
                height: self.height,
                frame_rate: Some((self.fps, 1)),
            },
        }
    }

    fn audio_stream(&self) -> StreamInfo {
        StreamInfo {
            index: AUDIO_INDEX,
            kind: StreamKind::Audio,
            codec: "pcm_s16le".to_string(),
            time_base: TimeBase::from_sample_rate(self.sample_rate),
            start_ts: 0,
            duration_ts: Some(self.audio_samples() as i64),
            params: StreamParams::Audio {
                sample_rate: self.sample_rate,
                channels: self.channels,
            },
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> std::result::Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("cannot parse {}='{}'", key, value))
}

/// Backend for `synth://` urls
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticBackend;

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with(SCHEME)
    }

    fn open(&self, url: &str) -> std::result::Result<OpenedMedia, OpenError> {
        let params = SyntheticParams::parse(url)?;
        if !params.video {
            return Err(OpenError::MissingStream(StreamKind::Video));
        }
        if !params.audio {
            return Err(OpenError::MissingStream(StreamKind::Audio));
        }

        debug!(?params, "Opened synthetic source");

        let source = SyntheticSource::new(params.clone());
        Ok(OpenedMedia {
            video: params.video_stream(),
            audio: params.audio_stream(),
            source: Box::new(source),
            video_decoder: Box::new(PatternDecoder::new(params.width, params.height)),
            audio_decoder: Box::new(PcmDecoder::new(params.sample_rate, params.channels)),
        })
    }
}

/// Demuxer producing interleaved synthetic packets
#[derive(Debug)]
pub struct SyntheticSource {
    params: SyntheticParams,
    streams: Vec<StreamInfo>,
    next_frame: u64,
    next_sample: u64,
    total_frames: u64,
    total_samples: u64,
}

impl SyntheticSource {
    pub fn new(params: SyntheticParams) -> Self {
        let streams = vec![params.video_stream(), params.audio_stream()];
        Self {
            total_frames: params.video_frames(),
            total_samples: params.audio_samples(),
            next_frame: 0,
            next_sample: 0,
            streams,
            params,
        }
    }

    fn frame_ms(&self, frame: u64) -> u64 {
        frame * 1000 / self.params.fps as u64
    }

    fn sample_ms(&self, sample: u64) -> u64 {
        sample * 1000 / self.params.sample_rate as u64
    }

    fn video_packet(&mut self) -> Packet {
        let frame = self.next_frame;
        self.next_frame += 1;
        let fps = self.params.fps as i64;
        Packet {
            stream_index: VIDEO_INDEX,
            pts: frame as i64 * 90_000 / fps,
            duration: 90_000 / fps,
            data: frame.to_le_bytes().to_vec(),
        }
    }

    fn audio_packet(&mut self) -> Packet {
        let start = self.next_sample;
        let end = (start + AUDIO_PACKET_FRAMES).min(self.total_samples);
        self.next_sample = end;

        let channels = self.params.channels as usize;
        let rate = self.params.sample_rate as f64;
        let mut data = Vec::with_capacity((end - start) as usize * channels * 2);
        for n in start..end {
            let phase = TAU * self.params.tone_hz * n as f64 / rate;
            let value = (phase.sin() * TONE_AMPLITUDE * i16::MAX as f64) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        Packet {
            stream_index: AUDIO_INDEX,
            pts: start as i64,
            duration: (end - start) as i64,
            data,
        }
    }
}

impl MediaSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError> {
        let video_left = self.next_frame < self.total_frames;
        let audio_left = self.next_sample < self.total_samples;

        let packet = match (video_left, audio_left) {
            (false, false) => return Err(ReadError::EndOfStream),
            (true, false) => self.video_packet(),
            (false, true) => self.audio_packet(),
            (true, true) => {
                if self.frame_ms(self.next_frame) <= self.sample_ms(self.next_sample) {
                    self.video_packet()
                } else {
                    self.audio_packet()
                }
            }
        };

        trace!(stream = packet.stream_index, pts = packet.pts, "Synthetic packet");
        Ok(packet)
    }

    fn seek(&mut self, stream_index: usize, target_ts: i64) -> Result<()> {
        let stream = self
            .streams
            .get(stream_index)
            .ok_or_else(|| Error::Seek(format!("no stream with index {}", stream_index)))?;
        let target_ms = stream.ts_to_ms(target_ts).clamp(0, self.params.duration_ms) as u64;

        let frame = target_ms * self.params.fps as u64 / 1000;
        let sample = target_ms * self.params.sample_rate as u64 / 1000;
        self.next_frame = frame.min(self.total_frames);
        self.next_sample = (sample / AUDIO_PACKET_FRAMES * AUDIO_PACKET_FRAMES).min(self.total_samples);

        debug!(
            target_ms,
            frame = self.next_frame,
            sample = self.next_sample,
            "Synthetic seek"
        );
        Ok(())
    }
}

/// Renders frame-index packets into a moving-bar test pattern
#[derive(Debug)]
pub struct PatternDecoder {
    width: u32,
    height: u32,
}

impl PatternDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_width = (w / 16).max(2);
        let bar_x = (index as usize * 4) % w;

        let mut rgba = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let on_bar = x >= bar_x && x < bar_x + bar_width;
                if on_bar {
                    rgba.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    rgba.extend_from_slice(&[(x * 255 / w) as u8, (y * 255 / h) as u8, 128, 255]);
                }
            }
        }
        rgba
    }
}

impl FrameDecoder<VideoFrame> for PatternDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        let bytes: [u8; 8] = packet.data.as_slice().try_into().map_err(|_| {
            Error::Decode(format!(
                "pattern packet must be 8 bytes, got {}",
                packet.data.len()
            ))
        })?;
        let index = u64::from_le_bytes(bytes);

        Ok(vec![VideoFrame {
            width: self.width,
            height: self.height,
            rgba: self.render(index),
            pts: packet.pts,
            position_ms: 0,
        }])
    }

    fn flush(&mut self) {}
}

/// Converts interleaved little-endian i16 PCM to f32
#[derive(Debug)]
pub struct PcmDecoder {
    sample_rate: u32,
    channels: u16,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl FrameDecoder<AudioFrame> for PcmDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>> {
        let frame_bytes = 2 * self.channels as usize;
        if packet.data.len() % frame_bytes != 0 {
            return Err(Error::Decode(format!(
                "pcm packet of {} bytes is not a whole number of {}-channel frames",
                packet.data.len(),
                self.channels
            )));
        }
        if packet.data.is_empty() {
            return Ok(Vec::new());
        }

        let samples = packet
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();

        Ok(vec![AudioFrame {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
            pts: packet.pts,
        }])
    }

    fn flush(&mut self) {}
}
