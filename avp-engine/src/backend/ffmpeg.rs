//! FFmpeg backend: local files and network streams through `ffmpeg-next`
//!
//! Handles plain paths, `file://` urls and the network protocols listed in
//! [`NETWORK_SCHEMES`]. The container's best video and best audio streams are
//! decoded; video frames are converted to RGBA with swscale and audio to
//! interleaved f32. Subtitle, data and attachment streams are not exposed, so
//! the reader discards their packets.

use crate::error::{Error, OpenError, ReadError, Result};
use crate::media::{
    AudioFrame, FrameDecoder, MediaBackend, MediaSource, OpenedMedia, Packet, StreamInfo, StreamKind,
    StreamParams, VideoFrame,
};
use avp_common::TimeBase;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::media::Type;
use ffmpeg::software::scaling;
use ffmpeg_next as ffmpeg;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, trace};

const FILE_SCHEME: &str = "file://";

/// Url prefixes opened as network streams
pub const NETWORK_SCHEMES: &[&str] = &[
    "http://", "https://", "rtsp://", "rtsps://", "rtmp://", "rtmps://", "srt://", "udp://", "tcp://",
];

const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// One-time library setup; the error is kept so every open reports it
fn init() -> std::result::Result<(), String> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| format!("ffmpeg init failed: {}", e))?;
        ffmpeg::format::network::init();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
    .clone()
}

fn is_network(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    NETWORK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Filesystem path named by a url, if it is a local one
fn local_path(url: &str) -> Option<&str> {
    match url.strip_prefix(FILE_SCHEME) {
        Some(path) => Some(path),
        None if !url.contains("://") => Some(url),
        None => None,
    }
}

/// Backend for files and network streams
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    network_timeout: Duration,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on a network read or connect after `timeout`
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn accepts(&self, url: &str) -> bool {
        is_network(url) || local_path(url).is_some_and(|p| !p.is_empty())
    }

    fn open(&self, url: &str) -> std::result::Result<OpenedMedia, OpenError> {
        let mut source = FfmpegSource::open(url, self.network_timeout)?;

        let video_index = source.video_index.ok_or(OpenError::MissingStream(StreamKind::Video))?;
        let audio_index = source.audio_index.ok_or(OpenError::MissingStream(StreamKind::Audio))?;

        let video_decoder = FfmpegVideoDecoder::open(&source, video_index)?;
        let audio_decoder = FfmpegAudioDecoder::open(&source, audio_index)?;
        source.update_params(video_index, |params| {
            if let StreamParams::Video { width, height, .. } = params {
                *width = video_decoder.decoder.width();
                *height = video_decoder.decoder.height();
            }
        });
        source.update_params(audio_index, |params| {
            *params = StreamParams::Audio {
                sample_rate: audio_decoder.decoder.rate(),
                channels: audio_decoder.decoder.channels(),
            };
        });

        let video = source.stream(video_index)?.clone();
        let audio = source.stream(audio_index)?.clone();
        debug!(url, video = %video.codec, audio = %audio.codec, "Opened with ffmpeg");

        Ok(OpenedMedia {
            source: Box::new(source),
            video,
            audio,
            video_decoder: Box::new(video_decoder),
            audio_decoder: Box::new(audio_decoder),
        })
    }
}

/// Demuxer over an FFmpeg input context
pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
}

// SAFETY: the input context is owned by one reader thread at a time and shares
// no state with the decoders, which hold their own codec contexts.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    /// Open a local file or network stream
    pub fn open(url: &str, network_timeout: Duration) -> std::result::Result<Self, OpenError> {
        let unreadable = |reason: String| OpenError::Unreadable {
            url: url.to_string(),
            reason,
        };
        init().map_err(unreadable)?;

        let input = if is_network(url) {
            let mut options = ffmpeg::Dictionary::new();
            options.set("rw_timeout", &network_timeout.as_micros().to_string());
            ffmpeg::format::input_with_dictionary(&url, options)
        } else {
            let path = local_path(url).ok_or_else(|| OpenError::UnsupportedUrl(url.to_string()))?;
            ffmpeg::format::input(&path)
        }
        .map_err(|e| unreadable(e.to_string()))?;

        let container_duration_us = input.duration();
        let streams: Vec<StreamInfo> = input
            .streams()
            .filter_map(|stream| {
                let info = stream_info(&stream, container_duration_us);
                if info.is_none() {
                    trace!(index = stream.index(), "Ignoring stream that is neither audio nor video");
                }
                info
            })
            .collect();
        let video_index = input.streams().best(Type::Video).map(|s| s.index());
        let audio_index = input.streams().best(Type::Audio).map(|s| s.index());

        debug!(
            url,
            format = input.format().name(),
            streams = streams.len(),
            ?video_index,
            ?audio_index,
            "Opened container"
        );

        Ok(Self {
            input,
            streams,
            video_index,
            audio_index,
        })
    }

    fn stream(&self, index: usize) -> std::result::Result<&StreamInfo, OpenError> {
        self.streams
            .iter()
            .find(|s| s.index == index)
            .ok_or(OpenError::MissingStream(if Some(index) == self.video_index {
                StreamKind::Video
            } else {
                StreamKind::Audio
            }))
    }

    fn update_params(&mut self, index: usize, update: impl FnOnce(&mut StreamParams)) {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.index == index) {
            update(&mut stream.params);
        }
    }

    /// Codec context for one of this source's streams
    fn codec_context(&self, index: usize) -> std::result::Result<ffmpeg::codec::Context, OpenError> {
        let info = self.stream(index)?;
        let stream = self.input.stream(index).ok_or(OpenError::MissingStream(info.kind))?;
        ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| unsupported(info, e))
    }
}

fn unsupported(stream: &StreamInfo, error: ffmpeg::Error) -> OpenError {
    debug!(codec = %stream.codec, %error, "No decoder");
    OpenError::UnsupportedCodec {
        kind: stream.kind,
        codec: stream.codec.clone(),
    }
}

/// Describe an audio or video stream; None for every other medium
fn stream_info(stream: &ffmpeg::format::stream::Stream, container_duration_us: i64) -> Option<StreamInfo> {
    let parameters = stream.parameters();
    let kind = match parameters.medium() {
        Type::Video => StreamKind::Video,
        Type::Audio => StreamKind::Audio,
        _ => return None,
    };

    let tb = stream.time_base();
    let time_base = TimeBase::new(tb.numerator().max(0) as u32, tb.denominator().max(0) as u32);
    let start_ts = match stream.start_time() {
        ts if ts == ffmpeg::ffi::AV_NOPTS_VALUE => 0,
        ts => ts,
    };
    let duration_ts = match stream.duration() {
        d if d > 0 => Some(d),
        _ if container_duration_us > 0 => Some(us_to_ticks(container_duration_us, time_base)),
        _ => None,
    };

    let params = match kind {
        StreamKind::Video => {
            let rate = stream.avg_frame_rate();
            StreamParams::Video {
                width: 0,
                height: 0,
                frame_rate: (rate.numerator() > 0 && rate.denominator() > 0)
                    .then(|| (rate.numerator() as u32, rate.denominator() as u32)),
            }
        }
        StreamKind::Audio => StreamParams::Audio {
            sample_rate: 0,
            channels: 0,
        },
    };

    Some(StreamInfo {
        index: stream.index(),
        kind,
        codec: parameters.id().name().to_string(),
        time_base,
        start_ts,
        duration_ts,
        params,
    })
}

fn us_to_ticks(us: i64, tb: TimeBase) -> i64 {
    let ticks = us as i128 * tb.den as i128 / (tb.num as i128 * 1_000_000);
    ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn ticks_to_us(ticks: i64, tb: TimeBase) -> i64 {
    let us = ticks as i128 * tb.num as i128 * 1_000_000 / tb.den as i128;
    us.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl MediaSource for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Packet {
                stream_index: packet.stream(),
                pts: packet.pts().or(packet.dts()).unwrap_or(0),
                duration: packet.duration(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(ffmpeg::Error::Eof) => Err(ReadError::EndOfStream),
            Err(e) => Err(ReadError::Transient(e.to_string())),
        }
    }

    fn seek(&mut self, stream_index: usize, target_ts: i64) -> Result<()> {
        let stream = self
            .streams
            .iter()
            .find(|s| s.index == stream_index)
            .ok_or_else(|| Error::Seek(format!("no stream with index {}", stream_index)))?;
        let target_us = ticks_to_us(target_ts, stream.time_base);

        // Lands on the last keyframe at or before the target
        self.input
            .seek(target_us, ..target_us)
            .map_err(|e| Error::Seek(e.to_string()))?;
        debug!(stream_index, target_ts, target_us, "Container seek");
        Ok(())
    }
}

fn to_av_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut av_packet = ffmpeg::Packet::copy(&packet.data);
    av_packet.set_pts(Some(packet.pts));
    av_packet.set_duration(packet.duration);
    av_packet
}

/// True once the decoder wants more input or has nothing left
fn drained(error: &ffmpeg::Error) -> bool {
    match error {
        ffmpeg::Error::Eof => true,
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::util::error::EAGAIN,
        _ => false,
    }
}

/// Swscale context converting one source format and size to RGBA
struct Scaler {
    context: scaling::Context,
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    fn new(frame: &ffmpeg::frame::Video) -> Result<Self> {
        let context = scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            Pixel::RGBA,
            frame.width(),
            frame.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::Decode(format!("cannot convert {:?} frames: {}", frame.format(), e)))?;
        Ok(Self {
            context,
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        })
    }

    fn fits(&self, frame: &ffmpeg::frame::Video) -> bool {
        self.format == frame.format() && self.width == frame.width() && self.height == frame.height()
    }

    /// Tightly packed RGBA rows
    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
        let mut rgba = ffmpeg::frame::Video::empty();
        self.context
            .run(frame, &mut rgba)
            .map_err(|e| Error::Decode(format!("pixel conversion failed: {}", e)))?;

        let row = self.width as usize * 4;
        let stride = rgba.stride(0);
        let mut pixels = Vec::with_capacity(row * self.height as usize);
        for line in rgba.data(0).chunks(stride).take(self.height as usize) {
            pixels.extend_from_slice(&line[..row.min(line.len())]);
        }
        Ok(pixels)
    }
}

/// Video decoder producing RGBA frames
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    scaler: Option<Scaler>,
}

// SAFETY: decoder and scaler contexts are owned exclusively by the video
// pipeline thread once handed over; nothing else holds their pointers.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn open(source: &FfmpegSource, index: usize) -> std::result::Result<Self, OpenError> {
        let info = source.stream(index)?;
        let decoder = source
            .codec_context(index)?
            .decoder()
            .video()
            .map_err(|e| unsupported(info, e))?;
        Ok(Self { decoder, scaler: None })
    }

    fn to_rgba(&mut self, frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
        let mut scaler = match self.scaler.take() {
            Some(scaler) if scaler.fits(frame) => scaler,
            _ => Scaler::new(frame)?,
        };
        let pixels = scaler.convert(frame);
        self.scaler = Some(scaler);
        pixels
    }
}

impl FrameDecoder<VideoFrame> for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        // An empty packet would put the decoder into draining mode
        if packet.data.is_empty() {
            return Ok(Vec::new());
        }
        self.decoder
            .send_packet(&to_av_packet(packet))
            .map_err(|e| Error::Decode(e.to_string()))?;

        let mut frames = Vec::new();
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let rgba = self.to_rgba(&decoded)?;
                    frames.push(VideoFrame {
                        width: decoded.width(),
                        height: decoded.height(),
                        rgba,
                        pts: decoded.timestamp().or(decoded.pts()).unwrap_or(packet.pts),
                        position_ms: 0,
                    });
                }
                Err(e) if drained(&e) => break,
                Err(e) => return Err(Error::Decode(e.to_string())),
            }
        }
        Ok(frames)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// Audio decoder producing interleaved f32 frames
pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
}

// SAFETY: the codec context is owned exclusively by the audio pipeline thread.
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn open(source: &FfmpegSource, index: usize) -> std::result::Result<Self, OpenError> {
        let info = source.stream(index)?;
        let decoder = source
            .codec_context(index)?
            .decoder()
            .audio()
            .map_err(|e| unsupported(info, e))?;
        Ok(Self { decoder })
    }
}

impl FrameDecoder<AudioFrame> for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>> {
        if packet.data.is_empty() {
            return Ok(Vec::new());
        }
        self.decoder
            .send_packet(&to_av_packet(packet))
            .map_err(|e| Error::Decode(e.to_string()))?;

        let mut frames = Vec::new();
        let mut decoded = ffmpeg::frame::Audio::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => frames.push(AudioFrame {
                    sample_rate: decoded.rate(),
                    channels: decoded.channels(),
                    samples: interleaved_f32(&decoded)?,
                    pts: decoded.timestamp().or(decoded.pts()).unwrap_or(packet.pts),
                }),
                Err(e) if drained(&e) => break,
                Err(e) => return Err(Error::Decode(e.to_string())),
            }
        }
        Ok(frames)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// Convert any packed or planar sample layout to interleaved f32
fn interleaved_f32(frame: &ffmpeg::frame::Audio) -> Result<Vec<f32>> {
    let format = frame.format();
    let channels = frame.channels() as usize;
    let count = frame.samples();
    let unsupported = || Error::Decode(format!("unsupported sample format {:?}", format));

    if !format.is_planar() {
        return samples_to_f32(frame.data(0), format, count * channels).ok_or_else(unsupported);
    }
    if channels > frame.planes() {
        return Err(unsupported());
    }

    let planes = (0..channels)
        .map(|c| samples_to_f32(frame.data(c), format, count).ok_or_else(unsupported))
        .collect::<Result<Vec<_>>>()?;
    let mut samples = Vec::with_capacity(count * channels);
    for i in 0..count {
        samples.extend(planes.iter().map(|plane| plane[i]));
    }
    Ok(samples)
}

/// First `count` samples of `data` as f32 in -1.0..1.0
fn samples_to_f32(data: &[u8], format: Sample, count: usize) -> Option<Vec<f32>> {
    let data = data.get(..count * format.bytes())?;
    let samples = match format {
        Sample::U8(_) => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        Sample::I16(_) => data
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        Sample::I32(_) => data
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        Sample::F32(_) => data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Sample::F64(_) => data
            .chunks_exact(8)
            .map(|b| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                f64::from_ne_bytes(bytes) as f32
            })
            .collect(),
        _ => return None,
    };
    Some(samples)
}
