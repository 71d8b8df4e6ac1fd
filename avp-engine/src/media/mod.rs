//! Media collaborator contracts
//!
//! The engine never talks to a container format or codec directly. A
//! [`MediaBackend`] turns a url into an [`OpenedMedia`]: one demuxing
//! [`MediaSource`] plus a decoder per stream. The reader thread owns the
//! source, each pipeline thread owns its decoder.

mod types;

pub use types::{AudioFrame, Packet, StreamInfo, StreamKind, StreamParams, VideoFrame};

use crate::error::{OpenError, ReadError, Result};
use std::sync::Arc;
use tracing::debug;

/// Demultiplexer for one opened container
pub trait MediaSource: Send {
    /// Streams exposed by the container
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet in container order
    ///
    /// Returns `ReadError::EndOfStream` once the container is exhausted.
    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError>;

    /// Reposition so the next packets start at or before `target_ts`
    /// (expressed in the time-base of `stream_index`)
    fn seek(&mut self, stream_index: usize, target_ts: i64) -> Result<()>;
}

/// Decoder turning packets of one stream into frames
pub trait FrameDecoder<F>: Send {
    /// Decode one packet into zero or more frames, in presentation order
    fn decode(&mut self, packet: &Packet) -> Result<Vec<F>>;

    /// Discard any internally buffered state (called after a seek)
    fn flush(&mut self);
}

pub type VideoDecoder = Box<dyn FrameDecoder<VideoFrame>>;
pub type AudioDecoder = Box<dyn FrameDecoder<AudioFrame>>;

/// Everything produced by a successful open
pub struct OpenedMedia {
    pub source: Box<dyn MediaSource>,
    pub video: StreamInfo,
    pub audio: StreamInfo,
    pub video_decoder: VideoDecoder,
    pub audio_decoder: AudioDecoder,
}

impl OpenedMedia {
    /// Total playback duration: the video stream's, else the audio stream's
    pub fn total_ms(&self) -> i64 {
        match self.video.duration_ms() {
            0 => self.audio.duration_ms(),
            ms => ms,
        }
    }
}

impl std::fmt::Debug for OpenedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMedia")
            .field("video", &self.video)
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}

/// Factory opening urls of the schemes/paths it recognizes
pub trait MediaBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// True if this backend should handle `url`
    fn accepts(&self, url: &str) -> bool;

    /// Open `url`, initializing the source and both decoders
    fn open(&self, url: &str) -> std::result::Result<OpenedMedia, OpenError>;
}

/// Ordered list of backends; the first one accepting a url opens it
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn MediaBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends: synthetic, then ffmpeg when enabled
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::backend::SyntheticBackend));
        #[cfg(feature = "ffmpeg")]
        registry.register(Arc::new(crate::backend::FfmpegBackend::new()));
        registry
    }

    /// Append a backend (lower priority than those already registered)
    pub fn register(&mut self, backend: Arc<dyn MediaBackend>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Open `url` with the first accepting backend
    pub fn open(&self, url: &str) -> std::result::Result<OpenedMedia, OpenError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(OpenError::InvalidUrl {
                url: url.to_string(),
                reason: "empty url".to_string(),
            });
        }

        let backend = self
            .backends
            .iter()
            .find(|b| b.accepts(trimmed))
            .ok_or_else(|| OpenError::UnsupportedUrl(trimmed.to_string()))?;

        debug!(backend = backend.name(), url = trimmed, "Opening media");
        backend.open(trimmed)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendRegistry").field("backends", &names).finish()
    }
}
