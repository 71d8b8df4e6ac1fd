//! Audio sink contract and a discarding sink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Destination for processed audio samples
pub trait AudioSink: Send {
    /// Sample rate the sink expects
    fn sample_rate(&self) -> u32;

    /// Interleaved channel count the sink expects
    fn channels(&self) -> u16;

    /// Accept as many interleaved samples as currently fit
    ///
    /// Returns the number of samples taken; the caller retries the rest.
    fn write(&mut self, samples: &[f32]) -> usize;
}

/// Sink that accepts and drops everything (headless playback)
#[derive(Debug, Clone)]
pub struct NullAudioSink {
    sample_rate: u32,
    channels: u16,
    written: Arc<AtomicU64>,
}

impl NullAudioSink {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total samples written, shared between clones
    pub fn samples_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

impl AudioSink for NullAudioSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        self.written.fetch_add(samples.len() as u64, Ordering::Relaxed);
        samples.len()
    }
}
