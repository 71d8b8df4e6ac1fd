//! Tempo and sample-rate conversion stage
//!
//! Decoded frames are mapped to the sink's channel layout, time-stretched by
//! the requested tempo, then resampled to the sink rate with rubato.

use super::tempo::TimeStretcher;
use crate::error::{Error, Result};
use crate::media::AudioFrame;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per rubato processing chunk
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Turns decoded audio frames into samples ready for the sink
pub trait SampleProcessor: Send {
    /// Convert one frame, applying `tempo` (1.0 = unchanged)
    ///
    /// Returns interleaved samples in the sink's rate and channel layout. The
    /// output may be shorter or longer than the input, or empty while state is
    /// buffered internally.
    fn process(&mut self, frame: &AudioFrame, tempo: f64) -> Result<Vec<f32>>;

    /// Drop buffered state (after a seek)
    fn reset(&mut self);
}

/// Channel mapping, WSOLA tempo and rubato resampling
pub struct TempoResampler {
    target_rate: u32,
    target_channels: u16,
    stretcher: Option<(u32, TimeStretcher)>,
    resampler: Option<(u32, FastFixedIn<f32>)>,
    /// Planar samples waiting for a full resampler chunk
    pending: Vec<Vec<f32>>,
}

impl TempoResampler {
    pub fn new(target_rate: u32, target_channels: u16) -> Self {
        let target_channels = target_channels.max(1);
        Self {
            target_rate,
            target_channels,
            stretcher: None,
            resampler: None,
            pending: vec![Vec::new(); target_channels as usize],
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn target_channels(&self) -> u16 {
        self.target_channels
    }

    fn stretcher_for(&mut self, rate: u32) -> &mut TimeStretcher {
        let channels = self.target_channels;
        if !matches!(&self.stretcher, Some((r, _)) if *r == rate) {
            debug!(rate, channels, "Creating time-stretcher");
            self.stretcher = None;
        }
        let (_, stretcher) = self
            .stretcher
            .get_or_insert_with(|| (rate, TimeStretcher::new(rate, channels)));
        stretcher
    }

    fn resample(&mut self, samples: &[f32], from_rate: u32) -> Result<Vec<f32>> {
        if !matches!(&self.resampler, Some((r, _)) if *r == from_rate) {
            debug!(
                "Resampling from {}Hz to {}Hz ({} channels)",
                from_rate, self.target_rate, self.target_channels
            );
            let resampler = FastFixedIn::<f32>::new(
                self.target_rate as f64 / from_rate as f64,
                1.0,
                PolynomialDegree::Septic,
                RESAMPLE_CHUNK_FRAMES,
                self.target_channels as usize,
            )
            .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;
            self.resampler = Some((from_rate, resampler));
            for channel in &mut self.pending {
                channel.clear();
            }
        }

        let channels = self.target_channels as usize;
        for frame in samples.chunks_exact(channels) {
            for (planar, sample) in self.pending.iter_mut().zip(frame) {
                planar.push(*sample);
            }
        }

        let Some((_, resampler)) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|planar| planar.drain(..needed).collect())
                .collect();
            let planar_out = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;
            out.extend(interleave(planar_out));
        }
        Ok(out)
    }
}

impl SampleProcessor for TempoResampler {
    fn process(&mut self, frame: &AudioFrame, tempo: f64) -> Result<Vec<f32>> {
        if frame.samples.is_empty() || frame.sample_rate == 0 {
            return Ok(Vec::new());
        }

        let mapped = map_channels(&frame.samples, frame.channels, self.target_channels);
        let stretched = self.stretcher_for(frame.sample_rate).process(&mapped, tempo);

        if frame.sample_rate == self.target_rate {
            Ok(stretched)
        } else {
            self.resample(&stretched, frame.sample_rate)
        }
    }

    fn reset(&mut self) {
        if let Some((_, stretcher)) = self.stretcher.as_mut() {
            stretcher.reset();
        }
        if let Some((_, resampler)) = self.resampler.as_mut() {
            resampler.reset();
        }
        for channel in &mut self.pending {
            channel.clear();
        }
    }
}

/// Remap interleaved samples from `from` channels to `to` channels
///
/// Mono is copied to every output channel; otherwise output channel `c` takes
/// input channel `c % from`, so surplus input channels are dropped.
pub fn map_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        for c in 0..to {
            out.push(frame[c % from]);
        }
    }
    out
}

/// Convert planar samples to interleaved format.
///
/// Input:  [[L, L, L, ...], [R, R, R, ...]]
/// Output: [L, R, L, R, L, R, ...]
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut interleaved = Vec::with_capacity(frames * planar.len());
    for frame_idx in 0..frames {
        for channel in &planar {
            interleaved.push(channel[frame_idx]);
        }
    }
    interleaved
}
