//! Time-stretching without pitch change (WSOLA)
//!
//! Input is cut into overlapping sequences. Each new sequence is aligned to the
//! tail of the previous output by searching a small window for the offset with
//! the best cross-correlation, then cross-faded in. Skipping through the input
//! faster or slower than sequences are emitted changes tempo while every
//! sequence is played at its original rate, so pitch is unchanged.

use tracing::debug;

const SEQUENCE_MS: usize = 40;
const SEEK_WINDOW_MS: usize = 15;
const OVERLAP_MS: usize = 8;

/// Tempos this close to 1.0 bypass stretching entirely
const UNITY_EPSILON: f64 = 1e-6;

/// Streaming WSOLA time-stretcher over interleaved f32 samples
#[derive(Debug)]
pub struct TimeStretcher {
    channels: usize,
    /// Frame counts
    sequence: usize,
    seek_window: usize,
    overlap: usize,
    /// Pending interleaved input
    input: Vec<f32>,
    /// Tail of the last emitted sequence, cross-faded into the next one
    overlap_tail: Vec<f32>,
    /// Fractional input skip carried between sequences
    skip_carry: f64,
    primed: bool,
}

impl TimeStretcher {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let frames = |ms: usize| (sample_rate as usize * ms / 1000).max(1);
        let overlap = frames(OVERLAP_MS);
        Self {
            channels: channels.max(1) as usize,
            sequence: frames(SEQUENCE_MS).max(2 * overlap + 1),
            seek_window: frames(SEEK_WINDOW_MS),
            overlap,
            input: Vec::new(),
            overlap_tail: Vec::new(),
            skip_carry: 0.0,
            primed: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames buffered but not yet emitted
    pub fn pending_frames(&self) -> usize {
        (self.input.len() + self.overlap_tail.len()) / self.channels
    }

    /// Stretch `samples` by `tempo` (2.0 plays twice as fast)
    ///
    /// Output length is about `input / tempo`. At tempo 1.0 any pending state is
    /// flushed and the input passes through unchanged.
    pub fn process(&mut self, samples: &[f32], tempo: f64) -> Vec<f32> {
        if (tempo - 1.0).abs() < UNITY_EPSILON || !tempo.is_finite() || tempo <= 0.0 {
            let mut out = self.flush();
            out.extend_from_slice(samples);
            return out;
        }

        self.input.extend_from_slice(samples);
        let mut out = Vec::with_capacity((samples.len() as f64 / tempo) as usize + self.overlap * self.channels);
        let ch = self.channels;
        let nominal_skip = (self.sequence - self.overlap) as f64 * tempo;

        loop {
            let available = self.input.len() / ch;
            let needed = (self.seek_window + self.sequence).max(nominal_skip.ceil() as usize + 1);
            if available < needed {
                break;
            }

            let offset = if self.primed {
                self.best_offset()
            } else {
                self.overlap_tail = self.input[..self.overlap * ch].to_vec();
                self.primed = true;
                0
            };

            // Cross-fade the previous tail into the aligned sequence start
            let start = offset * ch;
            for i in 0..self.overlap {
                let fade_in = i as f32 / self.overlap as f32;
                let fade_out = 1.0 - fade_in;
                for c in 0..ch {
                    let prev = self.overlap_tail[i * ch + c];
                    let next = self.input[start + i * ch + c];
                    out.push(prev * fade_out + next * fade_in);
                }
            }

            // Body of the sequence
            let body_start = start + self.overlap * ch;
            let body_end = start + (self.sequence - self.overlap) * ch;
            out.extend_from_slice(&self.input[body_start..body_end]);

            // Keep the tail for the next cross-fade
            let tail_end = start + self.sequence * ch;
            self.overlap_tail.clear();
            self.overlap_tail.extend_from_slice(&self.input[body_end..tail_end]);

            // Advance through the input by the tempo-scaled skip
            let skip = nominal_skip + self.skip_carry;
            let whole = skip.floor() as usize;
            self.skip_carry = skip - whole as f64;
            self.input.drain(..whole.min(available) * ch);
        }

        out
    }

    /// Offset in [0, seek_window) whose overlap region best matches the tail
    fn best_offset(&self) -> usize {
        let ch = self.channels;
        let overlap = self.overlap;

        // Compare channel sums to keep the search cost independent of channel count
        let mix = |buf: &[f32], frame: usize| -> f32 { buf[frame * ch..(frame + 1) * ch].iter().sum() };
        let tail: Vec<f32> = (0..overlap).map(|i| mix(&self.overlap_tail, i)).collect();
        let candidate: Vec<f32> = (0..self.seek_window + overlap).map(|i| mix(&self.input, i)).collect();

        let mut best = 0;
        let mut best_score = f32::MIN;
        for offset in 0..self.seek_window {
            let window = &candidate[offset..offset + overlap];
            let mut dot = 0.0f32;
            let mut energy = 0.0f32;
            for (a, b) in tail.iter().zip(window) {
                dot += a * b;
                energy += b * b;
            }
            let score = dot / (energy + 1e-9).sqrt();
            if score > best_score {
                best_score = score;
                best = offset;
            }
        }
        best
    }

    /// Emit everything buffered and return to the unprimed state
    pub fn flush(&mut self) -> Vec<f32> {
        if !self.primed && self.input.is_empty() {
            return Vec::new();
        }
        let mut out = std::mem::take(&mut self.overlap_tail);
        out.append(&mut self.input);
        debug!(frames = out.len() / self.channels, "Flushed time-stretcher");
        self.reset();
        out
    }

    /// Discard buffered state
    pub fn reset(&mut self) {
        self.input.clear();
        self.overlap_tail.clear();
        self.skip_carry = 0.0;
        self.primed = false;
    }
}
