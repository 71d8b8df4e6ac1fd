//! Sinks that record what the engine delivers

use avp_engine::audio::AudioSink;
use avp_engine::media::VideoFrame;
use avp_engine::render::RenderSink;
use std::sync::{Arc, Mutex};

/// Audio sink recording every sample written to it
#[derive(Clone)]
pub struct AudioCapture {
    samples: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            sample_rate,
            channels,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Captured audio length in milliseconds
    pub fn duration_ms(&self) -> i64 {
        let frames = self.sample_count() / self.channels as usize;
        (frames as i64 * 1000) / self.sample_rate as i64
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl AudioSink for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        self.samples.lock().unwrap().extend_from_slice(samples);
        samples.len()
    }
}

/// Render sink recording presented frame positions, the delivering thread and
/// each frame's top-left RGBA pixel
#[derive(Default)]
pub struct FrameCapture {
    pub positions: Vec<i64>,
    pub threads: Vec<std::thread::ThreadId>,
    pub first_pixels: Vec<[u8; 4]>,
}

impl RenderSink for FrameCapture {
    fn on_frame(&mut self, frame: VideoFrame) {
        self.positions.push(frame.position_ms);
        self.threads.push(std::thread::current().id());
        let mut pixel = [0u8; 4];
        if let Some(bytes) = frame.rgba.get(..4) {
            pixel.copy_from_slice(bytes);
        }
        self.first_pixels.push(pixel);
    }
}
