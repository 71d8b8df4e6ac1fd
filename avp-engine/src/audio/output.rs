//! Audio output using cpal
//!
//! The audio pipeline writes into the producer half of a lock-free `ringbuf`
//! ring ([`CpalAudioSink`]); the cpal callback drains the consumer half on the
//! device thread. The cpal `Stream` is not `Send`, so [`AudioOutput`] stays on
//! the thread that opened it while the sink moves into the audio pipeline.

use super::sink::AudioSink;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Preferred device rate
const PREFERRED_SAMPLE_RATE: u32 = 48_000;

/// Smallest ring, in samples
const MIN_RING_SAMPLES: usize = 4096;

/// Running cpal output stream
pub struct AudioOutput {
    stream: Stream,
    device_name: String,
    config: StreamConfig,
    underruns: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device and start its stream
    ///
    /// `device_name` of None selects the default device; an unknown name falls
    /// back to the default. `buffer_ms` sizes the ring between the audio
    /// pipeline and the device callback.
    pub fn open(device_name: Option<&str>, buffer_ms: u64) -> Result<(Self, CpalAudioSink)> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = Self::get_best_config(&device)?;
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let capacity = ring_capacity(sample_rate, channels, buffer_ms);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let underruns = Arc::new(AtomicU64::new(0));
        let overruns = Arc::new(AtomicU64::new(0));

        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}, ring={} samples",
            sample_rate, channels, sample_format, capacity
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream(&device, &config, consumer, Arc::clone(&underruns), |s| s)?,
            SampleFormat::I16 => build_stream(&device, &config, consumer, Arc::clone(&underruns), f32_to_i16)?,
            SampleFormat::U16 => build_stream(&device, &config, consumer, Arc::clone(&underruns), f32_to_u16)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        info!(device = %device_name, sample_rate, channels, "Audio stream started");

        let sink = CpalAudioSink {
            producer,
            sample_rate,
            channels,
            overruns: Arc::clone(&overruns),
        };
        let output = Self {
            stream,
            device_name,
            config,
            underruns,
            overruns,
        };
        Ok((output, sink))
    }

    /// Get the best supported configuration for playback.
    ///
    /// Prefers 48kHz stereo f32, otherwise the device default.
    fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported_configs = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let preferred = supported_configs.find(|config| {
            config.channels() == 2
                && config.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
                && config.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
                && config.sample_format() == SampleFormat::F32
        });

        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
                .config();
            return Ok((config, sample_format));
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported_config.sample_format();
        Ok((supported_config.config(), sample_format))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Callbacks that found the ring short of samples
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Writes that found the ring full
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn stop(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to stop stream: {}", e)))
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn build_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    underruns: Arc<AtomicU64>,
    convert: F,
) -> Result<Stream>
where
    T: cpal::SizedSample + Default,
    F: Fn(f32) -> T + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut short = false;
                for out in data.iter_mut() {
                    *out = match consumer.try_pop() {
                        Some(sample) => convert(sample.clamp(-1.0, 1.0)),
                        None => {
                            short = true;
                            convert(0.0)
                        }
                    };
                }
                if short {
                    let count = underruns.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 1000 == 0 {
                        trace!("Audio output underrun (total: {})", count);
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Ring size in samples for `buffer_ms` of audio
fn ring_capacity(sample_rate: u32, channels: u16, buffer_ms: u64) -> usize {
    let samples = sample_rate as u64 * channels as u64 * buffer_ms / 1000;
    (samples as usize).max(MIN_RING_SAMPLES)
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32) as i16
}

fn f32_to_u16(sample: f32) -> u16 {
    ((sample + 1.0) * 0.5 * u16::MAX as f32) as u16
}

/// Producer side of the device ring
pub struct CpalAudioSink {
    producer: HeapProd<f32>,
    sample_rate: u32,
    channels: u16,
    overruns: Arc<AtomicU64>,
}

impl AudioSink for CpalAudioSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                warn!("Audio output ring overrun (total: {})", count);
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // Requires audio hardware; only verify it doesn't panic
        let result = AudioOutput::list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_ring_capacity() {
        assert_eq!(ring_capacity(48_000, 2, 200), 19_200);
        assert_eq!(ring_capacity(8_000, 1, 10), MIN_RING_SAMPLES);
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
        assert_eq!(f32_to_u16(-1.0), 0);
        assert_eq!(f32_to_u16(1.0), u16::MAX);
    }

    #[test]
    fn test_sink_reports_partial_write() {
        let (producer, mut consumer) = HeapRb::<f32>::new(4).split();
        let mut sink = CpalAudioSink {
            producer,
            sample_rate: 48_000,
            channels: 2,
            overruns: Arc::new(AtomicU64::new(0)),
        };

        assert_eq!(sink.write(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]), 4);
        assert_eq!(sink.overruns.load(Ordering::Relaxed), 1);
        assert_eq!(consumer.try_pop(), Some(0.1));
        assert_eq!(sink.write(&[0.7]), 1);
    }
}
