//! Player configuration
//!
//! Every field has a compiled default, so a config file only needs to name the
//! values it changes. See [`avp_common::config`] for file discovery.

use crate::error::{Error, Result};
use avp_common::config::{load_toml, resolve_config_path, CONFIG_ENV_VAR};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Highest accepted speed tempo
const MAX_SPEED_TEMPO: f64 = 8.0;

/// Engine tuning values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Packet slots in the video channel
    pub video_channel_capacity: usize,
    /// Packet slots in the audio channel
    pub audio_channel_capacity: usize,
    /// Decoded frames buffered between the video pipeline and the render thread
    pub frame_handoff_capacity: usize,
    /// Events buffered per subscriber
    pub event_capacity: usize,
    /// Reader backoff on a full channel (microseconds)
    pub reader_backoff_us: u64,
    /// Reader backoff after a transient read failure
    pub read_retry_backoff_ms: u64,
    /// Pipeline backoff on an empty channel
    pub decode_backoff_ms: u64,
    /// Longest single sleep while pacing a frame
    pub pacing_sleep_ms: u64,
    /// Audio tempo while speed is enabled
    pub speed_tempo: f64,
    /// How long SeekTo waits for the reader to service a seek
    pub seek_timeout_ms: u64,
    /// Device ring size for the cpal sink
    pub audio_output_buffer_ms: u64,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
    /// Worker thread stack size in KiB (None = platform default)
    pub worker_stack_kb: Option<usize>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_channel_capacity: 128,
            audio_channel_capacity: 1024,
            frame_handoff_capacity: 8,
            event_capacity: 100,
            reader_backoff_us: 3,
            read_retry_backoff_ms: 1,
            decode_backoff_ms: 1,
            pacing_sleep_ms: 2,
            speed_tempo: 2.0,
            seek_timeout_ms: 1000,
            audio_output_buffer_ms: 200,
            output_device: None,
            worker_stack_kb: None,
        }
    }
}

impl PlayerConfig {
    /// Load configuration
    ///
    /// Priority: `cli_path` → `AVP_CONFIG` → platform config dir → defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config = match resolve_config_path(cli_path, CONFIG_ENV_VAR)? {
            Some(path) => {
                info!("Loading config from {}", path.display());
                load_toml::<PlayerConfig>(&path)?
            }
            None => {
                info!("No config file found, using defaults");
                PlayerConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("video_channel_capacity", self.video_channel_capacity),
            ("audio_channel_capacity", self.audio_channel_capacity),
            ("frame_handoff_capacity", self.frame_handoff_capacity),
            ("event_capacity", self.event_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if !(self.speed_tempo > 0.0 && self.speed_tempo <= MAX_SPEED_TEMPO) {
            return Err(Error::Config(format!(
                "speed_tempo must be in (0, {}], got {}",
                MAX_SPEED_TEMPO, self.speed_tempo
            )));
        }
        Ok(())
    }
}
