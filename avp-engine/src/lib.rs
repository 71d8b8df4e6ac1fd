//! # AVP Engine
//!
//! Audio/video playback engine: a reader thread demultiplexes a source into
//! two bounded packet channels, a video and an audio pipeline decode and pace
//! frames against a shared virtual clock, and the [`PlayerController`] drives
//! the Idle/Ready/Playing/Paused/Seeking state machine.
//!
//! ```no_run
//! use avp_engine::{PlayerConfig, PlayerController};
//! use avp_engine::audio::NullAudioSink;
//! use avp_engine::media::BackendRegistry;
//!
//! # fn main() -> avp_engine::Result<()> {
//! let mut player = PlayerController::new(
//!     PlayerConfig::default(),
//!     BackendRegistry::with_defaults(),
//!     Box::new(NullAudioSink::new(48_000, 2)),
//! );
//! player.open("synth://demo?duration_ms=5000")?;
//! player.play()?;
//! let (current_ms, total_ms) = player.current_position();
//! assert!(current_ms <= total_ms);
//! player.close()?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod media;
pub mod playback;
pub mod render;

pub use avp_common::events::{PlaybackState, PlayerEvent};
pub use config::PlayerConfig;
pub use error::{Error, OpenError, ReadError, Result};
pub use playback::PlayerController;
