//! # AVP Common Library
//!
//! Shared code for the AVP player crates:
//! - Event types (PlayerEvent) and the EventBus
//! - Playback state enumeration
//! - Stream time-base arithmetic and position formatting
//! - Configuration file discovery

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::TimeBase;
