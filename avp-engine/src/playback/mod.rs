//! Playback engine
//!
//! A reader thread feeds two bounded packet channels; the video and audio
//! pipelines drain them and pace decoded frames against a shared virtual
//! clock. [`PlayerController`] owns one such set of threads per Open–Close
//! session.

pub mod audio;
pub mod channel;
pub mod clock;
pub mod context;
pub mod controller;
pub mod reader;
pub mod video;

pub use controller::PlayerController;
