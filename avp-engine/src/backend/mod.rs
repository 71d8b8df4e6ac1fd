//! Built-in media backends

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegAudioDecoder, FfmpegBackend, FfmpegSource, FfmpegVideoDecoder};
pub use synthetic::{SyntheticBackend, SyntheticParams, SyntheticSource};
