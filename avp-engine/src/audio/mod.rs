//! Audio stage: tempo/resample processing and output sinks

pub mod output;
pub mod resampler;
pub mod sink;
pub mod tempo;

pub use output::{AudioOutput, CpalAudioSink};
pub use resampler::{SampleProcessor, TempoResampler};
pub use sink::{AudioSink, NullAudioSink};
pub use tempo::TimeStretcher;
