//! Core media data types
//!
//! Stream descriptors, compressed packets and decoded frames passed between the
//! reader, the decode pipelines and the sinks.

use avp_common::TimeBase;
use serde::{Deserialize, Serialize};

/// Kind of elementary stream the player consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Kind-specific stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StreamParams {
    Video {
        width: u32,
        height: u32,
        /// Frames per second as `num / den`, when the container declares it
        frame_rate: Option<(u32, u32)>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
}

/// Descriptor of one stream in an opened source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Index used to tag packets of this stream
    pub index: usize,
    pub kind: StreamKind,
    /// Codec name for logging and error messages
    pub codec: String,
    pub time_base: TimeBase,
    /// Timestamp of the first packet, in stream ticks
    pub start_ts: i64,
    /// Stream duration in ticks, when known
    pub duration_ts: Option<i64>,
    pub params: StreamParams,
}

impl StreamInfo {
    /// Convert a stream timestamp to milliseconds
    pub fn ts_to_ms(&self, ts: i64) -> i64 {
        self.time_base.ticks_to_ms(ts)
    }

    /// Convert milliseconds to a stream timestamp
    pub fn ms_to_ts(&self, ms: i64) -> i64 {
        self.time_base.ms_to_ticks(ms)
    }

    /// Stream start in milliseconds
    pub fn start_ms(&self) -> i64 {
        self.ts_to_ms(self.start_ts)
    }

    /// Total duration in milliseconds (0 when unknown)
    pub fn duration_ms(&self) -> i64 {
        self.duration_ts.map(|d| self.ts_to_ms(d)).unwrap_or(0)
    }

    /// Position of `ts` on the playback timeline (relative to stream start)
    pub fn position_ms(&self, ts: i64) -> i64 {
        self.ts_to_ms(ts) - self.start_ms()
    }

    /// Nominal frame interval in milliseconds for video streams
    pub fn frame_interval_ms(&self) -> Option<f64> {
        match self.params {
            StreamParams::Video {
                frame_rate: Some((num, den)),
                ..
            } if num > 0 && den > 0 => Some(1000.0 * den as f64 / num as f64),
            _ => None,
        }
    }
}

/// One unit of compressed data demultiplexed from the container
///
/// Ownership moves from the reader into a channel and from the channel into the
/// decode thread, which drops it after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in stream ticks
    pub pts: i64,
    /// Duration in stream ticks (0 when unknown)
    pub duration: i64,
    pub data: Vec<u8>,
}

/// Decoded video frame, RGBA8 pixels
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, `width * height * 4` bytes
    pub rgba: Vec<u8>,
    /// Presentation timestamp in stream ticks
    pub pts: i64,
    /// Position on the playback timeline; filled in by the video pipeline
    pub position_ms: i64,
}

/// Decoded audio frame, interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Presentation timestamp in stream ticks
    pub pts: i64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream() -> StreamInfo {
        StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            codec: "test".to_string(),
            time_base: TimeBase::MPEG,
            start_ts: 9_000,
            duration_ts: Some(900_000),
            params: StreamParams::Video {
                width: 320,
                height: 180,
                frame_rate: Some((25, 1)),
            },
        }
    }

    #[test]
    fn test_stream_timing() {
        let stream = video_stream();
        assert_eq!(stream.start_ms(), 100);
        assert_eq!(stream.duration_ms(), 10_000);
        assert_eq!(stream.position_ms(9_000), 0);
        assert_eq!(stream.position_ms(99_000), 1000);
        assert_eq!(stream.frame_interval_ms(), Some(40.0));
    }

    #[test]
    fn test_unknown_duration_is_zero() {
        let mut stream = video_stream();
        stream.duration_ts = None;
        assert_eq!(stream.duration_ms(), 0);
    }

    #[test]
    fn test_audio_frame_counts() {
        let frame = AudioFrame {
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 960 * 2],
            pts: 0,
        };
        assert_eq!(frame.frame_count(), 960);
        assert!((frame.duration_ms() - 20.0).abs() < f64::EPSILON);
    }
}
