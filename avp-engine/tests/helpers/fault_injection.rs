//! Fault-injecting media backend
//!
//! `faulty://<query>` opens the same media as `synth://<query>` and then
//! applies the configured [`FaultPlan`] to its source.

use avp_engine::backend::SyntheticBackend;
use avp_engine::error::{Error, OpenError, ReadError, Result};
use avp_engine::media::{MediaBackend, MediaSource, OpenedMedia, Packet, StreamInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SCHEME: &str = "faulty://";

/// Which failures to inject
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultPlan {
    /// Every nth read fails transiently before succeeding on retry
    pub transient_read_every: Option<u64>,
    /// Every nth video packet is garbage
    pub corrupt_video_every: Option<u64>,
    /// Every nth read returns a packet from a stream the player never selected
    pub foreign_packet_every: Option<u64>,
    /// Every seek fails
    pub fail_seeks: bool,
}

/// How many faults were actually injected
#[derive(Debug, Clone, Default)]
pub struct FaultCounters {
    pub transient_reads: Arc<AtomicU64>,
    pub corrupt_packets: Arc<AtomicU64>,
    pub failed_seeks: Arc<AtomicU64>,
    pub foreign_packets: Arc<AtomicU64>,
}

impl FaultCounters {
    pub fn transient_reads(&self) -> u64 {
        self.transient_reads.load(Ordering::SeqCst)
    }

    pub fn corrupt_packets(&self) -> u64 {
        self.corrupt_packets.load(Ordering::SeqCst)
    }

    pub fn failed_seeks(&self) -> u64 {
        self.failed_seeks.load(Ordering::SeqCst)
    }

    pub fn foreign_packets(&self) -> u64 {
        self.foreign_packets.load(Ordering::SeqCst)
    }
}

pub struct FaultyBackend {
    plan: FaultPlan,
    counters: FaultCounters,
}

impl FaultyBackend {
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            counters: FaultCounters::default(),
        }
    }

    pub fn counters(&self) -> FaultCounters {
        self.counters.clone()
    }
}

impl MediaBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with(SCHEME)
    }

    fn open(&self, url: &str) -> std::result::Result<OpenedMedia, OpenError> {
        let synth_url = format!("synth://{}", &url[SCHEME.len()..]);
        let media = SyntheticBackend.open(&synth_url)?;
        Ok(OpenedMedia {
            source: Box::new(FaultySource {
                inner: media.source,
                video_index: media.video.index,
                plan: self.plan,
                counters: self.counters.clone(),
                reads: 0,
                video_packets: 0,
            }),
            video: media.video,
            audio: media.audio,
            video_decoder: media.video_decoder,
            audio_decoder: media.audio_decoder,
        })
    }
}

struct FaultySource {
    inner: Box<dyn MediaSource>,
    video_index: usize,
    plan: FaultPlan,
    counters: FaultCounters,
    reads: u64,
    video_packets: u64,
}

impl MediaSource for FaultySource {
    fn streams(&self) -> &[StreamInfo] {
        self.inner.streams()
    }

    fn read_packet(&mut self) -> std::result::Result<Packet, ReadError> {
        self.reads += 1;
        if let Some(n) = self.plan.transient_read_every {
            if self.reads % n == 0 {
                self.counters.transient_reads.fetch_add(1, Ordering::SeqCst);
                return Err(ReadError::Transient("injected read failure".to_string()));
            }
        }

        if let Some(n) = self.plan.foreign_packet_every {
            if self.reads % n == 0 {
                self.counters.foreign_packets.fetch_add(1, Ordering::SeqCst);
                // Decodable by either pipeline, so a leak would be visible
                return Ok(Packet {
                    stream_index: self.inner.streams().len(),
                    pts: 0,
                    duration: 0,
                    data: 0u64.to_le_bytes().to_vec(),
                });
            }
        }

        let mut packet = self.inner.read_packet()?;
        if packet.stream_index == self.video_index {
            self.video_packets += 1;
            if let Some(n) = self.plan.corrupt_video_every {
                if self.video_packets % n == 0 {
                    self.counters.corrupt_packets.fetch_add(1, Ordering::SeqCst);
                    packet.data = vec![0xba, 0xad];
                }
            }
        }
        Ok(packet)
    }

    fn seek(&mut self, stream_index: usize, target_ts: i64) -> Result<()> {
        if self.plan.fail_seeks {
            self.counters.failed_seeks.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Seek("injected seek failure".to_string()));
        }
        self.inner.seek(stream_index, target_ts)
    }
}

