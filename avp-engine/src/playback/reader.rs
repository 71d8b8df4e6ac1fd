//! Reader thread
//!
//! Pulls packets from the source and routes them into the video and audio
//! channels. A full channel is retried with a short backoff and the packet is
//! never dropped, which is how decoder slowness slows the demuxer down. The
//! reader is also the only thread that executes seeks.

use super::channel::ChannelSender;
use super::context::PlaybackContext;
use crate::error::ReadError;
use crate::media::{MediaSource, Packet, StreamInfo, StreamKind};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Everything the reader thread owns; handed back when the thread exits
pub struct ReaderTask {
    pub source: Box<dyn MediaSource>,
    pub video: StreamInfo,
    pub audio: StreamInfo,
    pub video_tx: ChannelSender<Packet>,
    pub audio_tx: ChannelSender<Packet>,
}

impl ReaderTask {
    fn route(&self, packet: &Packet) -> Option<StreamKind> {
        if packet.stream_index == self.video.index {
            Some(StreamKind::Video)
        } else if packet.stream_index == self.audio.index {
            Some(StreamKind::Audio)
        } else {
            None
        }
    }

    fn sender(&mut self, kind: StreamKind) -> &mut ChannelSender<Packet> {
        match kind {
            StreamKind::Video => &mut self.video_tx,
            StreamKind::Audio => &mut self.audio_tx,
        }
    }

    /// Execute a pending seek, if any
    ///
    /// Returns true when a seek was serviced (successfully or not), in which
    /// case any packet the caller holds is stale.
    fn service_seek(&mut self, ctx: &PlaybackContext) -> bool {
        let Some(target_ms) = ctx.seek.pending() else {
            return false;
        };

        let dropped = self.video_tx.drain() + self.audio_tx.drain();
        let target_ts = self.audio.start_ts + self.audio.ms_to_ts(target_ms);

        match self.source.seek(self.audio.index, target_ts) {
            Ok(()) => {
                ctx.clock.seek_to(target_ms);
                ctx.reset_end_of_stream();
                ctx.seek.set_landed(Some(target_ms));
                debug!(target_ms, target_ts, dropped, "Seek complete");
            }
            Err(e) => {
                ctx.seek.set_landed(None);
                error!(target_ms, error = %e, "Seek failed, keeping current position");
            }
        }

        ctx.seek.complete();
        ctx.pause.notify_all();
        true
    }
}

/// Start the reader thread
pub fn spawn(task: ReaderTask, ctx: Arc<PlaybackContext>) -> io::Result<JoinHandle<ReaderTask>> {
    ctx.tuning
        .thread_builder("avp-reader")
        .spawn(move || run(task, &ctx))
}

fn run(mut task: ReaderTask, ctx: &PlaybackContext) -> ReaderTask {
    info!(session_id = %ctx.session_id, "Reader started");
    let mut packets: u64 = 0;

    'read: while !ctx.is_cancelled() {
        if task.service_seek(ctx) {
            continue;
        }

        let mut packet = match task.source.read_packet() {
            Ok(packet) => packet,
            Err(ReadError::EndOfStream) => {
                info!(packets, "Reader reached end of stream");
                ctx.mark_reader_eof();
                break;
            }
            Err(ReadError::Transient(message)) => {
                warn!(error = %message, "Read failed, retrying");
                thread::sleep(ctx.tuning.read_retry_backoff);
                continue;
            }
        };

        let Some(kind) = task.route(&packet) else {
            trace!(stream = packet.stream_index, "Skipping packet from unused stream");
            continue;
        };

        loop {
            if ctx.is_cancelled() {
                break 'read;
            }
            if task.service_seek(ctx) {
                continue 'read;
            }
            match task.sender(kind).push(packet) {
                Ok(()) => {
                    packets += 1;
                    break;
                }
                Err(rejected) => {
                    packet = rejected;
                    thread::sleep(ctx.tuning.reader_backoff);
                }
            }
        }
    }

    info!(packets, "Reader stopped");
    task
}
