//! Video pipeline thread
//!
//! Decodes video packets, holds each frame until the virtual clock reaches its
//! presentation time, then posts it to the render hand-off.

use super::channel::ChannelReceiver;
use super::context::{PlaybackContext, Wait};
use crate::media::{Packet, StreamInfo, StreamKind, VideoDecoder, VideoFrame};
use crate::render::FrameSender;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Everything the video thread owns; handed back when the thread exits
pub struct VideoTask {
    pub rx: ChannelReceiver<Packet>,
    pub decoder: VideoDecoder,
    pub stream: StreamInfo,
    pub frames: FrameSender,
}

/// Start the video pipeline thread
pub fn spawn(task: VideoTask, ctx: Arc<PlaybackContext>) -> io::Result<JoinHandle<VideoTask>> {
    ctx.tuning
        .thread_builder("avp-video")
        .spawn(move || run(task, &ctx))
}

fn run(mut task: VideoTask, ctx: &PlaybackContext) -> VideoTask {
    info!(session_id = %ctx.session_id, codec = %task.stream.codec, "Video pipeline started");
    let mut generation = ctx.seek.generation();
    let mut presented: u64 = 0;
    // Frames decoded from the keyframe before a seek target, not yet shown
    let mut preroll_until: Option<i64> = None;

    while !ctx.is_cancelled() {
        if ctx.seek.is_pending() {
            task.decoder.flush();
            thread::sleep(ctx.tuning.decode_backoff);
            continue;
        }

        let current = ctx.seek.generation();
        if current != generation {
            generation = current;
            task.decoder.flush();
            let stale = task.frames.discard_pending();
            preroll_until = ctx.seek.landed();
            ctx.ack_render_generation(generation);
            debug!(generation, stale, ?preroll_until, "Video pipeline resynchronized after seek");
        }

        // Sample EOF before popping: an empty pop after EOF is final
        let eof = ctx.reader_eof();
        let Some(packet) = task.rx.pop() else {
            if eof {
                ctx.mark_drained_at(StreamKind::Video, generation);
            }
            thread::sleep(ctx.tuning.decode_backoff);
            continue;
        };

        let frames = match task.decoder.decode(&packet) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(pts = packet.pts, error = %e, "Skipping undecodable video packet");
                continue;
            }
        };
        drop(packet);

        for mut frame in frames {
            let position_ms = task.stream.position_ms(frame.pts);
            if let Some(target_ms) = preroll_until {
                if ends_before(&task.stream, position_ms, target_ms) {
                    trace!(position_ms, target_ms, "Dropping pre-roll frame");
                    continue;
                }
                preroll_until = None;
            }
            if ctx.wait_until(position_ms, generation) == Wait::Interrupted {
                break;
            }

            frame.position_ms = position_ms;
            if !dispatch(&mut task.frames, frame, ctx, generation) {
                break;
            }
            presented += 1;
            trace!(position_ms, "Presented video frame");

            if !ctx.wait_while_paused(generation) {
                break;
            }
        }
    }

    info!(presented, "Video pipeline stopped");
    task
}

/// True if a frame at `position_ms` is fully shown before `target_ms`
fn ends_before(stream: &StreamInfo, position_ms: i64, target_ms: i64) -> bool {
    match stream.frame_interval_ms() {
        Some(interval) => position_ms as f64 + interval <= target_ms as f64,
        None => position_ms < target_ms,
    }
}

/// Post a frame to the render hand-off, retrying while it is full
///
/// Returns false if a seek or cancel arrived before the frame was accepted.
fn dispatch(frames: &mut FrameSender, mut frame: VideoFrame, ctx: &PlaybackContext, generation: u64) -> bool {
    loop {
        match frames.try_send(frame) {
            Ok(()) => return true,
            Err(rejected) => {
                if ctx.interrupted(generation) {
                    return false;
                }
                frame = rejected;
                thread::sleep(ctx.tuning.decode_backoff);
            }
        }
    }
}
