//! Video frame hand-off to the render thread
//!
//! The video pipeline never calls render code. It pushes paced frames into a
//! bounded channel and whichever thread owns the [`FrameReceiver`] delivers
//! them to its [`RenderSink`], exactly once and in order.

use crate::media::VideoFrame;
use crate::playback::channel::{bounded, ChannelReceiver, ChannelSender};
use tracing::trace;

/// Consumer of presented video frames, called on its owning thread
pub trait RenderSink {
    fn on_frame(&mut self, frame: VideoFrame);
}

/// Create the hand-off between the video pipeline and the render thread
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = bounded("frames", capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Video-pipeline end of the hand-off
pub struct FrameSender {
    tx: ChannelSender<VideoFrame>,
}

impl FrameSender {
    /// Offer a frame; gives it back when the render thread is behind
    pub fn try_send(&mut self, frame: VideoFrame) -> Result<(), VideoFrame> {
        self.tx.push(frame)
    }

    /// Drop frames the render thread has not picked up yet
    pub fn discard_pending(&mut self) -> usize {
        self.tx.drain()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Render-thread end of the hand-off
pub struct FrameReceiver {
    rx: ChannelReceiver<VideoFrame>,
}

impl FrameReceiver {
    /// Take the next frame, if one is waiting
    pub fn try_recv(&self) -> Option<VideoFrame> {
        self.rx.pop()
    }

    /// Deliver every waiting frame to `sink`, returning how many were delivered
    pub fn pump(&self, sink: &mut dyn RenderSink) -> usize {
        let mut delivered = 0;
        while let Some(frame) = self.rx.pop() {
            trace!(position_ms = frame.position_ms, "Delivering frame");
            sink.on_frame(frame);
            delivered += 1;
        }
        delivered
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
