//! Audio pipeline thread
//!
//! Same packet/frame loop as the video pipeline. After pacing, samples pass
//! through the tempo/resample stage. The pause wait comes after that stage:
//! samples already processed are held across the pause and written on resume.
//! Deadlines always come from the decoded frame's own timestamp, never from
//! the number of samples the tempo stage produced.

use super::channel::ChannelReceiver;
use super::context::{PlaybackContext, Wait};
use crate::audio::{AudioSink, SampleProcessor};
use crate::media::{AudioDecoder, Packet, StreamInfo, StreamKind};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Everything the audio thread owns; handed back when the thread exits
pub struct AudioTask {
    pub rx: ChannelReceiver<Packet>,
    pub decoder: AudioDecoder,
    pub stream: StreamInfo,
    pub processor: Box<dyn SampleProcessor>,
    pub sink: Box<dyn AudioSink>,
}

/// Start the audio pipeline thread
pub fn spawn(task: AudioTask, ctx: Arc<PlaybackContext>) -> io::Result<JoinHandle<AudioTask>> {
    ctx.tuning
        .thread_builder("avp-audio")
        .spawn(move || run(task, &ctx))
}

fn run(mut task: AudioTask, ctx: &PlaybackContext) -> AudioTask {
    info!(
        session_id = %ctx.session_id,
        codec = %task.stream.codec,
        sink_rate = task.sink.sample_rate(),
        sink_channels = task.sink.channels(),
        "Audio pipeline started"
    );
    let mut generation = ctx.seek.generation();
    let mut written: u64 = 0;
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
            task.processor.reset();
            preroll_until = ctx.seek.landed();
            debug!(generation, ?preroll_until, "Audio pipeline resynchronized after seek");
        }

        let eof = ctx.reader_eof();
        let Some(packet) = task.rx.pop() else {
            if eof {
                ctx.mark_drained_at(StreamKind::Audio, generation);
            }
            thread::sleep(ctx.tuning.decode_backoff);
            continue;
        };

        let frames = match task.decoder.decode(&packet) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(pts = packet.pts, error = %e, "Skipping undecodable audio packet");
                continue;
            }
        };
        drop(packet);

        for frame in frames {
            let position_ms = task.stream.position_ms(frame.pts);
            if let Some(target_ms) = preroll_until {
                if position_ms as f64 + frame.duration_ms() <= target_ms as f64 {
                    trace!(position_ms, target_ms, "Dropping pre-roll audio");
                    continue;
                }
                preroll_until = None;
            }
            if ctx.wait_until(position_ms, generation) == Wait::Interrupted {
                break;
            }

            let samples = match task.processor.process(&frame, ctx.tempo()) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(position_ms, error = %e, "Dropping audio frame");
                    continue;
                }
            };

            if !ctx.wait_while_paused(generation) {
                break;
            }
            if !write_all(task.sink.as_mut(), &samples, ctx, generation) {
                break;
            }
            written += samples.len() as u64;
            trace!(position_ms, samples = samples.len(), "Wrote audio frame");
        }
    }

    info!(written, "Audio pipeline stopped");
    task
}

/// Write every sample, retrying the remainder while the sink is full
///
/// Returns false if a seek or cancel arrived first.
fn write_all(sink: &mut dyn AudioSink, samples: &[f32], ctx: &PlaybackContext, generation: u64) -> bool {
    let mut offset = 0;
    while offset < samples.len() {
        offset += sink.write(&samples[offset..]);
        if offset >= samples.len() {
            break;
        }
        if ctx.interrupted(generation) {
            return false;
        }
        thread::sleep(ctx.tuning.decode_backoff);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{NullAudioSink, TempoResampler};
    use crate::backend::synthetic::{PcmDecoder, SyntheticParams, SyntheticSource};
    use crate::media::MediaSource;
    use crate::playback::channel::bounded;
    use crate::playback::context::Tuning;
    use avp_common::events::{EventBus, PlayerEvent};
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    /// Sink accepting at most `chunk` samples per call
    struct SlowSink {
        chunk: usize,
        inner: NullAudioSink,
    }

    impl AudioSink for SlowSink {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn channels(&self) -> u16 {
            self.inner.channels()
        }

        fn write(&mut self, samples: &[f32]) -> usize {
            let n = samples.len().min(self.chunk);
            self.inner.write(&samples[..n])
        }
    }

    fn audio_task(query: &str, sink: Box<dyn AudioSink>) -> (AudioTask, usize) {
        let params = SyntheticParams::parse(&format!("synth://audio?{}", query)).unwrap();
        let (rate, channels) = (params.sample_rate, params.channels);
        let mut source = SyntheticSource::new(params);
        let stream = source.streams()[1].clone();
        let (mut tx, rx) = bounded("audio", 256);
        let mut expected = 0;
        while let Ok(packet) = source.read_packet() {
            if packet.stream_index == stream.index {
                expected += packet.data.len() / 2;
                tx.push(packet).unwrap();
            }
        }
        let processor = TempoResampler::new(sink.sample_rate(), sink.channels());
        let task = AudioTask {
            rx,
            decoder: Box::new(PcmDecoder::new(rate, channels)),
            stream,
            processor: Box::new(processor),
            sink,
        };
        (task, expected)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_all_samples_reach_sink() {
        let sink = NullAudioSink::new(48_000, 2);
        let observer = sink.clone();
        let (task, expected) = audio_task("duration_ms=300", Box::new(SlowSink { chunk: 100, inner: sink }));

        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let ctx = Arc::new(PlaybackContext::new(Uuid::new_v4(), Tuning::default(), events));
        ctx.mark_reader_eof();
        ctx.mark_drained(StreamKind::Video);
        ctx.clock.start();

        let handle = spawn(task, Arc::clone(&ctx)).unwrap();
        assert!(wait_for(|| observer.samples_written() == expected as u64));

        // Both pipelines drained after reader EOF
        assert!(wait_for(|| matches!(rx.try_recv(), Ok(PlayerEvent::EndOfStream { .. }))));

        ctx.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_paused_pipeline_stops_writing() {
        let sink = NullAudioSink::new(48_000, 2);
        let observer = sink.clone();
        let (task, _) = audio_task("duration_ms=5000", Box::new(sink));

        let ctx = Arc::new(PlaybackContext::new(Uuid::new_v4(), Tuning::default(), EventBus::new(8)));
        ctx.clock.start();
        let handle = spawn(task, Arc::clone(&ctx)).unwrap();
        assert!(wait_for(|| observer.samples_written() > 0));

        ctx.clock.pause();
        ctx.pause.set_paused(true);
        thread::sleep(Duration::from_millis(50));
        let frozen = observer.samples_written();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(observer.samples_written(), frozen);

        ctx.clock.resume();
        ctx.pause.set_paused(false);
        assert!(wait_for(|| observer.samples_written() > frozen));

        ctx.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_audio_before_seek_target_is_dropped() {
        let sink = NullAudioSink::new(48_000, 2);
        let observer = sink.clone();
        let (task, expected) = audio_task("duration_ms=300", Box::new(sink));

        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let ctx = Arc::new(PlaybackContext::new(Uuid::new_v4(), Tuning::default(), events));
        ctx.seek.request(200);
        let handle = spawn(task, Arc::clone(&ctx)).unwrap();

        // Channel still holds everything from 0, as after a keyframe seek
        ctx.clock.start();
        ctx.clock.seek_to(200);
        ctx.seek.set_landed(Some(200));
        ctx.seek.complete();
        ctx.mark_reader_eof();
        ctx.mark_drained(StreamKind::Video);

        assert!(wait_for(|| matches!(rx.try_recv(), Ok(PlayerEvent::EndOfStream { .. }))));
        ctx.cancel();
        handle.join().unwrap();

        let written = observer.samples_written();
        assert!(written > 0);
        // About the last third, plus the frame spanning the target
        assert!(written <= expected as u64 / 2, "{} of {}", written, expected);
    }
}
