//! Shared state observed by the reader and both pipelines
//!
//! One `PlaybackContext` exists per Open–Close session and is shared through an
//! `Arc`. The controller mutates it (pause, seek, speed, cancel); the worker
//! threads only observe it, except for the reader which completes seeks.

use super::clock::VirtualClock;
use crate::config::PlayerConfig;
use crate::media::StreamKind;
use avp_common::events::{EventBus, PlayerEvent};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Timing knobs copied out of the player config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    /// Sleep between push attempts on a full channel
    pub reader_backoff: Duration,
    /// Sleep after a transient read failure
    pub read_retry_backoff: Duration,
    /// Sleep between pop attempts on an empty channel
    pub decode_backoff: Duration,
    /// Longest single sleep inside a pacing wait
    pub pacing_slice: Duration,
    /// Audio tempo applied while the speed flag is set
    pub speed_tempo: f64,
    /// Stack size for worker threads, in bytes (None = platform default)
    pub worker_stack_size: Option<usize>,
}

impl Tuning {
    /// Builder for a worker thread named `name`
    pub fn thread_builder(&self, name: &str) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(name.to_string());
        match self.worker_stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

impl From<&PlayerConfig> for Tuning {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            reader_backoff: Duration::from_micros(config.reader_backoff_us),
            read_retry_backoff: Duration::from_millis(config.read_retry_backoff_ms),
            decode_backoff: Duration::from_millis(config.decode_backoff_ms),
            pacing_slice: Duration::from_millis(config.pacing_sleep_ms.max(1)),
            speed_tempo: config.speed_tempo,
            worker_stack_size: config.worker_stack_kb.map(|kb| kb * 1024),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::from(&PlayerConfig::default())
    }
}

/// Pause flag plus condition variable the pipelines park on
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_paused(&self) -> bool {
        *self.lock()
    }

    pub fn set_paused(&self, paused: bool) {
        let mut guard = self.lock();
        *guard = paused;
        self.cond.notify_all();
    }

    /// Wake every parked thread so it re-checks its bail-out condition
    ///
    /// Takes the lock first: a waiter that has already evaluated `bail` is
    /// then guaranteed to be inside `wait` when the notification lands.
    pub fn notify_all(&self) {
        let _guard = self.lock();
        self.cond.notify_all();
    }

    /// Block while paused, returning early once `bail` reports true
    ///
    /// Returns true if the gate is open, false if the wait was abandoned.
    pub fn wait_while_paused(&self, bail: impl Fn() -> bool) -> bool {
        let mut guard = self.lock();
        loop {
            if bail() {
                return false;
            }
            if !*guard {
                return true;
            }
            guard = self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Pending seek target and a completion counter
#[derive(Debug)]
pub struct SeekRequest {
    target_ms: AtomicI64,
    requested: AtomicBool,
    generation: AtomicU64,
    /// Target of the last successful seek; `i64::MIN` when the last one failed
    landed_ms: AtomicI64,
}

impl Default for SeekRequest {
    fn default() -> Self {
        Self {
            target_ms: AtomicI64::new(0),
            requested: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            landed_ms: AtomicI64::new(i64::MIN),
        }
    }
}

impl SeekRequest {
    /// Post a seek; a newer request replaces an unserviced one
    pub fn request(&self, target_ms: i64) {
        self.target_ms.store(target_ms, Ordering::SeqCst);
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Target of the pending seek, if any
    pub fn pending(&self) -> Option<i64> {
        if self.requested.load(Ordering::SeqCst) {
            Some(self.target_ms.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Mark the pending seek serviced
    ///
    /// The generation is bumped before the flag clears, so a pipeline that sees
    /// no pending seek also sees the new generation.
    pub fn complete(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Number of seeks completed so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Record where the seek being serviced landed (None if it failed)
    ///
    /// Must be called before `complete`.
    pub fn set_landed(&self, target_ms: Option<i64>) {
        self.landed_ms.store(target_ms.unwrap_or(i64::MIN), Ordering::SeqCst);
    }

    /// Target of the most recently completed seek, if it succeeded
    pub fn landed(&self) -> Option<i64> {
        match self.landed_ms.load(Ordering::SeqCst) {
            i64::MIN => None,
            ms => Some(ms),
        }
    }
}

/// Outcome of a pacing wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The clock reached the deadline
    Reached,
    /// A seek or cancellation arrived first
    Interrupted,
}

/// Per-session state shared with the worker threads
#[derive(Debug)]
pub struct PlaybackContext {
    pub session_id: Uuid,
    pub clock: VirtualClock,
    pub pause: PauseGate,
    pub seek: SeekRequest,
    pub tuning: Tuning,
    events: EventBus,
    speed: AtomicBool,
    cancel: AtomicBool,
    reader_eof: AtomicBool,
    video_drained: AtomicBool,
    audio_drained: AtomicBool,
    eos_emitted: AtomicBool,
    /// Last seek generation the video pipeline has purged stale frames for
    render_generation: AtomicU64,
}

impl PlaybackContext {
    pub fn new(session_id: Uuid, tuning: Tuning, events: EventBus) -> Self {
        Self {
            session_id,
            clock: VirtualClock::new(),
            pause: PauseGate::default(),
            seek: SeekRequest::default(),
            tuning,
            events,
            speed: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            reader_eof: AtomicBool::new(false),
            video_drained: AtomicBool::new(false),
            audio_drained: AtomicBool::new(false),
            eos_emitted: AtomicBool::new(false),
            render_generation: AtomicU64::new(0),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Ask every worker to stop, waking any that are parked
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.pause.notify_all();
    }

    pub fn speed_enabled(&self) -> bool {
        self.speed.load(Ordering::SeqCst)
    }

    pub fn set_speed(&self, enabled: bool) {
        self.speed.store(enabled, Ordering::SeqCst);
    }

    /// Tempo the audio pipeline should apply right now
    pub fn tempo(&self) -> f64 {
        if self.speed_enabled() {
            self.tuning.speed_tempo
        } else {
            1.0
        }
    }

    /// True when a pipeline working under seek generation `generation` must
    /// abandon what it holds
    pub fn interrupted(&self, generation: u64) -> bool {
        self.is_cancelled() || self.seek.is_pending() || self.seek.generation() != generation
    }

    /// Park while paused; false if a seek or cancel arrived
    pub fn wait_while_paused(&self, generation: u64) -> bool {
        self.pause.wait_while_paused(|| self.interrupted(generation))
    }

    /// Sleep until the clock reaches `deadline_ms`
    ///
    /// Sleeps in slices of at most `pacing_slice` and re-checks seek and cancel
    /// between slices. While paused it parks on the pause gate instead.
    pub fn wait_until(&self, deadline_ms: i64, generation: u64) -> Wait {
        loop {
            if self.interrupted(generation) {
                return Wait::Interrupted;
            }
            if self.pause.is_paused() {
                if !self.wait_while_paused(generation) {
                    return Wait::Interrupted;
                }
                continue;
            }
            let remaining = deadline_ms - self.clock.now_ms();
            if remaining <= 0 {
                return Wait::Reached;
            }
            let remaining = Duration::from_millis(remaining.unsigned_abs());
            std::thread::sleep(remaining.min(self.tuning.pacing_slice));
        }
    }

    /// Called by the video pipeline once no pre-seek frame can reach the renderer
    pub fn ack_render_generation(&self, generation: u64) {
        self.render_generation.store(generation, Ordering::SeqCst);
    }

    pub fn render_generation(&self) -> u64 {
        self.render_generation.load(Ordering::SeqCst)
    }

    pub fn reader_eof(&self) -> bool {
        self.reader_eof.load(Ordering::SeqCst)
    }

    pub fn mark_reader_eof(&self) {
        self.reader_eof.store(true, Ordering::SeqCst);
    }

    /// Record that `kind`'s pipeline has consumed everything the reader produced
    ///
    /// Emits a single `EndOfStream` event once both pipelines are drained.
    pub fn mark_drained(&self, kind: StreamKind) {
        let flag = match kind {
            StreamKind::Video => &self.video_drained,
            StreamKind::Audio => &self.audio_drained,
        };
        if flag.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(stream = %kind, "Pipeline drained");

        let both = self.video_drained.load(Ordering::SeqCst) && self.audio_drained.load(Ordering::SeqCst);
        if both && !self.eos_emitted.swap(true, Ordering::SeqCst) {
            let position_ms = self.clock.now_ms();
            info!(session_id = %self.session_id, position_ms, "End of stream");
            self.events.emit_lossy(PlayerEvent::EndOfStream {
                session_id: self.session_id,
                position_ms,
                timestamp: avp_common::time::now(),
            });
        }
    }

    /// `mark_drained` for a pipeline working under seek generation `generation`
    ///
    /// Ignored once a seek has started since then: the EOF the pipeline saw
    /// belonged to the production that seek discarded.
    pub fn mark_drained_at(&self, kind: StreamKind, generation: u64) -> bool {
        if self.seek.is_pending() || self.seek.generation() != generation {
            debug!(stream = %kind, generation, "Ignoring drain from before a seek");
            return false;
        }
        self.mark_drained(kind);
        true
    }

    /// Production restarts after a seek: forget EOF and drain markers
    pub fn reset_end_of_stream(&self) {
        self.reader_eof.store(false, Ordering::SeqCst);
        self.video_drained.store(false, Ordering::SeqCst);
        self.audio_drained.store(false, Ordering::SeqCst);
        self.eos_emitted.store(false, Ordering::SeqCst);
    }
}
