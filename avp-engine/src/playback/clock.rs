//! Virtual playback clock
//!
//! Position = `wall_now - start - pause_accum`, where every term is a count of
//! microseconds since a fixed epoch instant held in atomics. Pause freezes the
//! reported position, resume folds the paused interval into `pause_accum`, and
//! seek shifts `pause_accum` by the seek delta so the wall clock never stops.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use tracing::trace;

const NOT_STARTED: i64 = i64::MIN;
const NOT_PAUSED: i64 = i64::MIN;

/// Pausable, seekable timeline shared by all playback threads
#[derive(Debug)]
pub struct VirtualClock {
    epoch: Instant,
    /// Wall offset (µs since epoch) of position zero
    start_us: AtomicI64,
    /// Accumulated paused (and seek-shifted) time in µs
    pause_accum_us: AtomicI64,
    /// Wall offset of the current pause point, NOT_PAUSED when running
    paused_at_us: AtomicI64,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            start_us: AtomicI64::new(NOT_STARTED),
            pause_accum_us: AtomicI64::new(0),
            paused_at_us: AtomicI64::new(NOT_PAUSED),
        }
    }

    fn wall_us(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    /// Set position zero to the current instant (running, not paused)
    pub fn start(&self) {
        self.pause_accum_us.store(0, Ordering::SeqCst);
        self.paused_at_us.store(NOT_PAUSED, Ordering::SeqCst);
        self.start_us.store(self.wall_us(), Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.start_us.load(Ordering::SeqCst) != NOT_STARTED
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at_us.load(Ordering::SeqCst) != NOT_PAUSED
    }

    /// Current playback position in milliseconds
    ///
    /// Zero before `start`; frozen at the pause point while paused; never negative.
    pub fn now_ms(&self) -> i64 {
        self.now_us() / 1000
    }

    fn now_us(&self) -> i64 {
        let start = self.start_us.load(Ordering::SeqCst);
        if start == NOT_STARTED {
            return 0;
        }
        let accum = self.pause_accum_us.load(Ordering::SeqCst);
        let wall = match self.paused_at_us.load(Ordering::SeqCst) {
            NOT_PAUSED => self.wall_us(),
            paused_at => paused_at,
        };
        wall.saturating_sub(start).saturating_sub(accum).max(0)
    }

    /// Freeze the position at the current instant
    ///
    /// Returns false if the clock was already paused.
    pub fn pause(&self) -> bool {
        let now = self.wall_us();
        self.paused_at_us
            .compare_exchange(NOT_PAUSED, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Resume from the pause point, folding the paused interval into `pause_accum`
    ///
    /// Returns false if the clock was not paused.
    pub fn resume(&self) -> bool {
        let now = self.wall_us();
        let paused_at = self.paused_at_us.swap(NOT_PAUSED, Ordering::SeqCst);
        if paused_at == NOT_PAUSED {
            return false;
        }
        self.shift_us(-now.saturating_sub(paused_at));
        true
    }

    /// Move the position by `delta_ms` (positive moves forward)
    pub fn shift(&self, delta_ms: i64) {
        self.shift_us(delta_ms.saturating_mul(1000));
    }

    fn shift_us(&self, delta_us: i64) {
        // Moving the position forward means less accumulated pause time.
        let mut current = self.pause_accum_us.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(delta_us);
            match self.pause_accum_us.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Shift so that `now_ms()` reports `target_ms`
    pub fn seek_to(&self, target_ms: i64) {
        let delta_us = target_ms.saturating_mul(1000) - self.now_us();
        trace!(target_ms, delta_us, "Clock seek");
        self.shift_us(delta_us);
    }

    /// Back to the never-started state
    pub fn reset(&self) {
        self.start_us.store(NOT_STARTED, Ordering::SeqCst);
        self.pause_accum_us.store(0, Ordering::SeqCst);
        self.paused_at_us.store(NOT_PAUSED, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_not_started_reads_zero() {
        let clock = VirtualClock::new();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now_ms(), 0);
        assert!(!clock.is_started());
    }

    #[test]
    fn test_advances_with_wall_time() {
        let clock = VirtualClock::new();
        clock.start();
        thread::sleep(Duration::from_millis(50));
        let now = clock.now_ms();
        assert!((45..500).contains(&now), "now = {}", now);
    }

    #[test]
    fn test_pause_freezes_position() {
        let clock = VirtualClock::new();
        clock.start();
        thread::sleep(Duration::from_millis(20));
        assert!(clock.pause());
        assert!(!clock.pause());
        let frozen = clock.now_ms();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(clock.now_ms(), frozen);

        assert!(clock.resume());
        assert!(!clock.resume());
        let resumed = clock.now_ms();
        assert!(resumed - frozen < 20, "frozen {} resumed {}", frozen, resumed);
    }

    #[test]
    fn test_seek_to_target() {
        let clock = VirtualClock::new();
        clock.start();
        clock.seek_to(5000);
        let now = clock.now_ms();
        assert!((5000..5050).contains(&now), "now = {}", now);

        clock.seek_to(1000);
        let now = clock.now_ms();
        assert!((1000..1050).contains(&now), "now = {}", now);
    }

    #[test]
    fn test_seek_while_paused_stays_frozen_at_target() {
        let clock = VirtualClock::new();
        clock.start();
        clock.pause();
        clock.seek_to(3000);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.now_ms(), 3000);
    }

    #[test]
    fn test_position_never_negative() {
        let clock = VirtualClock::new();
        clock.start();
        clock.shift(-10_000);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_reset() {
        let clock = VirtualClock::new();
        clock.start();
        clock.seek_to(2000);
        clock.pause();
        clock.reset();
        assert_eq!(clock.now_ms(), 0);
        assert!(!clock.is_paused());
        assert!(!clock.is_started());
    }

    #[test]
    fn test_concurrent_shifts_are_not_lost() {
        let clock = Arc::new(VirtualClock::new());
        clock.start();
        clock.pause();
        let before = clock.now_ms();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.shift(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clock.now_ms() - before, 4000);
    }
}
