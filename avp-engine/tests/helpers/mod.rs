//! Test helper modules for avp-engine integration tests
//!
//! - avi: uncompressed AVI files for container backend tests
//! - capture: audio and render sinks that record what reaches them
//! - fault_injection: a backend wrapping `synth://` media with read, decode
//!   and seek failures

#![allow(dead_code)]

pub mod avi;
pub mod capture;
pub mod fault_injection;

pub use capture::{AudioCapture, FrameCapture};
pub use fault_injection::{FaultCounters, FaultPlan, FaultyBackend};

use avp_engine::media::BackendRegistry;
use avp_engine::{PlaybackState, PlayerConfig, PlayerController, PlayerEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Controller over the default backends with a capturing audio sink
pub fn test_player() -> (PlayerController, AudioCapture) {
    let capture = AudioCapture::new(48_000, 2);
    let player = PlayerController::new(
        PlayerConfig::default(),
        BackendRegistry::with_defaults(),
        Box::new(capture.clone()),
    );
    (player, capture)
}

/// Controller whose registry also routes `faulty://` urls through `plan`
pub fn faulty_player(plan: FaultPlan) -> (PlayerController, FaultCounters) {
    let backend = FaultyBackend::new(plan);
    let counters = backend.counters();
    let mut registry = BackendRegistry::with_defaults();
    registry.register(Arc::new(backend));
    let player = PlayerController::new(
        PlayerConfig::default(),
        registry,
        Box::new(AudioCapture::new(48_000, 2)),
    );
    (player, counters)
}

/// Poll `cond` until it holds or `timeout` expires
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Every state reported so far, in order
pub fn drain_states(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlaybackState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PlayerEvent::StateChanged { new_state, .. } = event {
            states.push(new_state);
        }
    }
    states
}
