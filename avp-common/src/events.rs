//! Event types for the AVP event system
//!
//! Provides the player event enum, the playback state enumeration and the
//! EventBus used to fan events out to any number of subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback state of a player controller
///
/// Worker threads exist only while the state is Playing, Paused or Seeking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing opened
    Idle,
    /// Source opened, durations known, no threads running
    Ready,
    Playing,
    Paused,
    /// Seek in flight (always resolves back to Playing)
    Seeking,
}

impl PlaybackState {
    /// True when the reader/decode threads are expected to be running
    pub fn has_workers(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Seeking
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Seeking => write!(f, "seeking"),
        }
    }
}

/// Player event types
///
/// Every event carries the id of the Open–Close session that produced it, so
/// late events from a closed session can be told apart after a new Open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Controller state changed
    StateChanged {
        session_id: Option<Uuid>,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Open failure or other error surfaced to the user
    ErrorOccurred {
        session_id: Option<Uuid>,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reader reached the end of the source and both pipelines drained
    EndOfStream {
        session_id: Uuid,
        position_ms: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Session the event belongs to (None for events outside a session)
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            PlayerEvent::StateChanged { session_id, .. } => *session_id,
            PlayerEvent::ErrorOccurred { session_id, .. } => *session_id,
            PlayerEvent::EndOfStream { session_id, .. } => Some(*session_id),
        }
    }

    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::ErrorOccurred { .. } => "ErrorOccurred",
            PlayerEvent::EndOfStream { .. } => "EndOfStream",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish from any thread (slow subscribers never block workers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use avp_common::events::{EventBus, PlayerEvent, PlaybackState};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(PlayerEvent::StateChanged {
///     session_id: None,
///     old_state: PlaybackState::Idle,
///     new_state: PlaybackState::Ready,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(PlayerEvent::StateChanged { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
