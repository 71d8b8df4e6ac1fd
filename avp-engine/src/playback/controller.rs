//! Player controller: the Idle/Ready/Playing/Paused/Seeking state machine
//!
//! Owns at most one session at a time. Opening builds the session (source,
//! decoders, channels, shared context) without starting threads; the first
//! Play starts them; Close cancels and joins them and hands the long-lived
//! resources (audio sink, render hand-off) back to the controller so the next
//! Open can reuse them.
//!
//! Every command runs on the caller's thread and emits its `StateChanged`
//! event before returning.

use super::audio::{self, AudioTask};
use super::channel::bounded;
use super::context::{PlaybackContext, Tuning};
use super::reader::{self, ReaderTask};
use super::video::{self, VideoTask};
use crate::audio::{AudioSink, NullAudioSink, TempoResampler};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::{BackendRegistry, StreamInfo};
use crate::render::{frame_channel, FrameReceiver, FrameSender};
use avp_common::events::{EventBus, PlaybackState, PlayerEvent};
use avp_common::time::format_position;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker inputs for a session that has not started playing yet
struct Tasks {
    reader: ReaderTask,
    video: VideoTask,
    audio: AudioTask,
}

/// Running worker threads; each hands its task back when joined
struct Workers {
    reader: Option<JoinHandle<ReaderTask>>,
    video: Option<JoinHandle<VideoTask>>,
    audio: Option<JoinHandle<AudioTask>>,
}

enum Stage {
    Ready(Tasks),
    Running(Workers),
}

/// One Open–Close cycle
struct Session {
    id: Uuid,
    url: String,
    ctx: Arc<PlaybackContext>,
    video: StreamInfo,
    audio: StreamInfo,
    total_ms: i64,
    stage: Stage,
}

/// Playback controller
///
/// Not `Sync`: commands are issued from one owning thread. Events can be
/// observed from anywhere through [`PlayerController::subscribe`].
pub struct PlayerController {
    config: PlayerConfig,
    tuning: Tuning,
    backends: BackendRegistry,
    events: EventBus,
    state: PlaybackState,
    session: Option<Session>,
    /// Output sink, parked here while no session is playing
    audio_sink: Option<Box<dyn AudioSink>>,
    /// Sink format, kept so a lost sink can be replaced by a silent one
    sink_format: (u32, u16),
    frame_sender: Option<FrameSender>,
    frame_receiver: Option<FrameReceiver>,
}

impl PlayerController {
    pub fn new(config: PlayerConfig, backends: BackendRegistry, audio_sink: Box<dyn AudioSink>) -> Self {
        let tuning = Tuning::from(&config);
        let events = EventBus::new(config.event_capacity);
        let (frame_sender, frame_receiver) = frame_channel(config.frame_handoff_capacity);
        let sink_format = (audio_sink.sample_rate(), audio_sink.channels());

        Self {
            config,
            tuning,
            backends,
            events,
            state: PlaybackState::Idle,
            session: None,
            audio_sink: Some(audio_sink),
            sink_format,
            frame_sender: Some(frame_sender),
            frame_receiver: Some(frame_receiver),
        }
    }

    /// Subscribe to state, error and end-of-stream events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Take the render end of the frame hand-off
    ///
    /// The receiver stays valid across Close/Open cycles. Returns None once
    /// taken.
    pub fn take_frame_receiver(&mut self) -> Option<FrameReceiver> {
        self.frame_receiver.take()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Url of the open session
    pub fn url(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.url.as_str())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Open `url` and move Idle → Ready
    ///
    /// On failure the controller stays Idle and an `ErrorOccurred` event is
    /// emitted before the error is returned.
    pub fn open(&mut self, url: &str) -> Result<()> {
        info!("Open command received: url={}", url);
        if self.state != PlaybackState::Idle {
            warn!("Open ignored: player is {} (close it first)", self.state);
            return Err(Error::InvalidState(format!("cannot open while {}", self.state)));
        }

        let media = match self.backends.open(url) {
            Ok(media) => media,
            Err(e) => {
                error!("Failed to open {}: {}", url, e);
                self.events.emit_lossy(PlayerEvent::ErrorOccurred {
                    session_id: None,
                    message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                return Err(Error::Open(e));
            }
        };

        let id = Uuid::new_v4();
        let total_ms = media.total_ms();
        info!(
            session_id = %id,
            video_codec = %media.video.codec,
            audio_codec = %media.audio.codec,
            video_start_ts = media.video.start_ts,
            audio_start_ts = media.audio.start_ts,
            "Opened {} (total {})",
            url,
            format_position(total_ms)
        );

        let ctx = Arc::new(PlaybackContext::new(id, self.tuning, self.events.clone()));
        let (video_tx, video_rx) = bounded("video", self.config.video_channel_capacity);
        let (audio_tx, audio_rx) = bounded("audio", self.config.audio_channel_capacity);

        let sink = self.take_sink();
        let processor = TempoResampler::new(sink.sample_rate(), sink.channels());
        let frames = self.take_frame_sender();

        let tasks = Tasks {
            reader: ReaderTask {
                source: media.source,
                video: media.video.clone(),
                audio: media.audio.clone(),
                video_tx,
                audio_tx,
            },
            video: VideoTask {
                rx: video_rx,
                decoder: media.video_decoder,
                stream: media.video,
                frames,
            },
            audio: AudioTask {
                rx: audio_rx,
                decoder: media.audio_decoder,
                stream: media.audio,
                processor: Box::new(processor),
                sink,
            },
        };

        self.session = Some(Session {
            id,
            url: url.to_string(),
            ctx,
            video: tasks.video.stream.clone(),
            audio: tasks.audio.stream.clone(),
            total_ms,
            stage: Stage::Ready(tasks),
        });
        self.set_state(PlaybackState::Ready);
        Ok(())
    }

    /// Toggle playback: Ready → Playing, Playing → Paused, Paused → Playing
    ///
    /// From any other state the call is logged and ignored.
    pub fn play(&mut self) -> Result<()> {
        info!("Play command received");
        match self.state {
            PlaybackState::Ready => self.start(),
            PlaybackState::Playing => {
                if let Some(session) = &self.session {
                    session.ctx.clock.pause();
                    session.ctx.pause.set_paused(true);
                }
                self.set_state(PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Paused => {
                if let Some(session) = &self.session {
                    session.ctx.clock.resume();
                    session.ctx.pause.set_paused(false);
                }
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            state => {
                warn!("Play ignored: player is {}", state);
                Ok(())
            }
        }
    }

    /// Spawn the three workers for a Ready session
    fn start(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::InvalidState("ready without a session".to_string()));
        };
        let stage = std::mem::replace(
            &mut session.stage,
            Stage::Running(Workers {
                reader: None,
                video: None,
                audio: None,
            }),
        );
        let tasks = match stage {
            Stage::Ready(tasks) => tasks,
            running => {
                session.stage = running;
                return Err(Error::InvalidState("workers already running".to_string()));
            }
        };

        let ctx = Arc::clone(&session.ctx);
        ctx.clock.start();

        let spawned = spawn_workers(tasks, &ctx);
        let failure = spawned.failure;
        session.stage = Stage::Running(spawned.workers);

        if let Some(e) = failure {
            error!("Failed to start playback threads: {}", e);
            self.events.emit_lossy(PlayerEvent::ErrorOccurred {
                session_id: Some(ctx.session_id),
                message: format!("failed to start playback threads: {}", e),
                timestamp: chrono::Utc::now(),
            });
            self.teardown();
            self.transition(PlaybackState::Idle, Some(ctx.session_id));
            return Err(Error::Io(e));
        }

        info!(session_id = %ctx.session_id, "Playback threads started");
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Seek to `target_ms` from Playing or Paused
    ///
    /// Blocks until the reader has repositioned the source (bounded by
    /// `seek_timeout_ms`). Always ends in Playing, so seeking while paused
    /// resumes playback.
    pub fn seek_to(&mut self, target_ms: i64) -> Result<()> {
        info!("Seek command received: position={}ms", target_ms);
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            warn!("Seek ignored: player is {}", self.state);
            return Ok(());
        }
        let was_paused = self.state == PlaybackState::Paused;
        self.set_state(PlaybackState::Seeking);

        let timeout = Duration::from_millis(self.config.seek_timeout_ms);
        if let Some(session) = self.session.as_mut() {
            let ctx = Arc::clone(&session.ctx);
            if was_paused {
                ctx.clock.resume();
                ctx.pause.set_paused(false);
            }

            let generation = ctx.seek.generation();
            ctx.seek.request(target_ms);
            ctx.pause.notify_all();

            let deadline = Instant::now() + timeout;
            while ctx.seek.generation() == generation {
                if Instant::now() >= deadline {
                    warn!("Seek to {}ms not serviced within {:?}", target_ms, timeout);
                    break;
                }
                if let Stage::Running(workers) = &mut session.stage {
                    if let Err(e) = respawn_finished_reader(workers, &ctx) {
                        error!("Failed to restart reader for seek: {}", e);
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
            // Stale frames must be purged before the caller pumps the renderer
            let target_generation = generation + 1;
            while ctx.render_generation() < target_generation && ctx.seek.generation() > generation {
                if Instant::now() >= deadline {
                    warn!("Video pipeline did not resynchronize within {:?}", timeout);
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
            info!("Seek complete: position={}", format_position(ctx.clock.now_ms()));
        }

        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Enable or disable the audio speed-up (only while Playing)
    ///
    /// Video pacing is unaffected.
    pub fn set_speed(&mut self, enabled: bool) -> Result<()> {
        info!("Speed command received: enabled={}", enabled);
        if self.state != PlaybackState::Playing {
            warn!("Speed ignored: player is {}", self.state);
            return Ok(());
        }
        if let Some(session) = &self.session {
            session.ctx.set_speed(enabled);
            session.ctx.pause.notify_all();
        }
        Ok(())
    }

    /// Tear the session down and return to Idle; a no-op when already Idle
    pub fn close(&mut self) -> Result<()> {
        info!("Close command received");
        if self.state == PlaybackState::Idle {
            debug!("Close ignored: player is already idle");
            return Ok(());
        }
        let session_id = self.session_id();
        self.teardown();
        self.transition(PlaybackState::Idle, session_id);
        Ok(())
    }

    /// `(current_ms, total_ms)` of the open session; `(0, 0)` when Idle
    pub fn current_position(&self) -> (i64, i64) {
        let Some(session) = &self.session else {
            return (0, 0);
        };
        match session.stage {
            Stage::Ready(_) => (0, session.total_ms),
            Stage::Running(_) => {
                let now = session.ctx.clock.now_ms().max(0);
                let current = if session.total_ms > 0 {
                    now.min(session.total_ms)
                } else {
                    now
                };
                (current, session.total_ms)
            }
        }
    }

    /// Stream descriptions of the open session as (video, audio)
    pub fn streams(&self) -> Option<(&StreamInfo, &StreamInfo)> {
        self.session.as_ref().map(|s| (&s.video, &s.audio))
    }

    /// Cancel and join the workers, then reclaim the sink and frame sender
    ///
    /// Leaves `state` untouched; callers emit the transition.
    fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.ctx.cancel();

        match session.stage {
            Stage::Ready(tasks) => {
                self.reclaim_video(tasks.video);
                self.reclaim_audio(tasks.audio);
            }
            Stage::Running(workers) => {
                if let Some(handle) = workers.reader {
                    if join_worker(handle, "reader").is_some() {
                        debug!("Reader joined");
                    }
                }
                if let Some(task) = workers.video.and_then(|h| join_worker(h, "video")) {
                    self.reclaim_video(task);
                }
                if let Some(task) = workers.audio.and_then(|h| join_worker(h, "audio")) {
                    self.reclaim_audio(task);
                }
            }
        }
        info!(session_id = %session.id, "Session closed: {}", session.url);
    }

    fn reclaim_video(&mut self, mut task: VideoTask) {
        let stale = task.frames.discard_pending();
        if stale > 0 {
            debug!(stale, "Discarded undelivered frames");
        }
        self.frame_sender = Some(task.frames);
    }

    fn reclaim_audio(&mut self, task: AudioTask) {
        self.audio_sink = Some(task.sink);
    }

    /// Sink for a new session; silent when the previous one was lost
    fn take_sink(&mut self) -> Box<dyn AudioSink> {
        self.audio_sink.take().unwrap_or_else(|| {
            let (rate, channels) = self.sink_format;
            warn!("Audio sink unavailable, continuing with a silent sink");
            Box::new(NullAudioSink::new(rate, channels))
        })
    }

    /// Frame sender for a new session
    ///
    /// If the previous sender was lost with a crashed video thread, a fresh
    /// hand-off is created and its receiver is made available again.
    fn take_frame_sender(&mut self) -> FrameSender {
        self.frame_sender.take().unwrap_or_else(|| {
            warn!("Render hand-off lost, creating a new one");
            let (sender, receiver) = frame_channel(self.config.frame_handoff_capacity);
            self.frame_receiver = Some(receiver);
            sender
        })
    }

    fn set_state(&mut self, new_state: PlaybackState) {
        let session_id = self.session_id();
        self.transition(new_state, session_id);
    }

    fn workers_running(&self) -> bool {
        matches!(self.session.as_ref().map(|s| &s.stage), Some(Stage::Running(_)))
    }

    fn transition(&mut self, new_state: PlaybackState, session_id: Option<Uuid>) {
        debug_assert_eq!(
            new_state.has_workers(),
            self.workers_running(),
            "state {} disagrees with the session stage",
            new_state
        );
        let old_state = self.state;
        self.state = new_state;
        info!("Playback state changed: {:?} -> {:?}", old_state, new_state);
        self.events.emit_lossy(PlayerEvent::StateChanged {
            session_id,
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        if self.state != PlaybackState::Idle {
            if let Err(e) = self.close() {
                error!("Close on drop failed: {}", e);
            }
        }
    }
}

struct Spawned {
    workers: Workers,
    failure: Option<std::io::Error>,
}

/// Start audio, video, then reader; stops at the first spawn failure
fn spawn_workers(tasks: Tasks, ctx: &Arc<PlaybackContext>) -> Spawned {
    let mut workers = Workers {
        reader: None,
        video: None,
        audio: None,
    };

    match audio::spawn(tasks.audio, Arc::clone(ctx)) {
        Ok(handle) => workers.audio = Some(handle),
        Err(e) => return Spawned { workers, failure: Some(e) },
    }
    match video::spawn(tasks.video, Arc::clone(ctx)) {
        Ok(handle) => workers.video = Some(handle),
        Err(e) => return Spawned { workers, failure: Some(e) },
    }
    match reader::spawn(tasks.reader, Arc::clone(ctx)) {
        Ok(handle) => workers.reader = Some(handle),
        Err(e) => return Spawned { workers, failure: Some(e) },
    }
    Spawned { workers, failure: None }
}

/// Restart a reader that already exited at end of stream
///
/// The exited reader hands back its source, so a pending seek can still be
/// serviced.
fn respawn_finished_reader(workers: &mut Workers, ctx: &Arc<PlaybackContext>) -> std::io::Result<()> {
    let finished = workers.reader.as_ref().is_some_and(|h| h.is_finished());
    if !finished {
        return Ok(());
    }
    let Some(task) = workers.reader.take().and_then(|h| join_worker(h, "reader")) else {
        return Ok(());
    };
    debug!("Restarting reader after end of stream");
    workers.reader = Some(reader::spawn(task, Arc::clone(ctx))?);
    Ok(())
}

fn join_worker<T>(handle: JoinHandle<T>, name: &str) -> Option<T> {
    match handle.join() {
        Ok(task) => Some(task),
        Err(_) => {
            error!("{} thread panicked", name);
            None
        }
    }
}
