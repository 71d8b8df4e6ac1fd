//! avp - command-line player
//!
//! Opens a url, plays it to the default audio device and logs presented video
//! frames. Reads single-line commands from stdin:
//! `p` play/pause, `s <ms>` seek, `f` toggle speed, `q` quit.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use avp_engine::audio::{AudioOutput, AudioSink, NullAudioSink};
use avp_engine::media::{BackendRegistry, VideoFrame};
use avp_engine::render::RenderSink;
use avp_engine::{PlaybackState, PlayerConfig, PlayerController, PlayerEvent};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for avp
#[derive(Parser, Debug)]
#[command(name = "avp")]
#[command(about = "Audio/video player")]
#[command(version)]
struct Args {
    /// Local path, file:// url, network url (http, rtsp, ...) or synth:// url
    url: String,

    /// Config file (overrides AVP_CONFIG and the default location)
    #[arg(short, long, env = "AVP_CONFIG")]
    config: Option<PathBuf>,

    /// Seek here right after playback starts
    #[arg(long)]
    seek_ms: Option<i64>,

    /// Start with the audio speed-up enabled
    #[arg(long)]
    speed: bool,

    /// Discard audio instead of opening an output device
    #[arg(long)]
    no_audio: bool,
}

/// Logs every presented frame
#[derive(Default)]
struct LogRenderSink {
    frames: u64,
}

impl RenderSink for LogRenderSink {
    fn on_frame(&mut self, frame: VideoFrame) {
        self.frames += 1;
        debug!(
            position_ms = frame.position_ms,
            width = frame.width,
            height = frame.height,
            "Frame {}",
            self.frames
        );
    }
}

enum Command {
    Toggle,
    Seek(i64),
    Speed,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match (parts.next()?, parts.next()) {
        ("p", None) => Some(Command::Toggle),
        ("f", None) => Some(Command::Speed),
        ("q", None) => Some(Command::Quit),
        ("s", Some(ms)) => ms.parse().ok().map(Command::Seek),
        _ => None,
    }
}

/// Flip the speed-up, keeping `speed` in step with what the player accepted
fn toggle_speed(player: &mut PlayerController, speed: &mut bool) -> Result<()> {
    if player.state() != PlaybackState::Playing {
        warn!("Speed toggle ignored: player is {}", player.state());
        return Ok(());
    }
    *speed = !*speed;
    player.set_speed(*speed)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avp=info,avp_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = PlayerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // The stream must stay alive on this thread for as long as we play
    let (_output, sink): (Option<AudioOutput>, Box<dyn AudioSink>) = if args.no_audio {
        info!("Audio disabled, using a silent sink");
        (None, Box::new(NullAudioSink::default()))
    } else {
        match AudioOutput::open(config.output_device.as_deref(), config.audio_output_buffer_ms) {
            Ok((output, sink)) => {
                info!(
                    "Audio output: {} ({} Hz, {} ch)",
                    output.device_name(),
                    output.sample_rate(),
                    output.channels()
                );
                (Some(output), Box::new(sink))
            }
            Err(e) => {
                warn!("No audio output ({}), using a silent sink", e);
                (None, Box::new(NullAudioSink::default()))
            }
        }
    };

    let mut player = PlayerController::new(config, BackendRegistry::with_defaults(), sink);
    let mut events = player.subscribe();
    let frames = player
        .take_frame_receiver()
        .context("Render hand-off already taken")?;

    let result = run(&mut player, &mut events, &frames, &args).await;
    player.close().context("Failed to close player")?;
    result
}

async fn run(
    player: &mut PlayerController,
    events: &mut tokio::sync::broadcast::Receiver<PlayerEvent>,
    frames: &avp_engine::render::FrameReceiver,
    args: &Args,
) -> Result<()> {
    player
        .open(&args.url)
        .with_context(|| format!("Failed to open {}", args.url))?;
    player.play().context("Failed to start playback")?;
    if let Some(ms) = args.seek_ms {
        player.seek_to(ms).context("Initial seek failed")?;
    }
    let mut speed = args.speed;
    if speed {
        player.set_speed(true)?;
    }

    let mut render = LogRenderSink::default();
    let mut render_tick = tokio::time::interval(Duration::from_millis(5));
    let mut progress_tick = tokio::time::interval(Duration::from_secs(1));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = render_tick.tick() => {
                frames.pump(&mut render);
            }
            _ = progress_tick.tick() => {
                let (current, total) = player.current_position();
                info!(
                    "{} / {} ({})",
                    avp_common::time::format_position(current),
                    avp_common::time::format_position(total),
                    player.state()
                );
            }
            line = stdin.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => match parse_command(&line) {
                        Some(Command::Toggle) => player.play()?,
                        Some(Command::Seek(ms)) => player.seek_to(ms)?,
                        Some(Command::Speed) => toggle_speed(player, &mut speed)?,
                        Some(Command::Quit) => {
                            info!("Quit requested");
                            break;
                        }
                        None => warn!("Unknown command '{}' (p, s <ms>, f, q)", line.trim()),
                    },
                    None => stdin_open = false,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        info!(
                            "Event {}: {}",
                            event.event_type(),
                            serde_json::to_string(&event).unwrap_or_default()
                        );
                        if matches!(event, PlayerEvent::EndOfStream { .. }) {
                            frames.pump(&mut render);
                            info!("Playback finished after {} frames", render.frames);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert!(matches!(parse_command("p"), Some(Command::Toggle)));
        assert!(matches!(parse_command(" s 1500 "), Some(Command::Seek(1500))));
        assert!(matches!(parse_command("f"), Some(Command::Speed)));
        assert!(matches!(parse_command("q"), Some(Command::Quit)));
        assert!(parse_command("s").is_none());
        assert!(parse_command("s abc").is_none());
        assert!(parse_command("x").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_speed_toggle_only_while_playing() {
        let mut player = PlayerController::new(
            PlayerConfig::default(),
            BackendRegistry::with_defaults(),
            Box::new(NullAudioSink::default()),
        );
        let mut speed = false;
        player.open("synth://toggle?duration_ms=5000").unwrap();
        toggle_speed(&mut player, &mut speed).unwrap();
        assert!(!speed);

        player.play().unwrap();
        toggle_speed(&mut player, &mut speed).unwrap();
        assert!(speed);

        // Paused: ignored, so the next toggle still turns it off
        player.play().unwrap();
        toggle_speed(&mut player, &mut speed).unwrap();
        assert!(speed);
        player.play().unwrap();
        toggle_speed(&mut player, &mut speed).unwrap();
        assert!(!speed);

        player.close().unwrap();
    }
}
