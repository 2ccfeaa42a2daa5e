use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use huddle_core::settings::SettingsStore;
use huddle_core::{
    HuddleError, HuddleEvent, HuddleEventListener, MediaCoordinator, RenderTarget,
    ResolutionQuality, Role,
};
use huddle_livekit::LiveKitProvider;
use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Join a huddle session from the command line")]
struct Cli {
    /// Backend issuing tokens and sessions
    #[arg(long, env = "HUDDLE_API_URL")]
    api_url: Option<String>,

    /// LiveKit server URL
    #[arg(long, env = "HUDDLE_MEDIA_URL")]
    media_url: Option<String>,

    /// Directory holding settings.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the backend for a new session id
    CreateSession,

    /// Publish the microphone and a V4L2 camera until interrupted
    Publish {
        #[arg(long)]
        session: String,
        /// Local preview target
        #[arg(long)]
        target: Option<String>,
        /// Rotate to the next camera once publishing
        #[arg(long)]
        next_camera: bool,
    },

    /// Watch the latest remote stream until interrupted
    Subscribe {
        #[arg(long)]
        session: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "high")]
        quality: ResolutionQuality,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_core=debug,huddle_livekit=debug")),
        )
        .with_ansi(false)
        .init();
}

/// Forwards coordinator events into the command loop.
struct ChannelListener(UnboundedSender<HuddleEvent>);

impl HuddleEventListener for ChannelListener {
    fn on_event(&self, event: HuddleEvent) {
        let _ = self.0.send(event);
    }
}

#[tokio::main]
async fn main() -> Result<(), HuddleError> {
    init_logging();
    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .or_else(|| dirs::config_dir().map(|dir| dir.join("huddle")))
        .ok_or_else(|| HuddleError::Config("no configuration directory".into()))?;
    let store = SettingsStore::new(&data_dir);
    tracing::debug!("settings loaded from {}", store.path().display());
    let mut settings = store.get();
    if let Some(url) = cli.api_url {
        settings.api_base_url = url;
    }
    if let Some(url) = cli.media_url {
        settings.media_server_url = Some(url);
    }

    let provider = Arc::new(LiveKitProvider::from_settings(&settings)?);
    let mut huddle = MediaCoordinator::with_api(provider, settings)?;
    let (tx, mut events) = mpsc::unbounded_channel();
    huddle.add_listener(Arc::new(ChannelListener(tx)));

    match cli.command {
        Command::CreateSession => {
            let session_id = huddle.create_session().await?;
            println!("{session_id}");
            return Ok(());
        }

        Command::Publish {
            session,
            target,
            next_camera,
        } => {
            huddle.connect(&session, Role::Publisher).await?;
            huddle
                .start_publish(&session, target.map(RenderTarget::new))
                .await?;
            if next_camera {
                match huddle.switch_video_input().await? {
                    Some(device) => tracing::info!("camera switched to {}", device.label),
                    None => tracing::warn!("camera was not switched"),
                }
            }
            loop {
                tokio::select! {
                    Some(event) = events.recv() => tracing::debug!("{event:?}"),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }

        Command::Subscribe {
            session,
            target,
            quality,
        } => {
            huddle.connect(&session, Role::Subscriber).await?;
            let target = target.map(RenderTarget::new);
            loop {
                tokio::select! {
                    Some(event) = events.recv() => match event {
                        HuddleEvent::StreamCreated { session_id, stream } if session_id == session => {
                            tracing::info!("stream {} announced, subscribing", stream.id);
                            huddle.start_subscribe(&session, target.clone()).await?;
                            huddle.set_resolution_quality(quality);
                        }
                        other => tracing::debug!("{other:?}"),
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    huddle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_with_quality() {
        let cli = Cli::parse_from([
            "huddle",
            "--media-url",
            "wss://media.example.com",
            "subscribe",
            "--session",
            "s1",
            "--quality",
            "medium",
        ]);
        assert_eq!(cli.media_url.as_deref(), Some("wss://media.example.com"));
        match cli.command {
            Command::Subscribe {
                session, quality, target,
            } => {
                assert_eq!(session, "s1");
                assert_eq!(quality, ResolutionQuality::Medium);
                assert!(target.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn publish_defaults() {
        let cli = Cli::parse_from(["huddle", "publish", "--session", "s1"]);
        assert!(matches!(
            cli.command,
            Command::Publish { next_camera: false, target: None, .. }
        ));
    }

    #[test]
    fn rejects_unknown_quality() {
        assert!(Cli::try_parse_from(["huddle", "subscribe", "--session", "s1", "--quality", "ultra"]).is_err());
    }
}
