//! streamcast-core - Main entry point
//!
//! Connects to a signaling relay, registers a stream, and negotiates a
//! WebRTC session with the remote peer the relay pairs us with.

mod args;
mod config;
mod error;
mod negotiation;
mod session;
mod signaling;

use args::Args;
use clap::Parser;
use config::Config;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

use negotiation::NegotiationFacade;
use session::{SessionConfig, SessionCoordinator, SessionEvent};
use signaling::SessionRole;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("STREAMCAST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("streamcast-core v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match args.load_config() {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };

    apply_signaling_overrides(&mut config, &args);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let stream_id = config
        .signaling
        .stream_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let role = config.signaling.role;
    info!("Starting as {} for stream {}", role.as_str(), stream_id);

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let facade = build_facade(&config, engine_tx.clone())?;

    let session_config = SessionConfig {
        server_url: config.signaling.server_url.clone(),
        stream_id,
        role,
    };
    let (coordinator, handle, mut events) =
        SessionCoordinator::new(session_config, facade, engine_tx, engine_rx);
    let run_handle = tokio::spawn(coordinator.run());

    // Report session progress until shutdown
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                handle.stop();
            }
            event = events.recv() => match event {
                Some(SessionEvent::Connected { client_id }) => {
                    info!("Connected as {}", client_id);
                }
                Some(SessionEvent::Registered { stream_id, embed_url }) => {
                    info!("Stream {} registered", stream_id);
                    if let Some(url) = embed_url {
                        info!("Share link: {}", url);
                    }
                }
                Some(SessionEvent::PeerJoined { peer_id }) => info!("Peer {} joined", peer_id),
                Some(SessionEvent::PeerLeft { peer_id }) => info!("Peer {} left", peer_id),
                Some(SessionEvent::Active { peer_id }) => info!("Streaming with {}", peer_id),
                Some(SessionEvent::StreamEnded) => info!("Stream ended by the publisher"),
                Some(SessionEvent::Error(e)) if e.is_fatal() => error!("Session failed: {}", e),
                Some(SessionEvent::Error(e)) => warn!("Session error: {}", e),
                Some(SessionEvent::Stopped) | None => break,
            }
        }
    }

    let _ = run_handle.await;
    info!("streamcast-core stopped");

    Ok(())
}

#[cfg(feature = "webrtc-engine")]
fn build_facade(
    config: &Config,
    events: negotiation::EngineSink,
) -> Result<Arc<dyn NegotiationFacade>, Box<dyn std::error::Error>> {
    Ok(Arc::new(negotiation::engine::WebRtcEngine::new(
        config.ice.servers.clone(),
        events,
    )))
}

#[cfg(not(feature = "webrtc-engine"))]
fn build_facade(
    _config: &Config,
    _events: negotiation::EngineSink,
) -> Result<Arc<dyn NegotiationFacade>, Box<dyn std::error::Error>> {
    Err(Box::new(error::SignalError::FeatureDisabled))
}

fn apply_signaling_overrides(config: &mut Config, args: &Args) {
    let env_server = env_var("STREAMCAST_SERVER_URL");
    let env_stream = env_var("STREAMCAST_STREAM_ID");

    if let Some(server) = args.server.clone().or(env_server) {
        config.signaling.server_url = server;
    }
    if let Some(stream_id) = args.stream_id.clone().or(env_stream) {
        config.signaling.stream_id = Some(stream_id);
    }
    if args.viewer {
        config.signaling.role = SessionRole::Viewer;
    }
}

fn env_var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
