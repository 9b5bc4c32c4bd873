//! Configuration management for streamcast-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Signaling configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// ICE configuration
    #[serde(default)]
    pub ice: IceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Signaling server WebSocket URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Stream identifier to publish or join; generated when absent
    #[serde(default)]
    pub stream_id: Option<String>,

    /// Endpoint role
    #[serde(default)]
    pub role: crate::signaling::SessionRole,
}

/// STUN/TURN server entry handed to the negotiation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs, e.g. "stun:stun.l.google.com:19302"
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default)]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// Servers offered to the engine for connectivity establishment
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<IceServerConfig>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            stream_id: None,
            role: crate::signaling::SessionRole::Streamer,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = &self.signaling.server_url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err("Signaling server_url must use the ws:// or wss:// scheme".into());
        }

        if let Some(ref stream_id) = self.signaling.stream_id {
            if stream_id.trim().is_empty() {
                return Err("Signaling stream_id must not be empty".into());
            }
        }

        for server in &self.ice.servers {
            if server.urls.is_empty() {
                return Err("ICE server entries must list at least one URL".into());
            }
            for url in &server.urls {
                let known_scheme = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known_scheme {
                    return Err("ICE server URLs must use a stun: or turn: scheme".into());
                }
            }
        }

        Ok(())
    }
}


fn default_server_url() -> String {
    "ws://127.0.0.1:3000".to_string()
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        },
        IceServerConfig {
            urls: vec!["turn:openrelay.metered.ca:80".to_string()],
            username: Some("openrelayproject".to_string()),
            credential: Some("openrelayproject".to_string()),
        },
    ]
}
