use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "streamcast-core")]
#[command(author = "StreamCast Team")]
#[command(version = "0.2.0")]
#[command(about = "WebRTC signaling and negotiation core", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/streamcast-core.toml")]
    pub config: PathBuf,

    /// Signaling server WebSocket URL
    #[arg(short, long)]
    pub server: Option<String>,

    /// Stream identifier to publish or join
    #[arg(long)]
    pub stream_id: Option<String>,

    /// Join the stream as a viewer instead of publishing it
    #[arg(long, action)]
    pub viewer: bool,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}
