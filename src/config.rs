//! Command line and environment configuration.

use crate::media::MediaConfig;
use clap::{Args, Parser, Subcommand};

pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

#[derive(Parser, Debug)]
#[command(name = "webrtc-rooms")]
#[command(about = "Room-based WebRTC signaling hub and participant")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the signaling hub
    Serve(ServerConfig),
    /// Join a room as a headless participant
    Join(ClientConfig),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Signaling server WebSocket URL
    #[arg(long, env = "SIGNALING_URL", default_value = "ws://127.0.0.1:4000")]
    pub url: String,

    #[arg(long, env = "ROOM")]
    pub room: String,

    #[arg(long = "name", env = "DISPLAY_NAME")]
    pub display_name: String,

    /// Participant id used for addressing (random when omitted)
    #[arg(long, env = "PEER_ID")]
    pub peer_id: Option<String>,

    /// STUN/TURN server URL, repeatable
    #[arg(long = "ice-server", value_name = "URL")]
    pub ice_servers: Vec<String>,

    #[arg(long)]
    pub no_audio: bool,

    #[arg(long)]
    pub video: bool,
}

impl ClientConfig {
    pub fn peer_id(&self) -> String {
        self.peer_id
            .clone()
            .unwrap_or_else(|| format!("user-{}", rand::random::<u32>()))
    }

    pub fn ice_servers(&self) -> Vec<String> {
        if self.ice_servers.is_empty() {
            DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.ice_servers.clone()
        }
    }

    pub fn media(&self) -> MediaConfig {
        MediaConfig {
            audio: !self.no_audio,
            video: self.video,
            ..Default::default()
        }
    }
}
