use anyhow::Error as AnyhowError;
use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The signaling channel is closed or refused a message.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The connection primitive rejected a description or candidate.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Local capture devices are unavailable or access was denied.
    #[error("Media capture error: {0}")]
    MediaCapture(String),

    #[error("Other error: {0}")]
    Other(#[from] AnyhowError),
}

pub type Result<T> = std::result::Result<T, Error>;
