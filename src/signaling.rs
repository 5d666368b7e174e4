use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Grace period for flushing queued frames when the client shuts down.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description in the browser `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network candidate in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Envelopes sent by a participant to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    JoinRoom {
        room_id: String,
        peer_id: String,
        display_name: String,
    },
    Offer {
        sdp: SessionDescription,
        from_peer: String,
        to_peer: String,
    },
    Answer {
        sdp: SessionDescription,
        from_peer: String,
        to_peer: String,
    },
    Candidate {
        candidate: IceCandidate,
        from_peer: String,
        to_peer: String,
    },
    Leave {
        peer_id: String,
    },
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Leave { .. } => "leave",
        }
    }
}

/// Envelopes delivered by the hub to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum ServerMessage {
    NewParticipant {
        peer_id: String,
        display_name: String,
    },
    Offer {
        sdp: SessionDescription,
        from_peer: String,
    },
    Answer {
        sdp: SessionDescription,
        from_peer: String,
    },
    Candidate {
        candidate: IceCandidate,
        from_peer: String,
    },
    ParticipantLeft {
        peer_id: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewParticipant { .. } => "new-participant",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::ParticipantLeft { .. } => "participant-left",
        }
    }
}

/// WebSocket connection to the signaling hub.
///
/// Outgoing envelopes are queued on an unbounded channel and written by a
/// background task, so producers (the session manager) never block.
pub struct SignalingClient {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    rx: mpsc::Receiver<ServerMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!(url, "Connected to signaling server");
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut outgoing_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (incoming_tx, rx) = mpsc::channel(100);

        // Handle outgoing messages
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", msg.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    warn!("Signaling socket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(signal) => {
                            if incoming_tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring undecodable signaling frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Signaling server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            tx,
            rx,
            writer,
            reader,
        })
    }

    /// Handle for queueing envelopes from other components.
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalingMessage> {
        self.tx.clone()
    }

    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }

    /// Next envelope from the hub, or `None` once the connection is gone.
    pub async fn receive(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Stops reading and flushes whatever is still queued for the hub.
    ///
    /// The writer only finishes once every [`SignalingClient::sender`] clone
    /// has been dropped.
    pub async fn close(self) {
        let Self {
            tx, writer, reader, ..
        } = self;
        drop(tx);
        reader.abort();
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
            debug!("Signaling writer still busy after close timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let msg = SignalingMessage::JoinRoom {
            room_id: "R1".to_string(),
            peer_id: "p1".to_string(),
            display_name: "Ada".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "message_type": "join-room",
                "room_id": "R1",
                "peer_id": "p1",
                "display_name": "Ada"
            })
        );
        assert_eq!(msg.kind(), "join-room");
    }

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let msg = SignalingMessage::Candidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
            from_peer: "p1".to_string(),
            to_peer: "p2".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["message_type"], "candidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
        assert!(value["candidate"].get("usernameFragment").is_none());
    }

    #[test]
    fn test_parses_browser_offer() {
        let text = r#"{
            "message_type": "offer",
            "sdp": {"type": "offer", "sdp": "v=0\r\n"},
            "from_peer": "p1",
            "to_peer": "p2"
        }"#;
        let msg: SignalingMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Offer {
                sdp: SessionDescription::offer("v=0\r\n"),
                from_peer: "p1".to_string(),
                to_peer: "p2".to_string(),
            }
        );
    }

    #[test]
    fn test_server_message_kinds() {
        let left = ServerMessage::ParticipantLeft {
            peer_id: "p1".to_string(),
        };
        let value = serde_json::to_value(&left).unwrap();
        assert_eq!(value["message_type"], "participant-left");
        assert_eq!(left.kind(), "participant-left");

        let joined: ServerMessage = serde_json::from_value(json!({
            "message_type": "new-participant",
            "peer_id": "p2",
            "display_name": "Grace"
        }))
        .unwrap();
        assert_eq!(joined.kind(), "new-participant");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_value::<SignalingMessage>(json!({
            "message_type": "ready"
        }));
        assert!(result.is_err());
    }
}
