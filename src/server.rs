//! WebSocket listener in front of the [`SignalingHub`].

use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::{ConnectionId, SignalingHub};
use crate::signaling::{ServerMessage, SignalingMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Hub shared by every connection task. Never locked across an `.await`.
pub type SharedHub = Arc<Mutex<SignalingHub>>;

pub struct SignalingServer {
    listener: TcpListener,
    hub: SharedHub,
}

impl SignalingServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!(addr = %listener.local_addr()?, "Signaling server listening");
        Ok(Self {
            listener,
            hub: Arc::new(Mutex::new(SignalingHub::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> SharedHub {
        Arc::clone(&self.hub)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let hub = Arc::clone(&self.hub);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub).await {
                    warn!(%addr, "Connection ended with error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: SharedHub) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let conn = ConnectionId::new();
    info!(connection = %conn, %addr, "WebSocket connection established");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    hub.lock().connect(conn, tx);

    // Ends once the hub drops this connection's sender.
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(connection = %conn, "Failed to encode {}: {}", msg.kind(), e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                debug!(connection = %conn, "Socket write failed: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let result = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(msg) => {
                        hub.lock().handle(conn, msg);
                    }
                    Err(e) => warn!(connection = %conn, "Ignoring undecodable frame: {}", e),
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(connection = %conn, "WebSocket connection closed by client");
                break Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(e.into()),
        }
    };

    hub.lock().disconnect(conn);
    if let Err(e) = forward_task.await {
        debug!(connection = %conn, "Forward task ended abnormally: {}", e);
    }

    result
}
