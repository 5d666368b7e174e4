//! Headless participant: joins a room and negotiates with every member.

use crate::config::ClientConfig;
use crate::connection::SessionStatus;
use crate::error::Result;
use crate::media::{LocalMedia, StaticTrackSource};
use crate::rtc::RtcConnector;
use crate::session::PeerSessionManager;
use crate::signaling::SignalingClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Runs until Ctrl-C or until the signaling connection is lost.
pub async fn run(config: ClientConfig) -> Result<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl-C, ending call");
    })
    .await
}

/// Runs until `shutdown` completes, then ends the call and leaves the room.
pub async fn run_until(config: ClientConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let peer_id = config.peer_id();
    info!(peer = %peer_id, room = %config.room, url = %config.url, "Starting participant");

    let mut signaling = connect_with_retry(&config.url).await?;
    let connector = Arc::new(RtcConnector::new(config.ice_servers()));
    let media = Arc::new(LocalMedia::new(
        Arc::new(StaticTrackSource::new()),
        config.media(),
    ));

    let (mut manager, mut peer_events) = PeerSessionManager::new(
        peer_id,
        config.display_name.clone(),
        connector,
        media,
        signaling.sender(),
    );
    let mut status = manager.monitor().subscribe();

    manager.start_call().await?;
    manager.join(config.room.clone()).await?;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            msg = signaling.receive() => match msg {
                Some(msg) => manager.handle_server_message(msg).await,
                None => {
                    warn!("Signaling connection lost");
                    break;
                }
            },
            Some(event) = peer_events.recv() => {
                manager.handle_peer_event(event).await;
            }
            Ok(()) = status.changed() => {
                let snapshot = status.borrow_and_update().clone();
                info!("{}", summarize(&snapshot));
            }
            _ = &mut shutdown => break,
        }
    }

    if let Err(e) = manager.end_call().await {
        debug!("Leave not delivered: {}", e);
    }
    // The manager holds a sender clone; the writer flushes once it is gone.
    drop(manager);
    signaling.close().await;
    Ok(())
}

async fn connect_with_retry(url: &str) -> Result<SignalingClient> {
    let mut attempt = 1;
    loop {
        match SignalingClient::connect(url).await {
            Ok(client) => return Ok(client),
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(attempt, "Signaling connection failed, retrying: {}", e);
                attempt += 1;
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn summarize(status: &SessionStatus) -> String {
    let links: Vec<String> = status
        .links
        .iter()
        .map(|(remote, link)| {
            let name = link.display_name.as_deref().unwrap_or(remote);
            let transport = link.transport_state.as_deref().unwrap_or("-");
            format!(
                "{} [{} / {}, {} tracks]",
                name,
                link.state,
                transport,
                link.remote_tracks.len()
            )
        })
        .collect();
    if links.is_empty() {
        "No peers".to_string()
    } else {
        format!("Peers: {}", links.join(", "))
    }
}
