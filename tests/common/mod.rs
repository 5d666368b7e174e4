#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use webrtc_rooms::hub::{ConnectionId, SignalingHub};
use webrtc_rooms::media::{LocalMedia, MediaConfig};
use webrtc_rooms::peer::PeerEvent;
use webrtc_rooms::session::PeerSessionManager;
use webrtc_rooms::signaling::{ServerMessage, SignalingMessage};
use webrtc_rooms::testing::{FakeConnector, FakeMediaSource};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Hub connection with no session manager behind it.
pub struct RawConnection {
    pub conn: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl RawConnection {
    pub fn connect(hub: &mut SignalingHub) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        hub.connect(conn, tx);
        Self { conn, rx }
    }

    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// A session manager wired to an in-process hub through fakes.
pub struct Participant {
    pub id: String,
    pub conn: ConnectionId,
    pub manager: PeerSessionManager,
    pub connector: Arc<FakeConnector>,
    pub source: Arc<FakeMediaSource>,
    /// Every envelope the hub delivered, in order.
    pub received: Vec<ServerMessage>,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
    outbound: mpsc::UnboundedReceiver<SignalingMessage>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl Participant {
    pub fn new(hub: &mut SignalingHub, id: &str) -> Self {
        Self::with_connector(hub, id, FakeConnector::new().with_local_candidates())
    }

    pub fn with_connector(hub: &mut SignalingHub, id: &str, connector: FakeConnector) -> Self {
        let (hub_tx, inbox) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        hub.connect(conn, hub_tx);

        let connector = Arc::new(connector);
        let source = Arc::new(FakeMediaSource::new());
        let media = Arc::new(LocalMedia::new(source.clone(), MediaConfig::default()));
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (manager, events) = PeerSessionManager::new(
            id,
            format!("{} name", id),
            connector.clone(),
            media,
            out_tx,
        );

        Self {
            id: id.to_string(),
            conn,
            manager,
            connector,
            source,
            received: Vec::new(),
            inbox,
            outbound,
            events,
        }
    }

    pub fn received_kinds(&self) -> Vec<&'static str> {
        self.received.iter().map(ServerMessage::kind).collect()
    }

    /// Moves queued envelopes and events one hop. Returns whether anything moved.
    async fn step(&mut self, hub: &mut SignalingHub) -> bool {
        let mut moved = false;
        while let Ok(msg) = self.outbound.try_recv() {
            hub.handle(self.conn, msg);
            moved = true;
        }
        while let Ok(msg) = self.inbox.try_recv() {
            self.received.push(msg.clone());
            self.manager.handle_server_message(msg).await;
            moved = true;
        }
        while let Ok(event) = self.events.try_recv() {
            self.manager.handle_peer_event(event).await;
            moved = true;
        }
        moved
    }
}

/// Runs every participant until no envelope or event is left in flight.
pub async fn pump(hub: &mut SignalingHub, participants: &mut [&mut Participant]) {
    loop {
        let mut moved = false;
        for participant in participants.iter_mut() {
            moved |= participant.step(hub).await;
        }
        if !moved {
            break;
        }
    }
}
