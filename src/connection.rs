use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Negotiation state of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Idle,
    LocalOfferSent,
    RemoteOfferReceived,
    Stable,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "Idle"),
            LinkState::LocalOfferSent => write!(f, "LocalOfferSent"),
            LinkState::RemoteOfferReceived => write!(f, "RemoteOfferReceived"),
            LinkState::Stable => write!(f, "Stable"),
            LinkState::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub display_name: Option<String>,
    /// Remote tracks received so far, as `(track_id, kind)` pairs.
    pub remote_tracks: Vec<(String, String)>,
    /// Last state reported by the connection object itself.
    pub transport_state: Option<String>,
}

impl LinkStatus {
    pub fn new(state: LinkState, display_name: Option<String>) -> Self {
        Self {
            state,
            display_name,
            remote_tracks: Vec::new(),
            transport_state: None,
        }
    }
}

/// What a participant shows about its call: one entry per remote peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub links: BTreeMap<String, LinkStatus>,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn link(&self, remote_id: &str) -> Option<&LinkStatus> {
        self.links.get(remote_id)
    }

    /// Links that are not closed.
    pub fn active_links(&self) -> impl Iterator<Item = (&String, &LinkStatus)> {
        self.links
            .iter()
            .filter(|(_, status)| status.state != LinkState::Closed)
    }
}

#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    receiver: watch::Receiver<SessionStatus>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(SessionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update_link(&self, remote_id: &str, state: LinkState, display_name: Option<&str>) {
        self.status.send_modify(|status| {
            let entry = status
                .links
                .entry(remote_id.to_string())
                .or_insert_with(|| LinkStatus::new(state, None));
            entry.state = state;
            if let Some(name) = display_name {
                entry.display_name = Some(name.to_string());
            }
            if state == LinkState::Closed {
                entry.remote_tracks.clear();
            }
        });
    }

    pub fn add_remote_track(&self, remote_id: &str, track_id: String, kind: String) {
        self.status.send_modify(|status| {
            if let Some(entry) = status.links.get_mut(remote_id) {
                entry.remote_tracks.push((track_id, kind));
            }
        });
    }

    pub fn update_transport_state(&self, remote_id: &str, state: String) {
        self.status.send_modify(|status| {
            if let Some(entry) = status.links.get_mut(remote_id) {
                entry.transport_state = Some(state);
            }
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    /// Drops the entries of closed links. Open links are kept.
    pub fn prune_closed(&self) {
        self.status.send_modify(|status| {
            status
                .links
                .retain(|_, link| link.state != LinkState::Closed);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.receiver.clone()
    }

    pub fn snapshot(&self) -> SessionStatus {
        self.receiver.borrow().clone()
    }
}
