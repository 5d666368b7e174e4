//! Capability interface of the peer-to-peer connection primitive.
//!
//! The session manager only ever talks to connections through these traits;
//! `crate::rtc` provides the production implementation and
//! `crate::testing` an in-memory one.

use crate::error::Result;
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use webrtc::track::track_local::TrackLocal;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()>;

    /// Releases sockets and senders. Must tolerate repeated calls.
    async fn close(&self) -> Result<()>;
}

/// Creates connection objects for remote participants.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    /// A local network candidate was discovered.
    LocalCandidate(IceCandidate),
    /// A remote media track started arriving.
    RemoteTrack { track_id: String, kind: String },
    /// The underlying connection changed state (new, connected, failed, ...).
    StateChanged(String),
}

/// Event emitted by a connection object, tagged with the link it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub remote_id: String,
    pub generation: u64,
    pub kind: PeerEventKind,
}

/// Where a connection object reports its events.
///
/// Every event is stamped with the remote id and link generation the sink was
/// created for, so events from a replaced connection can be told apart.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    remote_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(remote_id: String, generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            remote_id,
            generation,
            tx,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            remote_id: self.remote_id.clone(),
            generation: self.generation,
            kind,
        };
        if self.tx.send(event).is_err() {
            trace!(remote = %self.remote_id, "Peer event dropped, session manager is gone");
        }
    }
}
