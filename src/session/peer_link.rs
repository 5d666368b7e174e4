use crate::connection::LinkState;
use crate::error::Result;
use crate::media::LocalStream;
use crate::peer::PeerConnection;
use crate::signaling::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tracing::{debug, warn};

/// One remote participant, its connection object and the candidates that
/// arrived before its remote description.
pub struct PeerLink {
    remote_id: String,
    generation: u64,
    display_name: Option<String>,
    connection: Arc<dyn PeerConnection>,
    state: LinkState,
    tracks_attached: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    remote_tracks: Vec<String>,
}

impl PeerLink {
    pub fn new(
        remote_id: impl Into<String>,
        generation: u64,
        display_name: Option<String>,
        connection: Arc<dyn PeerConnection>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            generation,
            display_name,
            connection,
            state: LinkState::Idle,
            tracks_attached: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            remote_tracks: Vec::new(),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn set_state(&mut self, state: LinkState) {
        debug!(remote = %self.remote_id, from = %self.state, to = %state, "Link state change");
        self.state = state;
    }

    pub fn tracks_attached(&self) -> bool {
        self.tracks_attached
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn remote_tracks(&self) -> &[String] {
        &self.remote_tracks
    }

    /// Takes over candidates that arrived before this link existed. They
    /// are replayed ahead of any added later.
    pub fn queue_candidates(&mut self, candidates: Vec<IceCandidate>) {
        if candidates.is_empty() {
            return;
        }
        let mut queued = candidates;
        queued.append(&mut self.pending_candidates);
        self.pending_candidates = queued;
    }

    pub fn record_remote_track(&mut self, track_id: String) {
        self.remote_tracks.push(track_id);
    }

    /// Adds the local tracks to the connection. Only the first call has an
    /// effect.
    pub async fn attach_local_tracks(&mut self, stream: &LocalStream) -> Result<()> {
        if self.tracks_attached {
            return Ok(());
        }
        for track in stream.tracks() {
            self.connection.add_track(Arc::clone(track)).await?;
        }
        self.tracks_attached = true;
        Ok(())
    }

    /// Applies `desc` as the remote description, then replays the buffered
    /// candidates in arrival order. Returns how many were replayed.
    pub async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<usize> {
        self.connection.set_remote_description(desc).await?;
        self.remote_description_set = true;

        let pending = std::mem::take(&mut self.pending_candidates);
        let flushed = pending.len();
        for candidate in pending {
            self.connection.add_ice_candidate(candidate).await?;
        }
        if flushed > 0 {
            debug!(remote = %self.remote_id, flushed, "Replayed buffered candidates");
        }
        Ok(flushed)
    }

    /// Applies the candidate now if the remote description is set, buffers
    /// it otherwise. Returns `true` when it was applied.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<bool> {
        if self.remote_description_set {
            self.connection.add_ice_candidate(candidate).await?;
            Ok(true)
        } else {
            self.pending_candidates.push(candidate);
            Ok(false)
        }
    }

    pub async fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
        self.remote_tracks.clear();
        if let Err(e) = self.connection.close().await {
            warn!(remote = %self.remote_id, "Error closing peer connection: {}", e);
        }
    }
}
