use super::peer_link::PeerLink;
use crate::connection::{ConnectionMonitor, LinkState};
use crate::error::{Error, Result};
use crate::media::LocalMedia;
use crate::peer::{PeerConnector, PeerEvent, PeerEventKind, PeerEventSink};
use crate::signaling::{IceCandidate, ServerMessage, SessionDescription, SignalingMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives offer/answer/candidate exchange with every remote participant of
/// the local participant's room.
///
/// Owned by a single task: every entry point takes `&mut self` and runs to
/// completion before the next event is handled.
pub struct PeerSessionManager {
    local_id: String,
    display_name: String,
    room_id: Option<String>,
    connector: Arc<dyn PeerConnector>,
    media: Arc<LocalMedia>,
    outbound: mpsc::UnboundedSender<SignalingMessage>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    links: HashMap<String, PeerLink>,
    /// Candidates from remotes that have no link yet, in arrival order.
    early_candidates: HashMap<String, Vec<IceCandidate>>,
    /// Remotes whose link failed; their candidates are dropped until a
    /// fresh offer or `new-participant` arrives.
    abandoned: HashSet<String>,
    next_generation: u64,
    monitor: ConnectionMonitor,
}

impl PeerSessionManager {
    /// Returns the manager and the receiver its connection objects report
    /// to. Feed that receiver back through [`Self::handle_peer_event`].
    pub fn new(
        local_id: impl Into<String>,
        display_name: impl Into<String>,
        connector: Arc<dyn PeerConnector>,
        media: Arc<LocalMedia>,
        outbound: mpsc::UnboundedSender<SignalingMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            local_id: local_id.into(),
            display_name: display_name.into(),
            room_id: None,
            connector,
            media,
            outbound,
            events_tx,
            links: HashMap::new(),
            early_candidates: HashMap::new(),
            abandoned: HashSet::new(),
            next_generation: 0,
            monitor: ConnectionMonitor::new(),
        };
        (manager, events_rx)
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn room(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn link(&self, remote_id: &str) -> Option<&PeerLink> {
        self.links.get(remote_id)
    }

    pub fn link_state(&self, remote_id: &str) -> Option<LinkState> {
        self.links.get(remote_id).map(PeerLink::state)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Remote candidates waiting for `remote_id`'s remote description.
    pub fn pending_candidates(&self, remote_id: &str) -> usize {
        match self.links.get(remote_id) {
            Some(link) => link.pending_candidates(),
            None => self.early_candidates.get(remote_id).map_or(0, Vec::len),
        }
    }

    pub async fn join(&mut self, room_id: impl Into<String>) -> Result<()> {
        let room_id = room_id.into();
        info!(room = %room_id, peer = %self.local_id, "Joining room");
        self.room_id = Some(room_id.clone());
        self.send(SignalingMessage::JoinRoom {
            room_id,
            peer_id: self.local_id.clone(),
            display_name: self.display_name.clone(),
        })
    }

    /// Captures local media ahead of any negotiation.
    pub async fn start_call(&mut self) -> Result<()> {
        match self.media.ensure().await {
            Ok(stream) => {
                info!(stream = stream.id(), "Call started");
                Ok(())
            }
            Err(e) => {
                warn!("Could not start call: {}", e);
                self.monitor.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Closes every link, stops local capture and leaves the room.
    pub async fn end_call(&mut self) -> Result<()> {
        let mut links: Vec<PeerLink> = self.links.drain().map(|(_, link)| link).collect();
        futures::future::join_all(links.iter_mut().map(|link| link.close())).await;
        for link in &links {
            self.monitor
                .update_link(link.remote_id(), LinkState::Closed, None);
        }
        self.early_candidates.clear();
        self.abandoned.clear();
        self.monitor.prune_closed();
        info!(closed = links.len(), "Call ended");

        self.media.release().await;

        match self.room_id.take() {
            Some(room) => {
                debug!(%room, "Leaving room");
                self.send(SignalingMessage::Leave {
                    peer_id: self.local_id.clone(),
                })
            }
            None => Ok(()),
        }
    }

    pub async fn handle_server_message(&mut self, msg: ServerMessage) {
        debug!(kind = msg.kind(), "Handling signaling message");
        if self.room_id.is_none() && !matches!(msg, ServerMessage::ParticipantLeft { .. }) {
            debug!(kind = msg.kind(), "Not in a room, ignoring signaling message");
            return;
        }
        match msg {
            ServerMessage::NewParticipant {
                peer_id,
                display_name,
            } => {
                if self.is_local(&peer_id) {
                    return;
                }
                let result = self.on_new_participant(&peer_id, display_name).await;
                self.settle(&peer_id, result).await;
            }
            ServerMessage::Offer { sdp, from_peer } => {
                if self.is_local(&from_peer) {
                    return;
                }
                let result = self.on_offer(&from_peer, sdp).await;
                self.settle(&from_peer, result).await;
            }
            ServerMessage::Answer { sdp, from_peer } => {
                if self.is_local(&from_peer) {
                    return;
                }
                let result = self.on_answer(&from_peer, sdp).await;
                self.settle(&from_peer, result).await;
            }
            ServerMessage::Candidate {
                candidate,
                from_peer,
            } => {
                if self.is_local(&from_peer) {
                    return;
                }
                let result = self.on_remote_candidate(&from_peer, candidate).await;
                self.settle(&from_peer, result).await;
            }
            ServerMessage::ParticipantLeft { peer_id } => {
                info!(remote = %peer_id, "Participant left");
                self.early_candidates.remove(&peer_id);
                self.abandoned.remove(&peer_id);
                self.close_link(&peer_id).await;
            }
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            remote_id,
            generation,
            kind,
        } = event;

        let Some(link) = self.links.get_mut(&remote_id) else {
            debug!(remote = %remote_id, "Event for a link that no longer exists");
            return;
        };
        if link.generation() != generation {
            debug!(
                remote = %remote_id,
                generation,
                current = link.generation(),
                "Discarding event from superseded connection"
            );
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let msg = SignalingMessage::Candidate {
                    candidate,
                    from_peer: self.local_id.clone(),
                    to_peer: remote_id.clone(),
                };
                if let Err(e) = self.send(msg) {
                    warn!(remote = %remote_id, "Failed to relay local candidate: {}", e);
                }
            }
            PeerEventKind::RemoteTrack { track_id, kind } => {
                info!(remote = %remote_id, %track_id, %kind, "Remote track attached");
                link.record_remote_track(track_id.clone());
                self.monitor.add_remote_track(&remote_id, track_id, kind);
            }
            PeerEventKind::StateChanged(state) => {
                self.monitor.update_transport_state(&remote_id, state);
            }
        }
    }

    async fn on_new_participant(&mut self, remote_id: &str, display_name: String) -> Result<()> {
        info!(remote = %remote_id, name = %display_name, "New participant, sending offer");
        self.abandoned.remove(remote_id);
        // Anything it sent before joining belongs to no negotiation of ours.
        self.early_candidates.remove(remote_id);
        if self.links.contains_key(remote_id) {
            self.close_link(remote_id).await;
        }
        self.open_link(remote_id, Some(display_name)).await?;

        let stream = self.media.ensure().await?;
        let link = self.link_mut(remote_id)?;
        link.attach_local_tracks(&stream).await?;

        let offer = link.connection().create_offer().await?;
        link.connection().set_local_description(offer.clone()).await?;
        link.set_state(LinkState::LocalOfferSent);
        self.monitor
            .update_link(remote_id, LinkState::LocalOfferSent, None);

        self.send(SignalingMessage::Offer {
            sdp: offer,
            from_peer: self.local_id.clone(),
            to_peer: remote_id.to_string(),
        })
    }

    async fn on_offer(&mut self, remote_id: &str, sdp: SessionDescription) -> Result<()> {
        self.abandoned.remove(remote_id);
        let display_name = match self.links.get(remote_id) {
            Some(link) => {
                info!(remote = %remote_id, state = %link.state(), "Offer on an existing link, rebuilding");
                let name = link.display_name().map(str::to_string);
                self.close_link(remote_id).await;
                name
            }
            None => None,
        };
        self.open_link(remote_id, display_name).await?;

        let early = self.early_candidates.remove(remote_id).unwrap_or_default();
        let link = self.link_mut(remote_id)?;
        link.queue_candidates(early);
        link.set_state(LinkState::RemoteOfferReceived);
        self.monitor
            .update_link(remote_id, LinkState::RemoteOfferReceived, None);

        let link = self.link_mut(remote_id)?;
        link.apply_remote_description(sdp).await?;

        let stream = self.media.ensure().await?;
        let link = self.link_mut(remote_id)?;
        link.attach_local_tracks(&stream).await?;

        let answer = link.connection().create_answer().await?;
        link.connection()
            .set_local_description(answer.clone())
            .await?;
        link.set_state(LinkState::Stable);
        self.monitor.update_link(remote_id, LinkState::Stable, None);

        self.send(SignalingMessage::Answer {
            sdp: answer,
            from_peer: self.local_id.clone(),
            to_peer: remote_id.to_string(),
        })
    }

    async fn on_answer(&mut self, remote_id: &str, sdp: SessionDescription) -> Result<()> {
        let Some(link) = self.links.get_mut(remote_id) else {
            warn!(remote = %remote_id, "Received answer with no matching offer");
            return Ok(());
        };
        if link.state() != LinkState::LocalOfferSent {
            warn!(remote = %remote_id, state = %link.state(), "Received answer in incorrect state");
            return Ok(());
        }

        link.apply_remote_description(sdp).await?;
        link.set_state(LinkState::Stable);
        self.monitor.update_link(remote_id, LinkState::Stable, None);
        Ok(())
    }

    async fn on_remote_candidate(&mut self, remote_id: &str, candidate: IceCandidate) -> Result<()> {
        if let Some(link) = self.links.get_mut(remote_id) {
            if link.add_remote_candidate(candidate).await? {
                debug!(remote = %remote_id, "Applied remote candidate");
            } else {
                debug!(remote = %remote_id, pending = link.pending_candidates(), "Buffered remote candidate");
            }
            return Ok(());
        }

        if self.abandoned.contains(remote_id) {
            debug!(remote = %remote_id, "Dropping candidate for an abandoned link");
            return Ok(());
        }

        // No connection is created until the offer arrives.
        let pending = self.early_candidates.entry(remote_id.to_string()).or_default();
        pending.push(candidate);
        debug!(remote = %remote_id, pending = pending.len(), "Buffered candidate ahead of offer");
        Ok(())
    }

    async fn open_link(&mut self, remote_id: &str, display_name: Option<String>) -> Result<()> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = PeerEventSink::new(remote_id.to_string(), generation, self.events_tx.clone());
        let connection = self.connector.connect(sink).await?;

        self.monitor
            .update_link(remote_id, LinkState::Idle, display_name.as_deref());
        self.links.insert(
            remote_id.to_string(),
            PeerLink::new(remote_id, generation, display_name, connection),
        );
        debug!(remote = %remote_id, generation, "Opened peer link");
        Ok(())
    }

    /// Closes and forgets the link. Unknown ids are ignored.
    async fn close_link(&mut self, remote_id: &str) {
        if let Some(mut link) = self.links.remove(remote_id) {
            link.close().await;
            self.monitor.update_link(remote_id, LinkState::Closed, None);
            info!(remote = %remote_id, generation = link.generation(), "Closed peer link");
        }
    }

    /// Abandons the link a failed handler was working on.
    async fn settle(&mut self, remote_id: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!(remote = %remote_id, "Negotiation failed, closing link: {}", e);
            self.monitor.set_error(format!("{}: {}", remote_id, e));
            self.early_candidates.remove(remote_id);
            self.abandoned.insert(remote_id.to_string());
            self.close_link(remote_id).await;
        }
    }

    fn link_mut(&mut self, remote_id: &str) -> Result<&mut PeerLink> {
        self.links
            .get_mut(remote_id)
            .ok_or_else(|| Error::Negotiation(format!("No peer link for {}", remote_id)))
    }

    fn is_local(&self, peer_id: &str) -> bool {
        if peer_id == self.local_id {
            debug!("Ignoring signaling message from self");
            return true;
        }
        false
    }

    fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.outbound.send(msg).map_err(|e| {
            Error::Signaling(format!("Signaling channel closed, dropped {}", e.0.kind()))
        })
    }
}
