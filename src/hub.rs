//! Room membership and envelope routing for the signaling server.
//!
//! The hub is a plain state machine: every operation is a synchronous map
//! mutation followed by pushes onto per-connection unbounded queues, so no
//! call ever blocks. The transport layer owns the sockets and feeds decoded
//! envelopes in through [`SignalingHub::handle`].

use crate::room::Room;
use crate::signaling::{IceCandidate, ServerMessage, SessionDescription, SignalingMessage};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transport-assigned identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of a directed envelope. Only these kinds are routed point to point.
#[derive(Debug, Clone, PartialEq)]
pub enum Directed {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl Directed {
    fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }

    fn into_message(self, from_peer: String) -> ServerMessage {
        match self {
            Self::Offer(sdp) => ServerMessage::Offer { sdp, from_peer },
            Self::Answer(sdp) => ServerMessage::Answer { sdp, from_peer },
            Self::Candidate(candidate) => ServerMessage::Candidate {
                candidate,
                from_peer,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Membership {
    room_id: String,
    peer_id: String,
    display_name: String,
}

struct Connection {
    tx: mpsc::UnboundedSender<ServerMessage>,
    membership: Option<Membership>,
}

#[derive(Default)]
pub struct SignalingHub {
    connections: HashMap<ConnectionId, Connection>,
    /// Participant id -> owning connection, present only while joined.
    participants: HashMap<String, ConnectionId>,
    rooms: HashMap<String, Room>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection and its outbound queue.
    pub fn connect(&mut self, conn: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) {
        if self.connections.contains_key(&conn) {
            warn!(connection = %conn, "Connection registered twice, replacing outbound queue");
            self.disconnect(conn);
        }
        self.connections.insert(
            conn,
            Connection {
                tx,
                membership: None,
            },
        );
        debug!(connection = %conn, total = self.connections.len(), "Connection registered");
    }

    /// Applies one decoded client envelope.
    pub fn handle(&mut self, conn: ConnectionId, msg: SignalingMessage) {
        debug!(connection = %conn, kind = msg.kind(), "Signaling message received");
        match msg {
            SignalingMessage::JoinRoom {
                room_id,
                peer_id,
                display_name,
            } => self.join(conn, &room_id, &peer_id, &display_name),
            SignalingMessage::Offer {
                sdp,
                from_peer,
                to_peer,
            } => {
                self.check_sender(conn, &from_peer);
                self.route(from_peer, &to_peer, Directed::Offer(sdp));
            }
            SignalingMessage::Answer {
                sdp,
                from_peer,
                to_peer,
            } => {
                self.check_sender(conn, &from_peer);
                self.route(from_peer, &to_peer, Directed::Answer(sdp));
            }
            SignalingMessage::Candidate {
                candidate,
                from_peer,
                to_peer,
            } => {
                self.check_sender(conn, &from_peer);
                self.route(from_peer, &to_peer, Directed::Candidate(candidate));
            }
            SignalingMessage::Leave { peer_id } => self.leave(conn, &peer_id),
        }
    }

    /// Adds `peer_id` to `room_id` and announces it to the other members.
    ///
    /// Re-joining with the same room and participant id is a no-op. Joining
    /// another room (or under another id) leaves the current room first.
    pub fn join(&mut self, conn: ConnectionId, room_id: &str, peer_id: &str, display_name: &str) {
        let Some(connection) = self.connections.get(&conn) else {
            warn!(connection = %conn, "Join from unregistered connection ignored");
            return;
        };

        if let Some(current) = &connection.membership {
            if current.room_id == room_id && current.peer_id == peer_id {
                debug!(connection = %conn, room = room_id, peer = peer_id, "Duplicate join ignored");
                return;
            }
        }

        if let Some(owner) = self.participants.get(peer_id) {
            if *owner != conn {
                warn!(
                    connection = %conn,
                    peer = peer_id,
                    "Participant id is bound to another live connection, join rejected"
                );
                return;
            }
        }

        self.leave_current(conn);

        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id.to_string()));
        room.add_peer(peer_id);
        let others: Vec<String> = room.others(peer_id).map(str::to_string).collect();

        self.participants.insert(peer_id.to_string(), conn);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.membership = Some(Membership {
                room_id: room_id.to_string(),
                peer_id: peer_id.to_string(),
                display_name: display_name.to_string(),
            });
        }

        info!(
            connection = %conn,
            room = room_id,
            peer = peer_id,
            members = others.len() + 1,
            "Participant joined room"
        );

        let notice = ServerMessage::NewParticipant {
            peer_id: peer_id.to_string(),
            display_name: display_name.to_string(),
        };
        for other in &others {
            self.deliver(other, notice.clone());
        }
    }

    /// Delivers a directed payload to exactly the connection owning `to_peer`.
    ///
    /// Returns `false` on a routing miss; the envelope is dropped.
    pub fn route(&self, from_peer: String, to_peer: &str, payload: Directed) -> bool {
        let kind = payload.kind();
        let delivered = self.deliver(to_peer, payload.into_message(from_peer));
        if !delivered {
            debug!(kind, to_peer, "Routing miss, envelope dropped");
        }
        delivered
    }

    /// Removes `peer_id` from its room and tells the remaining members.
    ///
    /// Only the participant bound to `conn` can be removed this way.
    pub fn leave(&mut self, conn: ConnectionId, peer_id: &str) {
        let bound = self
            .connections
            .get(&conn)
            .and_then(|c| c.membership.as_ref())
            .map(|m| m.peer_id.clone());

        match bound.as_deref() {
            None => debug!(connection = %conn, "Leave without room membership ignored"),
            Some(bound) if bound != peer_id => warn!(
                connection = %conn,
                peer = peer_id,
                bound,
                "Leave for a participant not owned by this connection ignored"
            ),
            Some(_) => {
                self.leave_current(conn);
            }
        }
    }

    /// Drops every association of `conn`. Safe for connections that never joined.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.leave_current(conn);
        if self.connections.remove(&conn).is_some() {
            debug!(connection = %conn, total = self.connections.len(), "Connection removed");
        }
    }

    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.peers().to_vec())
            .unwrap_or_default()
    }

    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn room_of(&self, peer_id: &str) -> Option<&str> {
        let conn = self.participants.get(peer_id)?;
        self.connections
            .get(conn)?
            .membership
            .as_ref()
            .map(|m| m.room_id.as_str())
    }

    pub fn display_name_of(&self, peer_id: &str) -> Option<&str> {
        let conn = self.participants.get(peer_id)?;
        self.connections
            .get(conn)?
            .membership
            .as_ref()
            .map(|m| m.display_name.as_str())
    }

    /// Participant id `conn` joined under, if it is in a room.
    pub fn bound_participant(&self, conn: ConnectionId) -> Option<&str> {
        self.connections
            .get(&conn)?
            .membership
            .as_ref()
            .map(|m| m.peer_id.as_str())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Directed envelopes are forwarded as sent; a sender id that does not
    /// match the connection's participant is only reported.
    fn check_sender(&self, conn: ConnectionId, from_peer: &str) {
        match self.bound_participant(conn) {
            Some(bound) if bound == from_peer => {}
            Some(bound) => warn!(
                connection = %conn,
                from_peer,
                bound,
                "Directed envelope claims another participant as sender"
            ),
            None => warn!(
                connection = %conn,
                from_peer,
                "Directed envelope from a connection outside any room"
            ),
        }
    }

    fn leave_current(&mut self, conn: ConnectionId) -> Option<Membership> {
        let membership = self.connections.get_mut(&conn)?.membership.take()?;

        if self.participants.get(&membership.peer_id) == Some(&conn) {
            self.participants.remove(&membership.peer_id);
        }

        let mut remaining = Vec::new();
        if let Some(room) = self.rooms.get_mut(&membership.room_id) {
            room.remove_peer(&membership.peer_id);
            remaining = room.peers().to_vec();
            if room.is_empty() {
                debug!(room = room.id(), "Room emptied and removed");
                self.rooms.remove(&membership.room_id);
            }
        }

        info!(
            connection = %conn,
            room = %membership.room_id,
            peer = %membership.peer_id,
            members = remaining.len(),
            "Participant left room"
        );

        let notice = ServerMessage::ParticipantLeft {
            peer_id: membership.peer_id.clone(),
        };
        for other in &remaining {
            self.deliver(other, notice.clone());
        }

        Some(membership)
    }

    fn deliver(&self, peer_id: &str, msg: ServerMessage) -> bool {
        let Some(connection) = self
            .participants
            .get(peer_id)
            .and_then(|conn| self.connections.get(conn))
        else {
            return false;
        };

        if let Err(e) = connection.tx.send(msg) {
            warn!(to_peer = peer_id, kind = e.0.kind(), "Send to closed connection swallowed");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &mut SignalingHub) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        hub.connect(conn, tx);
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_join_creates_room_and_notifies_existing_members() {
        let mut hub = SignalingHub::new();
        let (c1, mut rx1) = connect(&mut hub);
        let (c2, mut rx2) = connect(&mut hub);

        hub.join(c1, "R1", "p1", "Ada");
        assert!(drain(&mut rx1).is_empty());

        hub.join(c2, "R1", "p2", "Grace");
        assert_eq!(
            drain(&mut rx1),
            vec![ServerMessage::NewParticipant {
                peer_id: "p2".to_string(),
                display_name: "Grace".to_string(),
            }]
        );
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(hub.room_members("R1"), vec!["p1", "p2"]);
        assert_eq!(hub.display_name_of("p2"), Some("Grace"));
    }

    #[test]
    fn test_duplicate_join_does_not_renotify() {
        let mut hub = SignalingHub::new();
        let (c1, mut rx1) = connect(&mut hub);
        let (c2, _rx2) = connect(&mut hub);

        hub.join(c1, "R1", "p1", "Ada");
        hub.join(c2, "R1", "p2", "Grace");
        hub.join(c2, "R1", "p2", "Grace");

        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(hub.room_members("R1").len(), 2);
    }

    #[test]
    fn test_route_miss_is_silent() {
        let mut hub = SignalingHub::new();
        let (c1, mut rx1) = connect(&mut hub);
        hub.join(c1, "R1", "p1", "Ada");

        let delivered = hub.route(
            "p1".to_string(),
            "ghost",
            Directed::Offer(SessionDescription::offer("v=0")),
        );
        assert!(!delivered);
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn test_empty_room_is_removed() {
        let mut hub = SignalingHub::new();
        let (c1, _rx1) = connect(&mut hub);
        hub.join(c1, "R1", "p1", "Ada");
        assert_eq!(hub.room_names(), vec!["R1"]);

        hub.leave(c1, "p1");
        assert!(hub.room_names().is_empty());
        assert_eq!(hub.room_of("p1"), None);
        assert_eq!(hub.participant_count(), 0);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_without_join_is_safe() {
        let mut hub = SignalingHub::new();
        let (c1, _rx1) = connect(&mut hub);
        hub.disconnect(c1);
        hub.disconnect(c1);
        hub.leave(c1, "p1");
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_forged_sender_is_still_forwarded_verbatim() {
        let mut hub = SignalingHub::new();
        let (c1, _rx1) = connect(&mut hub);
        let (c2, mut rx2) = connect(&mut hub);
        let (outsider, _rx3) = connect(&mut hub);
        hub.join(c1, "R1", "p1", "Ada");
        hub.join(c2, "R1", "p2", "Grace");

        assert_eq!(hub.bound_participant(c1), Some("p1"));
        assert_eq!(hub.bound_participant(outsider), None);

        for conn in [c1, outsider] {
            hub.handle(
                conn,
                SignalingMessage::Candidate {
                    candidate: IceCandidate::new("c0"),
                    from_peer: "p9".to_string(),
                    to_peer: "p2".to_string(),
                },
            );
        }

        let expected = ServerMessage::Candidate {
            candidate: IceCandidate::new("c0"),
            from_peer: "p9".to_string(),
        };
        assert_eq!(drain(&mut rx2), vec![expected.clone(), expected]);
    }

    #[test]
    fn test_send_to_dropped_receiver_is_swallowed() {
        let mut hub = SignalingHub::new();
        let (c1, rx1) = connect(&mut hub);
        let (c2, _rx2) = connect(&mut hub);
        hub.join(c1, "R1", "p1", "Ada");
        drop(rx1);

        // Announcing p2 to p1 hits a closed queue; the join still succeeds.
        hub.join(c2, "R1", "p2", "Grace");
        assert_eq!(hub.room_members("R1"), vec!["p1", "p2"]);
    }
}
