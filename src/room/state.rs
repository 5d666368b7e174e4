/// A named call session: the participants whose signaling may be broadcast
/// to each other. Members are kept in join order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: String,
    peers: Vec<String>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            peers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `false` when the peer was already a member.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        if self.contains(peer_id) {
            return false;
        }
        self.peers.push(peer_id.to_string());
        true
    }

    /// Returns `false` when the peer was not a member.
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|id| id != peer_id);
        self.peers.len() != before
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.iter().any(|id| id == peer_id)
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Every member except `peer_id`, in join order.
    pub fn others<'a>(&'a self, peer_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.peers
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
