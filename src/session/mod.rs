mod manager;
mod peer_link;

pub use manager::PeerSessionManager;
pub use peer_link::PeerLink;
