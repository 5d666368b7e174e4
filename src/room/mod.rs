//! Room membership records owned by the signaling hub.

mod state;

pub use state::Room;
