//! Room-based WebRTC signaling: a hub that routes offers, answers and
//! candidates between room members, and a participant-side session manager
//! that negotiates one peer connection per remote member.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod media;
pub mod peer;
pub mod room;
pub mod rtc;
pub mod server;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{Error, Result};
