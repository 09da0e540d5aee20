//! WebSocket topic relay.
//!
//! Clients subscribe to topics (one per room) and publish opaque payloads
//! that the server forwards to every other subscriber of the topic.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
