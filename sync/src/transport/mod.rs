//! Peer transport.
//!
//! A [`PeerTransport`] moves [`Envelope`]s between the replicas of a room and
//! reports link status as [`TransportEvent`]s. The
//! [`PeerTransportManager`] drives one transport per room: it connects,
//! reconciles status, retries with backoff and runs the sync handshake.
//!
//! Two transports ship:
//! - [`MemoryNetwork`] / [`MemoryTransport`]: an in-process hub, the
//!   equivalent of same-host tab channels
//! - [`WsTransport`]: a WebSocket client of `tandem-server`'s topic relay

mod manager;
mod memory;
mod ws;

pub use manager::{ConnectionState, PeerTransportManager};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use ws::{WsTransport, WsTransportFactory};

use crate::config::PeerDiscoveryConfig;
use crate::error::Result;
use crate::protocol::Envelope;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of a transport's event channel.
pub(crate) const EVENT_CAPACITY: usize = 1024;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(Envelope),
}

/// A link between the replicas of one room.
pub trait PeerTransport: Send + Sync {
    /// Join `room` through the first reachable endpoint. Transient failures
    /// are [`Error::Transport`](crate::Error::Transport).
    fn connect<'a>(&'a self, room: &'a str, endpoints: &'a [String]) -> BoxFuture<'a, Result<()>>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Deliver to the other replicas in the room.
    fn send(&self, envelope: &Envelope) -> Result<()>;

    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Builds transports for rooms. A failure here is a provider init error and
/// is not retried.
pub trait TransportFactory: Send + Sync {
    fn create(&self, room: &str, discovery: &PeerDiscoveryConfig) -> Result<Arc<dyn PeerTransport>>;
}
