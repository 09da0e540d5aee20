//! Events a room publishes to its consumers.
//!
//! Subscribe with [`SyncedRoom::events`](crate::SyncedRoom::events); dropping
//! the receiver unsubscribes. Slow receivers lag and miss events rather than
//! block the room.

use crate::awareness::AwarenessChange;
use crate::transport::ConnectionState;
use serde_json::Value as Json;
use tandem_engine::ClientId;

/// Capacity of a room's event channel.
pub(crate) const ROOM_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The connection state changed. `status` is the display string.
    Status {
        state: ConnectionState,
        status: String,
    },
    /// The set of known peers changed.
    Peers { peers: Vec<ClientId> },
    /// A peer answered our state vector with what we were missing.
    Synced { peer: ClientId },
    /// Presence states were added, updated or removed.
    Awareness(AwarenessChange),
    /// Published by the consumer through `SyncedRoom::emit`.
    Custom { name: String, payload: Json },
}
