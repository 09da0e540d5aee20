//! Wire messages.
//!
//! Replicas exchange [`Envelope`]s. Over the rendezvous server an envelope
//! travels as the `data` of a topic publish, so the relay framing lives here
//! too.

use serde::{Deserialize, Serialize};
use tandem_engine::{ClientId, Op, StateVector};

/// Replica-to-replica sync message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Announce presence.
    Hello { client: ClientId },
    /// "This is what I have"; answered with `SyncStep2`.
    SyncStep1 { state_vector: StateVector },
    /// Operations the requester was missing.
    SyncStep2 { ops: Vec<Op> },
    /// Freshly made local operations.
    Update { ops: Vec<Op> },
    /// Leaving the room.
    Bye { client: ClientId },
    /// Presence state of `client`; `None` withdraws it.
    Awareness {
        client: ClientId,
        #[serde(default)]
        state: Option<serde_json::Value>,
    },
}

/// Addressing around a [`SyncMessage`]. `to: None` is a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ClientId>,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn broadcast(from: ClientId, message: SyncMessage) -> Self {
        Self {
            from,
            to: None,
            message,
        }
    }

    pub fn direct(from: ClientId, to: ClientId, message: SyncMessage) -> Self {
        Self {
            from,
            to: Some(to),
            message,
        }
    }

    /// Whether a replica with id `client` should handle this envelope.
    pub fn is_for(&self, client: ClientId) -> bool {
        self.from != client && self.to.map_or(true, |to| to == client)
    }
}

/// Messages sent to the rendezvous server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Publish {
        topic: String,
        data: serde_json::Value,
    },
    Ping,
}

/// Messages received from the rendezvous server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Publish {
        topic: String,
        data: serde_json::Value,
        #[serde(default)]
        clients: usize,
    },
    Pong,
    Error { message: String },
}
