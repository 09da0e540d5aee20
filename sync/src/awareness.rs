//! Ephemeral per-client presence for a room.
//!
//! Awareness state is not part of the document: it is never persisted and
//! lives only as long as the peer is reachable. Each replica owns one JSON
//! state (cursor, user name, selection, ...) and learns the others' through
//! [`SyncMessage::Awareness`](crate::SyncMessage::Awareness). A replica that
//! says goodbye, or whose state is set to `None`, disappears from the map.
//!
//! The local client is always counted while it has a state, which it has
//! from construction (`{}`).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use tandem_engine::{ClientId, Origin};

/// One client's presence state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    pub state: Json,
    pub updated_at: DateTime<Utc>,
}

/// Which clients a presence update touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AwarenessChange {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
    pub origin: Option<Origin>,
}

impl AwarenessChange {
    fn from(origin: Origin) -> Self {
        Self {
            origin: Some(origin),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

/// Presence states of the clients in a room, keyed by client id.
#[derive(Debug)]
pub struct Awareness {
    client: ClientId,
    states: RwLock<BTreeMap<ClientId, PeerPresence>>,
}

impl Awareness {
    pub fn new(client: ClientId) -> Self {
        let mut states = BTreeMap::new();
        states.insert(
            client,
            PeerPresence {
                state: Json::Object(Map::new()),
                updated_at: Utc::now(),
            },
        );
        Self {
            client,
            states: RwLock::new(states),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// The local state, `None` once it has been cleared.
    pub fn local_state(&self) -> Option<Json> {
        self.get(self.client)
    }

    /// Replace the local state. `None` withdraws the local client. Returns
    /// the change, or `None` when the state is unchanged.
    pub fn set_local_state(&self, state: Option<Json>) -> Option<AwarenessChange> {
        self.put(self.client, state, Origin::Local)
    }

    /// Set one field of the local state, turning a non-object state into an
    /// object first.
    pub fn set_local_field(&self, field: &str, value: Json) -> Option<AwarenessChange> {
        let mut state = match self.local_state() {
            Some(Json::Object(map)) => map,
            _ => Map::new(),
        };
        state.insert(field.to_string(), value);
        self.set_local_state(Some(Json::Object(state)))
    }

    /// Apply a state received from `client`.
    pub fn apply_remote(&self, client: ClientId, state: Option<Json>) -> Option<AwarenessChange> {
        if client == self.client {
            tracing::debug!(client, "Ignoring remote awareness for the local client");
            return None;
        }
        self.put(client, state, Origin::Remote)
    }

    /// Forget `clients`, e.g. after they left.
    pub fn remove(&self, clients: &[ClientId]) -> Option<AwarenessChange> {
        let mut change = AwarenessChange::from(Origin::Remote);
        let mut states = self.states.write();
        for client in clients {
            if *client != self.client && states.remove(client).is_some() {
                change.removed.push(*client);
            }
        }
        change.non_empty()
    }

    /// Forget every remote client, keeping the local state.
    pub fn clear_remote(&self) -> Option<AwarenessChange> {
        let mut change = AwarenessChange::from(Origin::Remote);
        self.states.write().retain(|client, _| {
            let keep = *client == self.client;
            if !keep {
                change.removed.push(*client);
            }
            keep
        });
        change.non_empty()
    }

    pub fn get(&self, client: ClientId) -> Option<Json> {
        self.states.read().get(&client).map(|p| p.state.clone())
    }

    pub fn updated_at(&self, client: ClientId) -> Option<DateTime<Utc>> {
        self.states.read().get(&client).map(|p| p.updated_at)
    }

    /// Every known state, the local one included.
    pub fn states(&self) -> BTreeMap<ClientId, Json> {
        self.states
            .read()
            .iter()
            .map(|(client, presence)| (*client, presence.state.clone()))
            .collect()
    }

    /// Number of clients with a state, the local one included.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    fn put(&self, client: ClientId, state: Option<Json>, origin: Origin) -> Option<AwarenessChange> {
        let mut change = AwarenessChange::from(origin);
        let mut states = self.states.write();
        match state {
            None => {
                if states.remove(&client).is_some() {
                    change.removed.push(client);
                }
            }
            Some(state) => {
                let previous = states.insert(
                    client,
                    PeerPresence {
                        state: state.clone(),
                        updated_at: Utc::now(),
                    },
                );
                match previous {
                    None => change.added.push(client),
                    Some(old) if old.state != state => change.updated.push(client),
                    // same content; keep the original timestamp
                    Some(old) => {
                        states.insert(client, old);
                    }
                }
            }
        }
        change.non_empty()
    }
}
