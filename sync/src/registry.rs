//! Per-room replicas and the services rooms are built from.
//!
//! A [`Registry`] is an explicit service: it caches one [`RoomReplica`] and
//! at most one live [`SyncedRoom`] per room key, and carries the collaborators
//! (transport factory, endpoint probe, environment probe, persistence) that
//! new rooms are wired to.

use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::room::SyncedRoom;
use crate::scheduler::{EnvironmentProbe, StaticEnvironment};
use crate::signaling::{EndpointProbe, HttpProbe};
use crate::transport::{TransportFactory, WsTransportFactory};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tandem_engine::{CodecOptions, Doc, MapProxy, Store, Value};

/// Name of the map holding a room's state.
pub fn states_name(room: &str) -> String {
    format!("states-{room}")
}

/// Name of the map holding a room's references.
pub fn refs_name(room: &str) -> String {
    format!("refs-{room}")
}

/// Room keys must be non-empty and free of control characters.
pub fn validate_room_key(room: &str) -> Result<()> {
    if room.is_empty() || room.chars().any(char::is_control) {
        return Err(Error::InvalidRoomKey(room.to_string()));
    }
    Ok(())
}

/// Write `initial` into `map` if, and only if, the map is empty.
///
/// Returns whether anything was written.
pub fn init_defaults(map: &MapProxy, initial: &Value) -> Result<bool> {
    let entries = match initial {
        Value::Null => return Ok(false),
        Value::Object(entries) => entries,
        other => {
            return Err(Error::InvalidOptions(format!(
                "initial state must be an object, got {}",
                other.to_json()
            )))
        }
    };
    if !map.is_empty() || entries.is_empty() {
        return Ok(false);
    }
    for (key, value) in entries {
        map.set(key, value.clone());
    }
    Ok(true)
}

/// The document of one room plus its proxy root and the two top-level maps.
#[derive(Clone)]
pub struct RoomReplica {
    room: String,
    store: Store,
    state: MapProxy,
    refs: MapProxy,
}

impl fmt::Debug for RoomReplica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomReplica")
            .field("room", &self.room)
            .field("client", &self.store.doc().client_id())
            .finish()
    }
}

impl RoomReplica {
    fn build(room: &str, codec: CodecOptions) -> Result<Self> {
        let store = Store::with_options(Doc::new(), codec);
        let state = store.map(&states_name(room))?;
        let refs = store.map(&refs_name(room))?;
        Ok(Self {
            room: room.to_string(),
            store,
            state,
            refs,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn doc(&self) -> &Doc {
        self.store.doc()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The `states-<room>` map.
    pub fn state(&self) -> &MapProxy {
        &self.state
    }

    /// The `refs-<room>` map.
    pub fn refs(&self) -> &MapProxy {
        &self.refs
    }
}

/// Process-wide (or test-wide) cache of rooms.
pub struct Registry {
    replicas: DashMap<String, RoomReplica>,
    rooms: DashMap<String, Arc<SyncedRoom>>,
    transports: Arc<dyn TransportFactory>,
    probe: Arc<dyn EndpointProbe>,
    environment: Arc<dyn EnvironmentProbe>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("replicas", &self.replicas.len())
            .field("rooms", &self.rooms.len())
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry that talks to real signaling servers over WebSocket and
    /// probes them over HTTP.
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
            rooms: DashMap::new(),
            transports: Arc::new(WsTransportFactory::default()),
            probe: Arc::new(HttpProbe::new()),
            environment: Arc::new(StaticEnvironment::default()),
            persistence: None,
        }
    }

    pub fn with_transport(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = factory;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn EndpointProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentProbe>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Wrap in an `Arc` for sharing.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The replica for `room`, built on first access.
    pub fn get_or_create(&self, room: &str) -> Result<RoomReplica> {
        self.get_or_create_with(room, CodecOptions::default())
    }

    pub(crate) fn get_or_create_with(&self, room: &str, codec: CodecOptions) -> Result<RoomReplica> {
        validate_room_key(room)?;
        if let Some(replica) = self.replicas.get(room) {
            return Ok(replica.clone());
        }
        let replica = RoomReplica::build(room, codec)?;
        let replica = self
            .replicas
            .entry(room.to_string())
            .or_insert(replica)
            .clone();
        tracing::debug!(room = %room, client = replica.doc().client_id(), "Room replica created");
        Ok(replica)
    }

    pub fn contains(&self, room: &str) -> bool {
        self.replicas.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.replicas.len()
    }

    /// Live handle for `room`, if one was created.
    pub fn room(&self, room: &str) -> Option<Arc<SyncedRoom>> {
        self.rooms.get(room).map(|entry| entry.value().clone())
    }

    pub(crate) fn rooms(&self) -> &DashMap<String, Arc<SyncedRoom>> {
        &self.rooms
    }

    pub(crate) fn transports(&self) -> &Arc<dyn TransportFactory> {
        &self.transports
    }

    pub(crate) fn probe(&self) -> &Arc<dyn EndpointProbe> {
        &self.probe
    }

    pub(crate) fn environment(&self) -> &Arc<dyn EnvironmentProbe> {
        &self.environment
    }

    pub fn persistence(&self) -> Option<&Arc<dyn Persistence>> {
        self.persistence.as_ref()
    }

    /// Disconnect the room's session and evict its document and proxies.
    /// The next access builds everything afresh.
    pub fn reset_room(&self, room: &str) {
        if let Some((_, handle)) = self.rooms.remove(room) {
            handle.shutdown();
        }
        if let Some((_, replica)) = self.replicas.remove(room) {
            replica.store().clear();
            tracing::info!(room = %room, "Room reset");
        }
    }

    /// Reset every room.
    pub fn teardown(&self) {
        let rooms: Vec<String> = self
            .replicas
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.rooms.iter().map(|entry| entry.key().clone()))
            .collect();
        for room in rooms {
            self.reset_room(&room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = Registry::new();
        let a = registry.get_or_create("board").unwrap();
        let b = registry.get_or_create("board").unwrap();

        assert!(a.doc().ptr_eq(b.doc()));
        assert_eq!(a.state(), b.state());
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_container_names() {
        let registry = Registry::new();
        let replica = registry.get_or_create("board").unwrap();
        replica.state().set("x", 1);
        replica.refs().set("y", 2);

        let json = replica.doc().to_json();
        assert_eq!(json["states-board"]["x"], 1.0);
        assert_eq!(json["refs-board"]["y"], 2.0);
    }

    #[test]
    fn test_invalid_room_keys() {
        let registry = Registry::new();
        assert!(matches!(
            registry.get_or_create(""),
            Err(Error::InvalidRoomKey(_))
        ));
        assert!(matches!(
            registry.get_or_create("bad\nkey"),
            Err(Error::InvalidRoomKey(_))
        ));
        assert!(registry.get_or_create("ünïcode room").is_ok());
    }

    #[test]
    fn test_rooms_are_isolated() {
        let registry = Registry::new();
        let a = registry.get_or_create("a").unwrap();
        let b = registry.get_or_create("b").unwrap();
        a.state().set("only", "a");

        assert!(!a.doc().ptr_eq(b.doc()));
        assert!(b.state().is_empty());
    }

    #[test]
    fn test_reset_room_builds_fresh_replica() {
        let registry = Registry::new();
        let before = registry.get_or_create("board").unwrap();
        before.state().set("x", 1);

        registry.reset_room("board");
        assert!(!registry.contains("board"));

        let after = registry.get_or_create("board").unwrap();
        assert!(!after.doc().ptr_eq(before.doc()));
        assert!(after.state().is_empty());
    }

    #[test]
    fn test_teardown_resets_everything() {
        let registry = Registry::new();
        registry.get_or_create("a").unwrap();
        registry.get_or_create("b").unwrap();
        registry.teardown();
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_init_defaults_only_when_empty() {
        let registry = Registry::new();
        let replica = registry.get_or_create("board").unwrap();
        let initial = Value::object([("count", Value::from(0)), ("title", Value::from("t"))]);

        assert!(init_defaults(replica.state(), &initial).unwrap());
        replica.state().set("count", 5);
        assert!(!init_defaults(replica.state(), &initial).unwrap());

        assert_eq!(replica.state().get("count"), Some(Value::from(5)));
        assert!(matches!(
            init_defaults(replica.state(), &Value::from(3)),
            Err(Error::InvalidOptions(_))
        ));
    }
}
