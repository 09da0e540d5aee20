//! The consumer-facing room handle.

use crate::awareness::Awareness;
use crate::config::RoomOptions;
use crate::diagnostics::{DiagnosticsReporter, DiagnosticsSnapshot};
use crate::error::{Error, Result};
use crate::event::RoomEvent;
use crate::persistence::Persistence;
use crate::registry::{init_defaults, validate_room_key, Registry, RoomReplica};
use crate::scheduler::{AdaptiveSyncScheduler, SchedulerStatus, SyncTarget};
use crate::signaling::SignalingSelector;
use crate::transport::{ConnectionState, PeerTransportManager};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_engine::{ClientId, Doc, DocSnapshot, MapProxy, Proxy, Store, Subscription, Value};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Quiet period before a changed document is written to persistence.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Partial state values above this many bytes of JSON are logged.
const LARGE_VALUE_BYTES: usize = 50 * 1024;

/// Status of a room for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room: String,
    pub status: String,
    pub connected: bool,
    pub peers: Vec<ClientId>,
    pub is_host: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub auto_sync: SchedulerStatus,
}

/// Heartbeats go into the room's state map; sync requests go to the peers.
struct RoomSyncTarget {
    manager: Arc<PeerTransportManager>,
    state: MapProxy,
}

impl SyncTarget for RoomSyncTarget {
    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    fn heartbeat(&self, field: &str, timestamp_ms: i64) {
        self.state.set(field, Value::Number(timestamp_ms as f64));
    }

    fn request_sync(&self) -> bool {
        self.manager.sync_now()
    }
}

struct Saver {
    task: JoinHandle<()>,
    _updates: Subscription,
}

/// A joined room: replicated state plus its connection, heartbeat and
/// diagnostics.
pub struct SyncedRoom {
    key: String,
    replica: RoomReplica,
    options: RoomOptions,
    manager: Arc<PeerTransportManager>,
    scheduler: AdaptiveSyncScheduler,
    diagnostics: DiagnosticsReporter,
    persistence: Option<Arc<dyn Persistence>>,
    registry: Weak<Registry>,
    saver: Mutex<Option<Saver>>,
    cleared: AtomicBool,
    destroyed: AtomicBool,
}

impl fmt::Debug for SyncedRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedRoom")
            .field("key", &self.key)
            .field("status", &self.manager.status())
            .field("client", &self.replica.doc().client_id())
            .finish()
    }
}

impl SyncedRoom {
    /// The live handle for `room_key`, building and (per `options`)
    /// connecting it on first use. Later calls return the same handle and
    /// ignore `initial_state` and `options`.
    ///
    /// `initial_state` is written into the state map only when the map is
    /// empty after restoring from persistence.
    pub async fn create_or_get(
        registry: &Arc<Registry>,
        room_key: &str,
        initial_state: Value,
        options: RoomOptions,
    ) -> Result<Arc<Self>> {
        validate_room_key(room_key)?;
        options.validate()?;
        if let Some(existing) = registry.room(room_key) {
            return Ok(existing);
        }

        let replica = registry.get_or_create_with(room_key, options.codec)?;
        let persistence = if options.persist {
            registry.persistence().cloned()
        } else {
            None
        };
        if let Some(persistence) = &persistence {
            match persistence.load_into(room_key, replica.doc()) {
                Ok(restored) if restored > 0 => {
                    tracing::info!(room = %room_key, ops = restored, "Restored from persistence")
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(room = %room_key, error = %e, "Failed to restore room, starting empty")
                }
            }
        }
        init_defaults(replica.state(), &initial_state)?;

        let wire_name = options
            .room_name
            .clone()
            .unwrap_or_else(|| room_key.to_string());
        let discovery = &options.discovery;
        let selector = Arc::new(SignalingSelector::new(
            discovery.signaling.clone(),
            registry.probe().clone(),
            discovery.probe_timeout,
            discovery.cache_ttl,
        ));
        let manager = Arc::new(PeerTransportManager::new(
            wire_name.clone(),
            replica.doc().clone(),
            registry.transports().clone(),
            selector,
            discovery.clone(),
            options.retry_strategy.clone(),
            options.liveness_interval,
        ));
        let target = Arc::new(RoomSyncTarget {
            manager: manager.clone(),
            state: replica.state().clone(),
        });
        let scheduler = AdaptiveSyncScheduler::new(
            wire_name,
            replica.doc().clone(),
            target,
            registry.environment().clone(),
            options.auto_sync.clone(),
        )?;
        let diagnostics = DiagnosticsReporter::new(
            manager.clone(),
            replica.doc().clone(),
            registry.environment().clone(),
        );

        let built = Arc::new(Self {
            key: room_key.to_string(),
            replica,
            options,
            manager,
            scheduler,
            diagnostics,
            persistence,
            registry: Arc::downgrade(registry),
            saver: Mutex::new(None),
            cleared: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        let room = registry
            .rooms()
            .entry(room_key.to_string())
            .or_insert_with(|| built.clone())
            .clone();
        if !Arc::ptr_eq(&room, &built) {
            return Ok(room);
        }

        room.start_saver();
        if room.options.auto_connect {
            room.connect().await;
        }
        if room.options.auto_sync.enabled {
            room.scheduler.start().await;
        }
        tracing::info!(room = %room.key, client = room.replica.doc().client_id(), "Room ready");
        Ok(room)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    pub fn replica(&self) -> &RoomReplica {
        &self.replica
    }

    pub fn doc(&self) -> &Doc {
        self.replica.doc()
    }

    pub fn store(&self) -> &Store {
        self.replica.store()
    }

    /// The `states-<key>` map.
    pub fn state(&self) -> &MapProxy {
        self.replica.state()
    }

    /// The `refs-<key>` map.
    pub fn refs(&self) -> &MapProxy {
        self.replica.refs()
    }

    pub fn manager(&self) -> &Arc<PeerTransportManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> &AdaptiveSyncScheduler {
        &self.scheduler
    }

    pub fn peers(&self) -> Vec<ClientId> {
        self.manager.peers()
    }

    /// Presence states of everyone in the room.
    pub fn awareness(&self) -> &Arc<Awareness> {
        self.manager.awareness()
    }

    /// Replace the local presence state; `None` withdraws it.
    pub fn set_awareness(&self, state: Option<serde_json::Value>) {
        self.manager.set_awareness(state);
    }

    pub fn set_awareness_field(&self, field: &str, value: serde_json::Value) {
        self.manager.set_awareness_field(field, value);
    }

    /// Subscribe to status, peer, sync, presence and custom events.
    pub fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.manager.subscribe()
    }

    /// Publish a custom event to the room's subscribers. Returns how many
    /// received it. Nothing is sent to peers.
    pub fn emit(&self, name: impl Into<String>, payload: serde_json::Value) -> usize {
        self.manager.emit(RoomEvent::Custom {
            name: name.into(),
            payload,
        })
    }

    /// Set `state[kind][key][prop]`, creating the intermediate maps, and
    /// ask the peers to sync. Only that one property is written.
    pub fn set_partial_state(&self, kind: &str, key: &str, prop: &str, value: impl Into<Value>) -> bool {
        if self.is_destroyed() {
            tracing::warn!(room = %self.key, "Partial update on destroyed room ignored");
            return false;
        }
        let value = value.into().to_plain();
        let Some(entry) = child_map(self.state(), kind).and_then(|map| child_map(&map, key)) else {
            tracing::error!(room = %self.key, kind, key, "Partial update failed");
            return false;
        };

        let size = value.to_json().to_string().len();
        if size > LARGE_VALUE_BYTES {
            tracing::info!(room = %self.key, prop, kb = size / 1024, "Large partial update");
        }
        entry.set(prop, value);
        self.scheduler.trigger_sync();
        true
    }

    /// Delete the room's persisted snapshot and stop saving it. `Ok(false)`
    /// when the room does not persist. The live document is untouched.
    pub fn clear_local_data(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        self.cleared.store(true, Ordering::SeqCst);
        if let Some(saver) = self.saver.lock().take() {
            saver.task.abort();
        }
        persistence.remove(&self.key)?;
        tracing::info!(room = %self.key, "Local data cleared");
        Ok(true)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RoomStatus {
        RoomStatus {
            room: self.key.clone(),
            status: self.manager.status(),
            connected: self.manager.is_connected(),
            peers: self.manager.peers(),
            is_host: self.manager.is_host(),
            attempts: self.manager.attempts(),
            last_error: self.manager.last_error(),
            auto_sync: self.scheduler.status(),
        }
    }

    /// Sync with peers now. `Ok(false)` when offline; an error once
    /// reconnecting has been given up.
    pub fn sync(&self) -> Result<bool> {
        if self.manager.state() == ConnectionState::FailedPermanent {
            return Err(Error::ReconnectExhausted {
                attempts: self.manager.attempts(),
            });
        }
        Ok(self.scheduler.trigger_sync())
    }

    pub async fn connect(&self) {
        if self.is_destroyed() {
            tracing::warn!(room = %self.key, "Connect on destroyed room ignored");
            return;
        }
        self.manager.connect().await;
    }

    pub async fn reconnect(&self) {
        if self.is_destroyed() {
            return;
        }
        self.manager.reconnect().await;
    }

    /// Leave the room and stop the heartbeat. The room can connect again.
    pub fn disconnect(&self) {
        self.scheduler.stop();
        self.manager.disconnect();
        self.flush();
    }

    /// Shut the room down and drop it from the registry. The document stays
    /// cached, so a later `create_or_get` resumes from it.
    pub fn destroy(&self) {
        self.shutdown();
        if let Some(registry) = self.registry.upgrade() {
            registry
                .rooms()
                .remove_if(&self.key, |_, room| std::ptr::eq(Arc::as_ptr(room), self));
        }
    }

    /// Shut the room down and evict its document as well.
    pub fn reset(&self) {
        match self.registry.upgrade() {
            Some(registry) => registry.reset_room(&self.key),
            None => self.shutdown(),
        }
    }

    pub async fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot().await
    }

    /// Write the current document to persistence now.
    pub fn flush(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if self.cleared.load(Ordering::SeqCst) {
            return;
        }
        save(persistence.as_ref(), &self.key, self.replica.doc());
    }

    pub(crate) fn shutdown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect();
        if let Some(saver) = self.saver.lock().take() {
            saver.task.abort();
        }
        tracing::info!(room = %self.key, "Room destroyed");
    }

    fn start_saver(&self) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        let dirty = Arc::new(Notify::new());
        let updates = {
            let dirty = dirty.clone();
            self.replica
                .doc()
                .observe_updates(move |_| dirty.notify_one())
        };
        let doc = self.replica.doc().clone();
        let key = self.key.clone();
        let task = tokio::spawn(async move {
            loop {
                dirty.notified().await;
                tokio::time::sleep(PERSIST_DEBOUNCE).await;
                save(persistence.as_ref(), &key, &doc);
            }
        });
        *self.saver.lock() = Some(Saver {
            task,
            _updates: updates,
        });
    }
}

impl Drop for SyncedRoom {
    fn drop(&mut self) {
        if let Some(saver) = self.saver.get_mut().take() {
            saver.task.abort();
        }
    }
}

/// The map under `key`, replacing whatever else is there.
fn child_map(parent: &MapProxy, key: &str) -> Option<MapProxy> {
    if let Some(Value::Proxy(Proxy::Map(map))) = parent.get(key) {
        return Some(map);
    }
    match parent.set(key, Value::Object(Default::default())) {
        Value::Proxy(Proxy::Map(map)) => Some(map),
        _ => None,
    }
}

fn save(persistence: &dyn Persistence, room: &str, doc: &Doc) {
    if let Err(e) = persistence.save(room, &DocSnapshot::capture(doc)) {
        tracing::warn!(room = %room, error = %e, "Failed to persist room");
    }
}
