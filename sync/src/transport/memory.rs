use super::{PeerTransport, TransportEvent, TransportFactory, EVENT_CAPACITY};
use crate::config::PeerDiscoveryConfig;
use crate::error::{Error, Result};
use crate::protocol::Envelope;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

struct Member {
    id: u64,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

struct NetworkInner {
    rooms: DashMap<String, Vec<Member>>,
    online: AtomicBool,
    provider_failure: Mutex<Option<String>>,
    next_id: AtomicU64,
}

/// In-process hub connecting every [`MemoryTransport`] created from it.
///
/// The network can be taken offline, which drops every link and makes new
/// connects fail, and can be told to fail transport creation outright.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("rooms", &self.inner.rooms.len())
            .field("online", &self.is_online())
            .finish()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                rooms: DashMap::new(),
                online: AtomicBool::new(true),
                provider_failure: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn transport(&self) -> MemoryTransport {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        MemoryTransport {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            network: self.clone(),
            events,
            connected: Arc::new(AtomicBool::new(false)),
            room: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Going offline drops every current link.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if online {
            return;
        }
        let rooms: Vec<String> = self.inner.rooms.iter().map(|e| e.key().clone()).collect();
        for room in rooms {
            if let Some((_, members)) = self.inner.rooms.remove(&room) {
                for member in members {
                    member.connected.store(false, Ordering::SeqCst);
                    let _ = member.events.send(TransportEvent::Disconnected);
                }
            }
        }
        tracing::debug!("Memory network offline");
    }

    /// Make [`TransportFactory::create`] fail with `reason`, or succeed again
    /// with `None`.
    pub fn fail_providers(&self, reason: Option<&str>) {
        *self.inner.provider_failure.lock() = reason.map(str::to_string);
    }

    /// Number of transports currently joined to `room`.
    pub fn members(&self, room: &str) -> usize {
        self.inner.rooms.get(room).map_or(0, |m| m.len())
    }

    fn join(&self, room: &str, member: Member) {
        let mut members = self.inner.rooms.entry(room.to_string()).or_default();
        members.retain(|m| m.id != member.id);
        members.push(member);
    }

    fn leave(&self, room: &str, id: u64) {
        if let Some(mut members) = self.inner.rooms.get_mut(room) {
            members.retain(|m| m.id != id);
        }
        self.inner.rooms.remove_if(room, |_, members| members.is_empty());
    }

    fn deliver(&self, room: &str, from: u64, envelope: &Envelope) -> Result<()> {
        let members = self
            .inner
            .rooms
            .get(room)
            .ok_or_else(|| Error::Transport(format!("room {room} has no link")))?;
        for member in members.iter().filter(|m| m.id != from) {
            let _ = member
                .events
                .send(TransportEvent::Message(envelope.clone()));
        }
        Ok(())
    }
}

impl TransportFactory for MemoryNetwork {
    fn create(&self, room: &str, _discovery: &PeerDiscoveryConfig) -> Result<Arc<dyn PeerTransport>> {
        if let Some(reason) = self.inner.provider_failure.lock().clone() {
            tracing::error!(room = %room, reason = %reason, "Memory transport creation failed");
            return Err(Error::ProviderInit(reason));
        }
        Ok(Arc::new(self.transport()))
    }
}

/// One replica's link into a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: u64,
    network: MemoryNetwork,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    room: Mutex<Option<String>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .field("room", &*self.room.lock())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl PeerTransport for MemoryTransport {
    fn connect<'a>(&'a self, room: &'a str, _endpoints: &'a [String]) -> BoxFuture<'a, Result<()>> {
        let result = if self.network.is_online() {
            self.network.join(
                room,
                Member {
                    id: self.id,
                    events: self.events.clone(),
                    connected: self.connected.clone(),
                },
            );
            *self.room.lock() = Some(room.to_string());
            self.connected.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Connected);
            Ok(())
        } else {
            Err(Error::Transport("memory network offline".into()))
        };
        futures::future::ready(result).boxed()
    }

    fn disconnect(&self) {
        let Some(room) = self.room.lock().take() else {
            return;
        };
        self.network.leave(&room, self.id);
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("not connected".into()));
        }
        let room = self
            .room
            .lock()
            .clone()
            .ok_or_else(|| Error::Transport("not connected".into()))?;
        self.network.deliver(&room, self.id, envelope)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
