use super::{PeerTransport, TransportEvent, TransportFactory};
use crate::awareness::{Awareness, AwarenessChange};
use crate::config::{PeerDiscoveryConfig, RetryStrategy};
use crate::error::Error;
use crate::event::{RoomEvent, ROOM_EVENT_CAPACITY};
use crate::protocol::{Envelope, SyncMessage};
use crate::signaling::SignalingSelector;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_engine::{ClientId, Doc, Origin, Subscription};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Connection lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; only [`PeerTransportManager::reconnect`] leaves it.
    FailedPermanent,
    /// The transport could not be created; latched until `reconnect()`.
    Error,
}

struct Session {
    state: ConnectionState,
    attempts: u32,
    /// Last status the transport reported through its events.
    reported_up: bool,
    started: bool,
    endpoints: Vec<String>,
    last_error: Option<String>,
}

impl Session {
    fn describe(&self, max_retries: u32) -> String {
        match self.state {
            ConnectionState::Disconnected if !self.started => "initializing".to_string(),
            ConnectionState::Disconnected => "disconnected".to_string(),
            ConnectionState::Connecting => "connecting".to_string(),
            ConnectionState::Connected => "connected".to_string(),
            ConnectionState::Reconnecting => {
                format!("reconnecting ({}/{})", self.attempts, max_retries)
            }
            ConnectionState::FailedPermanent => "reconnect failed".to_string(),
            ConnectionState::Error => "connection error".to_string(),
        }
    }
}

#[derive(Default)]
struct Timers {
    retry: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
    sweep: Option<JoinHandle<()>>,
}

impl Timers {
    fn pending(&self) -> usize {
        [&self.retry, &self.liveness, &self.sweep]
            .into_iter()
            .filter(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }

    fn abort_all(&mut self) {
        for handle in [self.retry.take(), self.liveness.take(), self.sweep.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Link {
    transport: Arc<dyn PeerTransport>,
    pump: JoinHandle<()>,
}

struct Inner {
    room: String,
    doc: Doc,
    factory: Arc<dyn TransportFactory>,
    selector: Arc<SignalingSelector>,
    discovery: PeerDiscoveryConfig,
    retry: RetryStrategy,
    liveness_interval: Duration,
    link: Mutex<Option<Link>>,
    session: Mutex<Session>,
    connected: AtomicBool,
    /// Bumped by `disconnect()`/`reconnect()` so in-flight connects abandon.
    epoch: AtomicU64,
    peers: Mutex<BTreeSet<ClientId>>,
    awareness: Arc<Awareness>,
    events: broadcast::Sender<RoomEvent>,
    last_message_at: Mutex<Option<Instant>>,
    timers: Mutex<Timers>,
    updates: Mutex<Option<Subscription>>,
}

/// Owns the peer session of one room.
pub struct PeerTransportManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for PeerTransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerTransportManager")
            .field("room", &self.inner.room)
            .field("status", &self.status())
            .field("peers", &self.peer_count())
            .finish()
    }
}

impl PeerTransportManager {
    pub fn new(
        room: impl Into<String>,
        doc: Doc,
        factory: Arc<dyn TransportFactory>,
        selector: Arc<SignalingSelector>,
        discovery: PeerDiscoveryConfig,
        retry: RetryStrategy,
        liveness_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(ROOM_EVENT_CAPACITY);
        let awareness = Arc::new(Awareness::new(doc.client_id()));
        Self {
            inner: Arc::new(Inner {
                room: room.into(),
                doc,
                factory,
                selector,
                discovery,
                retry,
                liveness_interval,
                link: Mutex::new(None),
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    reported_up: false,
                    started: false,
                    endpoints: Vec::new(),
                    last_error: None,
                }),
                connected: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                peers: Mutex::new(BTreeSet::new()),
                awareness,
                events,
                last_message_at: Mutex::new(None),
                timers: Mutex::new(Timers::default()),
                updates: Mutex::new(None),
            }),
        }
    }

    pub fn room(&self) -> &str {
        &self.inner.room
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Human-readable status.
    pub fn status(&self) -> String {
        self.inner
            .session
            .lock()
            .describe(self.inner.retry.max_retries)
    }

    /// Reconciled liveness: true only once the transport and its status
    /// events agree the link is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u32 {
        self.inner.session.lock().attempts
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.session.lock().last_error.clone()
    }

    /// Endpoints handed to the transport on the last connect.
    pub fn endpoints(&self) -> Vec<String> {
        self.inner.session.lock().endpoints.clone()
    }

    pub fn selector(&self) -> &Arc<SignalingSelector> {
        &self.inner.selector
    }

    pub fn peers(&self) -> Vec<ClientId> {
        self.inner.peers.lock().iter().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    pub fn awareness(&self) -> &Arc<Awareness> {
        &self.inner.awareness
    }

    /// Clients with a presence state, the local one included. Zero until a
    /// transport exists for the room.
    pub fn presence_count(&self) -> usize {
        if self.inner.link.lock().is_none() {
            return 0;
        }
        self.inner.awareness.len()
    }

    /// Replace the local presence state and tell the peers.
    pub fn set_awareness(&self, state: Option<serde_json::Value>) {
        let change = self.inner.awareness.set_local_state(state);
        self.inner.local_awareness_changed(change);
    }

    /// Set one field of the local presence state and tell the peers.
    pub fn set_awareness_field(&self, field: &str, value: serde_json::Value) {
        let change = self.inner.awareness.set_local_field(field, value);
        self.inner.local_awareness_changed(change);
    }

    /// Status, peer, sync and presence events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.inner.events.subscribe()
    }

    /// Publish an event to every subscriber. Returns how many received it.
    pub fn emit(&self, event: RoomEvent) -> usize {
        self.inner.emit(event)
    }

    /// Best-effort role: the replica with the lowest client id among the
    /// known peers. Not consensus; two partitions can both claim it.
    pub fn is_host(&self) -> bool {
        let me = self.inner.doc.client_id();
        self.inner.peers.lock().iter().all(|peer| *peer > me)
    }

    pub fn last_message_at(&self) -> Option<Instant> {
        *self.inner.last_message_at.lock()
    }

    /// Live timer tasks (reconnect backoff, liveness poll, health sweep).
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().pending()
    }

    /// Join the room. No-op while connected or connecting, and while a
    /// terminal state is latched.
    pub async fn connect(&self) {
        self.inner.clone().connect().await
    }

    /// Reset the attempt counter and connect right away.
    pub async fn reconnect(&self) {
        tracing::info!(room = %self.inner.room, "Manual reconnect");
        self.inner.reset();
        self.inner.clone().connect().await
    }

    /// Schedule the next reconnect attempt with backoff.
    pub fn attempt_reconnect(&self) {
        self.inner.attempt_reconnect();
    }

    /// Leave the room and cancel every timer.
    pub fn disconnect(&self) {
        self.inner.reset();
        let mut session = self.inner.session.lock();
        self.inner.update(&mut session, |s| {
            s.started = true;
            s.state = ConnectionState::Disconnected;
        });
        tracing::info!(room = %self.inner.room, "Disconnected");
    }

    /// Ask every peer for what we are missing. Returns false when offline.
    pub fn sync_now(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.inner.broadcast(SyncMessage::SyncStep1 {
            state_vector: self.inner.doc.state_vector(),
        });
        true
    }
}

impl Drop for PeerTransportManager {
    fn drop(&mut self) {
        self.inner.reset();
    }
}

impl Inner {
    fn me(&self) -> ClientId {
        self.doc.client_id()
    }

    fn current_transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.link.lock().as_ref().map(|link| link.transport.clone())
    }

    fn emit(&self, event: RoomEvent) -> usize {
        // no subscribers is fine
        self.events.send(event).unwrap_or_default()
    }

    /// Change the session and announce the new status if it reads
    /// differently.
    fn update(&self, session: &mut Session, f: impl FnOnce(&mut Session)) {
        let before = session.describe(self.retry.max_retries);
        f(session);
        let after = session.describe(self.retry.max_retries);
        if before != after {
            self.emit(RoomEvent::Status {
                state: session.state,
                status: after,
            });
        }
    }

    fn add_peer(&self, client: ClientId) {
        let peers: Vec<ClientId> = {
            let mut peers = self.peers.lock();
            if !peers.insert(client) {
                return;
            }
            peers.iter().copied().collect()
        };
        tracing::debug!(room = %self.room, peer = client, "Peer joined");
        self.emit(RoomEvent::Peers { peers });
    }

    fn remove_peer(&self, client: ClientId) {
        let peers: Vec<ClientId> = {
            let mut peers = self.peers.lock();
            if !peers.remove(&client) {
                return;
            }
            peers.iter().copied().collect()
        };
        tracing::debug!(room = %self.room, peer = client, "Peer left");
        self.emit(RoomEvent::Peers { peers });
    }

    /// Forget every peer and their presence.
    fn clear_peers(&self) {
        let had_peers = {
            let mut peers = self.peers.lock();
            let had = !peers.is_empty();
            peers.clear();
            had
        };
        if had_peers {
            self.emit(RoomEvent::Peers { peers: Vec::new() });
        }
        self.awareness_changed(self.awareness.clear_remote());
    }

    fn awareness_changed(&self, change: Option<AwarenessChange>) {
        if let Some(change) = change {
            self.emit(RoomEvent::Awareness(change));
        }
    }

    fn local_awareness_changed(&self, change: Option<AwarenessChange>) {
        if change.is_none() {
            return;
        }
        self.awareness_changed(change);
        if self.connected.load(Ordering::SeqCst) {
            self.broadcast(self.awareness_message());
        }
    }

    fn awareness_message(&self) -> SyncMessage {
        SyncMessage::Awareness {
            client: self.me(),
            state: self.awareness.local_state(),
        }
    }

    /// Drop the link, cancel timers and forget the session.
    fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.timers.lock().abort_all();
        let link = self.link.lock().take();
        if let Some(link) = link {
            if link.transport.is_connected() {
                let me = self.me();
                let bye = Envelope::broadcast(me, SyncMessage::Bye { client: me });
                if let Err(e) = link.transport.send(&bye) {
                    tracing::debug!(room = %self.room, error = %e, "Failed to say goodbye");
                }
            }
            link.pump.abort();
            link.transport.disconnect();
        }
        {
            let mut session = self.session.lock();
            self.update(&mut session, |s| {
                s.attempts = 0;
                s.reported_up = false;
                s.last_error = None;
                if s.started {
                    s.state = ConnectionState::Disconnected;
                }
            });
        }
        self.connected.store(false, Ordering::SeqCst);
        self.clear_peers();
    }

    async fn connect(self: Arc<Self>) {
        let epoch = {
            let mut session = self.session.lock();
            match session.state {
                ConnectionState::Connected | ConnectionState::Connecting => return,
                ConnectionState::Error | ConnectionState::FailedPermanent => {
                    tracing::debug!(
                        room = %self.room,
                        state = ?session.state,
                        "Connect ignored until reconnect()"
                    );
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            }
            self.update(&mut session, |s| {
                s.started = true;
                s.state = ConnectionState::Connecting;
            });
            self.epoch.load(Ordering::SeqCst)
        };
        self.watch_liveness();
        self.forward_updates();
        self.establish(epoch).await;
    }

    /// One connection attempt on behalf of `epoch`. Does nothing once a
    /// reset has moved past it.
    async fn establish(self: &Arc<Self>, epoch: u64) {
        {
            let mut session = self.session.lock();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                tracing::debug!(room = %self.room, "Connect attempt superseded");
                return;
            }
            self.update(&mut session, |s| s.state = ConnectionState::Connecting);
        }

        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(room = %self.room, error = %e, "Transport initialization failed");
                let mut session = self.session.lock();
                self.update(&mut session, |s| {
                    s.state = ConnectionState::Error;
                    s.last_error = Some(e.to_string());
                });
                return;
            }
        };

        let endpoints = self.selector.select_best(self.discovery.max_endpoints).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        self.session.lock().endpoints = endpoints.clone();
        tracing::debug!(room = %self.room, endpoints = ?endpoints, "Connecting");

        let result = transport.connect(&self.room, &endpoints).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            transport.disconnect();
            return;
        }
        match result {
            Ok(()) => self.on_status(true),
            Err(e @ Error::ProviderInit(_)) => {
                tracing::error!(room = %self.room, error = %e, "Transport rejected the room");
                let mut session = self.session.lock();
                self.update(&mut session, |s| {
                    s.state = ConnectionState::Error;
                    s.last_error = Some(e.to_string());
                });
            }
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Connect failed");
                self.session.lock().last_error = Some(e.to_string());
                self.attempt_reconnect();
            }
        }
    }

    /// The room's transport, created on first use.
    fn transport(self: &Arc<Self>) -> crate::Result<Arc<dyn PeerTransport>> {
        let mut link = self.link.lock();
        if let Some(existing) = link.as_ref() {
            return Ok(existing.transport.clone());
        }
        let transport = self.factory.create(&self.room, &self.discovery)?;
        let pump = self.pump(transport.as_ref());
        *link = Some(Link {
            transport: transport.clone(),
            pump,
        });
        Ok(transport)
    }

    fn pump(self: &Arc<Self>, transport: &dyn PeerTransport) -> JoinHandle<()> {
        let mut events = transport.events();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Transport events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::Connected => inner.on_status(true),
                    TransportEvent::Disconnected => inner.on_status(false),
                    TransportEvent::Message(envelope) => inner.receive(envelope),
                }
            }
        })
    }

    fn watch_liveness(self: &Arc<Self>) {
        let mut timers = self.timers.lock();
        if timers.liveness.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.liveness_interval;
        timers.liveness = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.reconcile(),
                    None => break,
                }
            }
        }));
    }

    fn forward_updates(self: &Arc<Self>) {
        let mut updates = self.updates.lock();
        if updates.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(self);
        *updates = Some(self.doc.observe_updates(move |update| {
            if update.origin != Origin::Local {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                if inner.connected.load(Ordering::SeqCst) {
                    inner.broadcast(SyncMessage::Update {
                        ops: update.ops.clone(),
                    });
                }
            }
        }));
    }

    fn on_status(self: &Arc<Self>, up: bool) {
        self.session.lock().reported_up = up;
        self.reconcile();
    }

    /// Flip `connected` once the transport and its last status event agree.
    fn reconcile(self: &Arc<Self>) {
        let actual = self
            .current_transport()
            .is_some_and(|transport| transport.is_connected());
        let mut session = self.session.lock();
        if actual != session.reported_up {
            tracing::trace!(room = %self.room, actual, reported = session.reported_up, "Status disagrees");
            return;
        }
        if self.connected.swap(actual, Ordering::SeqCst) == actual {
            return;
        }

        if actual {
            self.update(&mut session, |s| {
                s.state = ConnectionState::Connected;
                s.attempts = 0;
                s.last_error = None;
            });
            drop(session);
            if let Some(retry) = self.timers.lock().retry.take() {
                retry.abort();
            }
            tracing::info!(room = %self.room, "Connected");
            self.greet();
        } else {
            let unexpected = session.state == ConnectionState::Connected;
            drop(session);
            self.clear_peers();
            if unexpected {
                tracing::warn!(room = %self.room, "Connection lost");
                self.attempt_reconnect();
            }
        }
    }

    fn attempt_reconnect(self: &Arc<Self>) {
        let attempt = {
            let mut session = self.session.lock();
            if session.attempts >= self.retry.max_retries {
                self.update(&mut session, |s| s.state = ConnectionState::FailedPermanent);
                let attempts = session.attempts;
                drop(session);
                self.connected.store(false, Ordering::SeqCst);
                self.timers.lock().abort_all();
                tracing::error!(room = %self.room, attempts, "Reconnect failed");
                return;
            }
            self.update(&mut session, |s| {
                s.attempts += 1;
                s.state = ConnectionState::Reconnecting;
            });
            session.attempts
        };

        let delay = self.retry.delay_for(attempt);
        tracing::info!(
            room = %self.room,
            attempt,
            max = self.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let epoch = self.epoch.load(Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            // this task is the retry timer; detach it before connecting
            drop(inner.timers.lock().retry.take());
            if attempt % 3 == 0 {
                inner.health_sweep();
            }
            if let Some(transport) = inner.current_transport() {
                transport.disconnect();
            }
            inner.establish(epoch).await;
        });
        if let Some(previous) = self.timers.lock().retry.replace(handle) {
            previous.abort();
        }
    }

    /// Re-rank signaling endpoints in the background.
    fn health_sweep(self: &Arc<Self>) {
        let selector = self.selector.clone();
        let room = self.room.clone();
        let handle = tokio::spawn(async move {
            let results = selector.rank_all().await;
            let reachable = results.iter().filter(|r| r.available).count();
            tracing::info!(
                room = %room,
                reachable,
                total = results.len(),
                "Signaling health sweep finished"
            );
        });
        if let Some(previous) = self.timers.lock().sweep.replace(handle) {
            previous.abort();
        }
    }

    fn broadcast(&self, message: SyncMessage) {
        self.send(Envelope::broadcast(self.me(), message));
    }

    fn send(&self, envelope: Envelope) {
        let Some(transport) = self.current_transport() else {
            return;
        };
        if let Err(e) = transport.send(&envelope) {
            tracing::warn!(room = %self.room, error = %e, "Failed to send sync message");
        }
    }

    fn greet(&self) {
        let me = self.me();
        self.broadcast(SyncMessage::Hello { client: me });
        self.broadcast(SyncMessage::SyncStep1 {
            state_vector: self.doc.state_vector(),
        });
        self.broadcast(self.awareness_message());
    }

    fn receive(&self, envelope: Envelope) {
        let me = self.me();
        if !envelope.is_for(me) {
            return;
        }
        *self.last_message_at.lock() = Some(Instant::now());
        let from = envelope.from;

        match envelope.message {
            SyncMessage::Hello { client } => {
                self.add_peer(client);
                // a broadcast hello is a newcomer; introduce ourselves
                if envelope.to.is_none() {
                    self.send(Envelope::direct(me, from, SyncMessage::Hello { client: me }));
                    self.send(Envelope::direct(
                        me,
                        from,
                        SyncMessage::SyncStep1 {
                            state_vector: self.doc.state_vector(),
                        },
                    ));
                    self.send(Envelope::direct(me, from, self.awareness_message()));
                }
            }
            SyncMessage::Bye { client } => {
                self.remove_peer(client);
                self.awareness_changed(self.awareness.remove(&[client]));
            }
            SyncMessage::SyncStep1 { state_vector } => {
                self.add_peer(from);
                let ops = self.doc.ops_since(&state_vector);
                self.send(Envelope::direct(me, from, SyncMessage::SyncStep2 { ops }));
            }
            SyncMessage::SyncStep2 { ops } => {
                self.add_peer(from);
                self.apply_remote(from, ops);
                self.emit(RoomEvent::Synced { peer: from });
            }
            SyncMessage::Update { ops } => {
                self.add_peer(from);
                self.apply_remote(from, ops);
            }
            SyncMessage::Awareness { client, state } => {
                self.add_peer(from);
                self.awareness_changed(self.awareness.apply_remote(client, state));
            }
        }
    }

    fn apply_remote(&self, from: ClientId, ops: Vec<tandem_engine::Op>) {
        let stats = self.doc.apply_update(ops);
        tracing::trace!(
            room = %self.room,
            peer = from,
            applied = stats.applied,
            pending = stats.pending,
            "Applied remote operations"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::StaticProbe;
    use crate::transport::MemoryNetwork;
    use tandem_engine::Store;

    fn manager(network: &MemoryNetwork, client: ClientId) -> (PeerTransportManager, Store) {
        let store = Store::new(Doc::with_client(client));
        let probe = Arc::new(StaticProbe::new());
        probe.set("memory://hub", Some(5));
        let selector = Arc::new(SignalingSelector::new(
            vec!["memory://hub".to_string()],
            probe,
            Duration::from_millis(2000),
            Duration::from_millis(300_000),
        ));
        let manager = PeerTransportManager::new(
            "room",
            store.doc().clone(),
            Arc::new(network.clone()),
            selector,
            PeerDiscoveryConfig::default(),
            RetryStrategy::default(),
            Duration::from_secs(2),
        );
        (manager, store)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let network = MemoryNetwork::new();
        let (manager, _store) = manager(&network, 1);
        assert_eq!(manager.status(), "initializing");

        manager.connect().await;
        assert_eq!(manager.status(), "connected");
        assert!(manager.is_connected());
        assert_eq!(manager.endpoints(), vec!["memory://hub"]);

        manager.disconnect();
        assert_eq!(manager.status(), "disconnected");
        assert!(!manager.is_connected());
        assert_eq!(manager.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_peers_sync_on_connect() {
        let network = MemoryNetwork::new();
        let (a, a_store) = manager(&network, 1);
        let (b, b_store) = manager(&network, 2);
        a_store.map("states-room").unwrap().set("from_a", 1);
        b_store.map("states-room").unwrap().set("from_b", 2);

        a.connect().await;
        b.connect().await;
        settle().await;

        assert_eq!(a_store.doc().to_json(), b_store.doc().to_json());
        assert_eq!(a.peers(), vec![2]);
        assert_eq!(b.peers(), vec![1]);
        assert!(a.is_host());
        assert!(!b.is_host());
    }

    #[tokio::test]
    async fn test_local_updates_are_forwarded() {
        let network = MemoryNetwork::new();
        let (a, a_store) = manager(&network, 1);
        let (b, b_store) = manager(&network, 2);
        a.connect().await;
        b.connect().await;
        settle().await;

        let list = a_store.array("refs-room").unwrap();
        list.push("x");
        settle().await;

        assert_eq!(b_store.doc().to_json()["refs-room"], serde_json::json!(["x"]));
        assert!(b.last_message_at().is_some());
    }

    #[tokio::test]
    async fn test_connect_is_noop_when_connected() {
        let network = MemoryNetwork::new();
        let (manager, _store) = manager(&network, 1);
        manager.connect().await;
        manager.connect().await;
        assert_eq!(network.members("room"), 1);
    }

    #[tokio::test]
    async fn test_provider_init_error_latches() {
        let network = MemoryNetwork::new();
        network.fail_providers(Some("unsupported"));
        let (manager, _store) = manager(&network, 1);

        manager.connect().await;
        assert_eq!(manager.status(), "connection error");
        assert!(manager.last_error().is_some());

        network.fail_providers(None);
        manager.connect().await;
        assert_eq!(manager.status(), "connection error");

        manager.reconnect().await;
        assert_eq!(manager.status(), "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_is_retried() {
        let network = MemoryNetwork::new();
        let (manager, _store) = manager(&network, 1);
        manager.connect().await;

        network.set_online(false);
        settle().await;
        assert_eq!(manager.status(), "reconnecting (1/5)");

        network.set_online(true);
        tokio::time::sleep(Duration::from_millis(1001)).await;
        settle().await;
        assert_eq!(manager.status(), "connected");
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test]
    async fn test_superseded_attempt_does_not_connect() {
        let network = MemoryNetwork::new();
        let (manager, _store) = manager(&network, 1);
        let stale = manager.inner.epoch.load(Ordering::SeqCst);
        manager.inner.reset();

        manager.inner.establish(stale).await;
        assert_eq!(manager.status(), "initializing");
        assert!(!manager.is_connected());
        assert_eq!(network.members("room"), 0);
    }

    #[tokio::test]
    async fn test_status_changes_are_published() {
        let network = MemoryNetwork::new();
        let (manager, _store) = manager(&network, 1);
        let mut events = manager.subscribe();

        manager.connect().await;
        manager.disconnect();

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RoomEvent::Status { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, ["connecting", "connected", "disconnected"]);
    }

    #[tokio::test]
    async fn test_peers_and_sync_are_published() {
        let network = MemoryNetwork::new();
        let (a, _a_store) = manager(&network, 1);
        let (b, _b_store) = manager(&network, 2);
        let mut events = b.subscribe();

        a.connect().await;
        b.connect().await;
        settle().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                RoomEvent::Peers { .. } | RoomEvent::Synced { .. } => seen.push(event),
                _ => {}
            }
        }
        assert_eq!(seen.first(), Some(&RoomEvent::Peers { peers: vec![1] }));
        assert!(seen.contains(&RoomEvent::Synced { peer: 1 }));
    }

    #[tokio::test]
    async fn test_presence_is_exchanged_and_dropped_on_leave() {
        let network = MemoryNetwork::new();
        let (a, _a_store) = manager(&network, 1);
        let (b, _b_store) = manager(&network, 2);
        a.set_awareness_field("name", serde_json::json!("ada"));
        assert_eq!(a.presence_count(), 0);

        a.connect().await;
        b.connect().await;
        settle().await;
        assert_eq!(b.awareness().get(1), Some(serde_json::json!({"name": "ada"})));
        assert_eq!(a.awareness().get(2), Some(serde_json::json!({})));
        assert_eq!(a.presence_count(), 2);

        let mut events = a.subscribe();
        b.set_awareness_field("cursor", serde_json::json!(4));
        settle().await;
        assert_eq!(a.awareness().get(2), Some(serde_json::json!({"cursor": 4})));

        b.disconnect();
        settle().await;
        assert_eq!(a.awareness().get(2), None);
        assert_eq!(a.presence_count(), 1);

        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RoomEvent::Awareness(change) = event {
                changes.push(change);
            }
        }
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].updated, vec![2]);
        assert_eq!(changes[1].removed, vec![2]);
    }
}
