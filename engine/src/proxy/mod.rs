//! Reactive proxies over replicated containers.
//!
//! A proxy keeps a decoded mirror of one container so reads never touch the
//! document lock. The mirror is patched only from the container's change
//! events, which the document delivers in commit order, so local writes and
//! remote updates racing on different threads land in the same order they
//! integrated. A local write returns after its own event has been applied.
//!
//! Every proxy belongs to a [`Store`]. The store caches one node per
//! container, so wrapping the same container twice yields the same proxy:
//!
//! ```
//! use tandem_engine::{Doc, Store, Value};
//!
//! let store = Store::new(Doc::with_client(1));
//! let state = store.map("states-demo").unwrap();
//! state.set("layer", Value::object([("name", Value::from("bg"))]));
//!
//! let a = state.get("layer").unwrap();
//! let b = state.get("layer").unwrap();
//! assert_eq!(a, b);
//! ```
//!
//! Nodes report an explicit [`NodeState`]: `LocalWrite` while one of their
//! own writes is in flight, `RemoteApply` while a change from elsewhere is
//! being patched in.

mod array;
mod boxed;
mod map;
mod text;

pub use array::ArrayProxy;
pub use boxed::BoxProxy;
pub use map::MapProxy;
pub use text::TextProxy;

use crate::codec::{self, CodecOptions, Seen};
use crate::container::ContainerState;
use crate::{
    ChangeEvent, ContainerId, ContainerKind, Doc, Error, Origin, Prelim, ReplicaValue, Result,
    Subscription, Value,
};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// What a proxy node is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Observing,
    LocalWrite,
    RemoteApply,
}

/// State shared by every proxy node kind.
pub(crate) struct NodeCore {
    store: Store,
    id: ContainerId,
    local: AtomicUsize,
    remote: AtomicUsize,
    /// Last commit the mirror was seeded from. Only touched with the mirror
    /// lock held.
    seeded: AtomicU64,
    /// Serializes local writes to the node. Reentrant so an observer may
    /// write back from inside a change callback.
    writing: ReentrantMutex<()>,
    subscription: Mutex<Option<Subscription>>,
}

impl NodeCore {
    fn new(store: Store, id: ContainerId) -> Self {
        Self {
            store,
            id,
            local: AtomicUsize::new(0),
            remote: AtomicUsize::new(0),
            seeded: AtomicU64::new(0),
            writing: ReentrantMutex::new(()),
            subscription: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> NodeState {
        if self.remote.load(Ordering::Acquire) > 0 {
            NodeState::RemoteApply
        } else if self.local.load(Ordering::Acquire) > 0 {
            NodeState::LocalWrite
        } else {
            NodeState::Observing
        }
    }

    /// Count the node as being in `state` until the returned scope drops.
    /// Scopes nest and overlap freely; the node is back to `Observing` once
    /// every scope is gone.
    fn enter(&self, state: NodeState) -> StateScope<'_> {
        let counter = match state {
            NodeState::LocalWrite => &self.local,
            NodeState::RemoteApply | NodeState::Observing => &self.remote,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        StateScope { counter }
    }

    /// Scope for patching in an event. Local events come from a write that
    /// already holds a `LocalWrite` scope.
    fn applying(&self, event: &ChangeEvent) -> Option<StateScope<'_>> {
        (event.origin == Origin::Remote).then(|| self.enter(NodeState::RemoteApply))
    }

    /// Whether the seeded mirror already holds the event's commit.
    fn reflects(&self, event: &ChangeEvent) -> bool {
        event.seq <= self.seeded.load(Ordering::Acquire)
    }

    fn seeded_at(&self, seq: u64) {
        self.seeded.store(seq, Ordering::Release);
    }

    /// Read the container along with the commit it reflects.
    fn read<R>(&self, f: impl FnOnce(Option<&ContainerState>) -> R) -> (u64, R) {
        self.store.doc().read_container(&self.id, f)
    }

    /// Run a local transaction. A failure is logged and yields `None`; the
    /// caller then patches its mirror directly.
    fn write<T>(&self, op: &str, f: impl FnOnce(&mut crate::Transaction<'_>) -> Result<T>) -> Option<T> {
        match self.store.doc().transact(f) {
            Ok(written) => Some(written),
            Err(err) => {
                tracing::warn!(
                    container = %self.id,
                    op,
                    error = %err,
                    "replicated write failed, keeping local value"
                );
                None
            }
        }
    }

    fn attach(&self, subscription: Subscription) {
        *self.subscription.lock() = Some(subscription);
    }
}

struct StateScope<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for StateScope<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Any proxy node.
#[derive(Clone, PartialEq)]
pub enum Proxy {
    Map(MapProxy),
    Array(ArrayProxy),
    Text(TextProxy),
    Box(BoxProxy),
}

impl Proxy {
    fn attach(store: &Store, id: &ContainerId, kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Map => Proxy::Map(MapProxy::attach(store.clone(), id.clone())),
            ContainerKind::Sequence => Proxy::Array(ArrayProxy::attach(store.clone(), id.clone())),
            ContainerKind::Text => Proxy::Text(TextProxy::attach(store.clone(), id.clone())),
            ContainerKind::Register => Proxy::Box(BoxProxy::attach(store.clone(), id.clone())),
        }
    }

    fn seed(&self) {
        match self {
            Proxy::Map(p) => p.seed(),
            Proxy::Array(p) => p.seed(),
            Proxy::Text(p) => p.seed(),
            Proxy::Box(p) => p.seed(),
        }
    }

    fn core(&self) -> &NodeCore {
        match self {
            Proxy::Map(p) => p.core(),
            Proxy::Array(p) => p.core(),
            Proxy::Text(p) => p.core(),
            Proxy::Box(p) => p.core(),
        }
    }

    fn downgrade(&self) -> WeakProxy {
        match self {
            Proxy::Map(p) => WeakProxy::Map(p.downgrade()),
            Proxy::Array(p) => WeakProxy::Array(p.downgrade()),
            Proxy::Text(p) => WeakProxy::Text(p.downgrade()),
            Proxy::Box(p) => WeakProxy::Box(p.downgrade()),
        }
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.core().id
    }

    pub fn doc(&self) -> &Doc {
        self.core().store.doc()
    }

    pub fn state(&self) -> NodeState {
        self.core().state()
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Proxy::Map(_) => ContainerKind::Map,
            Proxy::Array(_) => ContainerKind::Sequence,
            Proxy::Text(_) => ContainerKind::Text,
            Proxy::Box(_) => ContainerKind::Register,
        }
    }

    pub fn as_map(&self) -> Option<&MapProxy> {
        match self {
            Proxy::Map(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayProxy> {
        match self {
            Proxy::Array(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextProxy> {
        match self {
            Proxy::Text(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_box(&self) -> Option<&BoxProxy> {
        match self {
            Proxy::Box(p) => Some(p),
            _ => None,
        }
    }

    /// Plain snapshot of the proxy's mirror. Text materializes as a string;
    /// cyclic container references as `Null`.
    pub fn to_value(&self) -> Value {
        let mut path = Vec::new();
        self.materialize(&mut path)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }

    /// Observe the underlying container. Callbacks run after the proxy's
    /// mirror has been patched.
    pub fn observe(&self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        self.doc().observe(self.container_id().clone(), f)
    }

    fn materialize(&self, path: &mut Vec<ContainerId>) -> Value {
        let id = self.container_id();
        if path.contains(id) {
            return Value::Null;
        }
        path.push(id.clone());
        let value = match self {
            Proxy::Map(p) => Value::Object(
                p.entries()
                    .into_iter()
                    .map(|(k, v)| (k, materialize_value(&v, path)))
                    .collect(),
            ),
            Proxy::Array(p) => Value::Array(
                p.to_vec()
                    .iter()
                    .map(|v| materialize_value(v, path))
                    .collect(),
            ),
            Proxy::Text(p) => Value::String(p.to_string()),
            Proxy::Box(p) => materialize_value(&p.get(), path),
        };
        path.pop();
        value
    }
}

fn materialize_value(value: &Value, path: &mut Vec<ContainerId>) -> Value {
    match value {
        Value::Proxy(proxy) => proxy.materialize(path),
        other => other.to_plain(),
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy::Map(p) => p.fmt(f),
            Proxy::Array(p) => p.fmt(f),
            Proxy::Text(p) => p.fmt(f),
            Proxy::Box(p) => p.fmt(f),
        }
    }
}

enum WeakProxy {
    Map(Weak<map::MapNode>),
    Array(Weak<array::ArrayNode>),
    Text(Weak<text::TextNode>),
    Box(Weak<boxed::BoxNode>),
}

impl WeakProxy {
    fn upgrade(&self) -> Option<Proxy> {
        match self {
            WeakProxy::Map(w) => w.upgrade().map(|n| Proxy::Map(MapProxy::from_node(n))),
            WeakProxy::Array(w) => w.upgrade().map(|n| Proxy::Array(ArrayProxy::from_node(n))),
            WeakProxy::Text(w) => w.upgrade().map(|n| Proxy::Text(TextProxy::from_node(n))),
            WeakProxy::Box(w) => w.upgrade().map(|n| Proxy::Box(BoxProxy::from_node(n))),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            WeakProxy::Map(w) => w.strong_count() > 0,
            WeakProxy::Array(w) => w.strong_count() > 0,
            WeakProxy::Text(w) => w.strong_count() > 0,
            WeakProxy::Box(w) => w.strong_count() > 0,
        }
    }
}

struct StoreInner {
    doc: Doc,
    options: CodecOptions,
    nodes: Mutex<HashMap<ContainerId, WeakProxy>>,
}

/// Proxy root for one document.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("doc", &self.inner.doc)
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl Store {
    pub fn new(doc: Doc) -> Self {
        Self::with_options(doc, CodecOptions::default())
    }

    pub fn with_options(doc: Doc, options: CodecOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                doc,
                options,
                nodes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn doc(&self) -> &Doc {
        &self.inner.doc
    }

    pub fn options(&self) -> &CodecOptions {
        &self.inner.options
    }

    /// Proxy for a top-level map, created on first access.
    pub fn map(&self, name: &str) -> Result<MapProxy> {
        let id = self.inner.doc.root(name, ContainerKind::Map)?;
        match self.wrap(&id) {
            Some(Proxy::Map(proxy)) => Ok(proxy),
            _ => Err(Error::ContainerNotFound(id)),
        }
    }

    pub fn array(&self, name: &str) -> Result<ArrayProxy> {
        let id = self.inner.doc.root(name, ContainerKind::Sequence)?;
        match self.wrap(&id) {
            Some(Proxy::Array(proxy)) => Ok(proxy),
            _ => Err(Error::ContainerNotFound(id)),
        }
    }

    pub fn text(&self, name: &str) -> Result<TextProxy> {
        let id = self.inner.doc.root(name, ContainerKind::Text)?;
        match self.wrap(&id) {
            Some(Proxy::Text(proxy)) => Ok(proxy),
            _ => Err(Error::ContainerNotFound(id)),
        }
    }

    pub fn register(&self, name: &str) -> Result<BoxProxy> {
        let id = self.inner.doc.root(name, ContainerKind::Register)?;
        match self.wrap(&id) {
            Some(Proxy::Box(proxy)) => Ok(proxy),
            _ => Err(Error::ContainerNotFound(id)),
        }
    }

    /// The proxy for a container, reusing the cached node when one is alive.
    /// `None` if the document has no such container.
    pub fn wrap(&self, id: &ContainerId) -> Option<Proxy> {
        if let Some(proxy) = self.cached(id) {
            return Some(proxy);
        }
        let kind = self.inner.doc.kind_of(id)?;
        let proxy = Proxy::attach(self, id, kind);
        {
            let mut nodes = self.inner.nodes.lock();
            if let Some(existing) = nodes.get(id).and_then(WeakProxy::upgrade) {
                return Some(existing);
            }
            nodes.retain(|_, node| node.is_live());
            nodes.insert(id.clone(), proxy.downgrade());
        }
        // seeded after the node is cached so cyclic content resolves to it
        proxy.seed();
        Some(proxy)
    }

    fn cached(&self, id: &ContainerId) -> Option<Proxy> {
        self.inner.nodes.lock().get(id).and_then(WeakProxy::upgrade)
    }

    /// Number of live proxy nodes.
    pub fn node_count(&self) -> usize {
        self.inner
            .nodes
            .lock()
            .values()
            .filter(|node| node.is_live())
            .count()
    }

    /// Forget every cached node. Proxies still held elsewhere keep working
    /// but are no longer returned by [`Store::wrap`].
    pub fn clear(&self) {
        self.inner.nodes.lock().clear();
    }

    pub fn encode(&self, value: &Value) -> Prelim {
        codec::to_replica(value, &Seen::new(&self.inner.doc))
    }

    pub fn decode(&self, value: &ReplicaValue) -> Value {
        codec::from_replica(value, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_returns_same_node() {
        let store = Store::new(Doc::with_client(1));
        let a = store.map("states-r").unwrap();
        let b = store.map("states-r").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn dropped_nodes_leave_the_cache() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        drop(map);
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn nodes_rest_in_observing_state() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        map.set("a", 1);
        assert_eq!(Proxy::Map(map).state(), NodeState::Observing);
    }

    #[test]
    fn root_kind_conflicts_are_reported() {
        let store = Store::new(Doc::with_client(1));
        store.map("shared").unwrap();
        assert!(store.array("shared").is_err());
    }

    #[test]
    fn wrap_unknown_container_is_none() {
        let store = Store::new(Doc::with_client(1));
        assert!(store
            .wrap(&ContainerId::Created(crate::OpId::new(9, 9)))
            .is_none());
    }
}
