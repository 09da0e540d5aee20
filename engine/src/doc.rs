//! The replicated document.
//!
//! A [`Doc`] holds every container of one room. It integrates operations from
//! two sources:
//!
//! - local transactions ([`Doc::transact`]), which mint new [`OpId`]s, and
//! - remote batches ([`Doc::apply_update`]), which may arrive duplicated or
//!   ahead of their dependencies. Duplicates are dropped; operations whose
//!   target container or origin element is still unknown are parked until it
//!   shows up.
//!
//! The state lives behind one mutex per document. Every transaction or remote
//! batch is stamped with a commit number and queued while the lock is held.
//! Queued batches are delivered after the lock is released, strictly in commit
//! order, by whichever thread holds the dispatch lock. Observers are free to
//! read the document or start another transaction; a transaction started from
//! inside a callback is delivered once that callback returns.

use crate::container::{ContainerState, Rga};
use crate::event::{Change, ChangeEvent, SeqDelta, TextDelta, UpdateEvent};
use crate::{
    ClientId, ContainerId, ContainerKind, Error, LamportClock, Op, OpAction, OpId, Origin,
    ReplicaValue, Result, Scalar,
};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

/// Highest integrated counter per client.
pub type StateVector = BTreeMap<ClientId, u64>;

type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Content to write into the document. Nested variants become new
/// containers when the transaction integrates them.
#[derive(Debug, Clone, PartialEq)]
pub enum Prelim {
    Scalar(Scalar),
    Map(Vec<(String, Prelim)>),
    Sequence(Vec<Prelim>),
    Text(String),
    Register(Scalar),
    /// Reference to a container that already exists in the target document.
    Existing(ContainerId),
}

impl Prelim {
    pub fn null() -> Self {
        Prelim::Scalar(Scalar::Null)
    }
}

/// Outcome of integrating a remote batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Operations integrated by this call (including released parked ones)
    pub applied: usize,
    /// Operations that had already been integrated
    pub duplicates: usize,
    /// Operations still waiting for a dependency after this call
    pub pending: usize,
}

enum Integration {
    Applied,
    Duplicate,
    Missing,
}

struct DocState {
    clock: LamportClock,
    containers: HashMap<ContainerId, ContainerState>,
    log: Vec<Op>,
    applied: HashSet<OpId>,
    pending: Vec<Op>,
    state_vector: StateVector,
    commits: u64,
    queue: VecDeque<Batch>,
}

/// Everything one commit produced, waiting to be delivered.
struct Batch {
    events: Vec<ChangeEvent>,
    update: UpdateEvent,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    containers: HashMap<ContainerId, Vec<(u64, ChangeCallback)>>,
    updates: Vec<(u64, UpdateCallback)>,
}

struct DocShared {
    client: ClientId,
    state: Mutex<DocState>,
    observers: Mutex<Observers>,
    /// Held while queued batches are delivered. The flag marks the thread
    /// that is draining, so nested commits only enqueue.
    dispatch: ReentrantMutex<Cell<bool>>,
}

/// Handle to a replicated document. Cloning the handle shares the document.
#[derive(Clone)]
pub struct Doc {
    shared: Arc<DocShared>,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("client", &format_args!("{:x}", self.shared.client))
            .field("ops", &self.op_count())
            .finish()
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    /// Create an empty document with a random client id.
    pub fn new() -> Self {
        Self::with_client(rand::random())
    }

    /// Create an empty document with a fixed client id.
    pub fn with_client(client: ClientId) -> Self {
        let state = DocState {
            clock: LamportClock::new(client),
            containers: HashMap::new(),
            log: Vec::new(),
            applied: HashSet::new(),
            pending: Vec::new(),
            state_vector: StateVector::new(),
            commits: 0,
            queue: VecDeque::new(),
        };
        Self {
            shared: Arc::new(DocShared {
                client,
                state: Mutex::new(state),
                observers: Mutex::new(Observers::default()),
                dispatch: ReentrantMutex::new(Cell::new(false)),
            }),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.shared.client
    }

    /// Whether two handles refer to the same document.
    pub fn ptr_eq(&self, other: &Doc) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Get or lazily create a named top-level container.
    pub fn root(&self, name: &str, kind: ContainerKind) -> Result<ContainerId> {
        if name.is_empty() {
            return Err(Error::InvalidRootName(name.to_string()));
        }
        let id = ContainerId::root(name);
        let mut state = self.shared.state.lock();
        let container = state
            .containers
            .entry(id.clone())
            .or_insert_with(|| ContainerState::new(kind));
        if container.kind() != kind {
            return Err(Error::KindMismatch {
                id,
                expected: kind,
                found: container.kind(),
            });
        }
        Ok(id)
    }

    pub fn kind_of(&self, id: &ContainerId) -> Option<ContainerKind> {
        self.shared.state.lock().containers.get(id).map(|c| c.kind())
    }

    /// True when the container is missing or holds no visible content.
    pub fn is_empty(&self, id: &ContainerId) -> bool {
        self.shared
            .state
            .lock()
            .containers
            .get(id)
            .map_or(true, |c| c.is_empty())
    }

    pub fn map_get(&self, id: &ContainerId, key: &str) -> Option<ReplicaValue> {
        match self.shared.state.lock().containers.get(id) {
            Some(ContainerState::Map(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// Visible entries of a map, in key order. `None` if `id` is not a map.
    pub fn map_entries(&self, id: &ContainerId) -> Option<Vec<(String, ReplicaValue)>> {
        match self.shared.state.lock().containers.get(id) {
            Some(ContainerState::Map(map)) => Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn seq_values(&self, id: &ContainerId) -> Option<Vec<ReplicaValue>> {
        match self.shared.state.lock().containers.get(id) {
            Some(ContainerState::Sequence(seq)) => Some(seq.visible().cloned().collect()),
            _ => None,
        }
    }

    pub fn text(&self, id: &ContainerId) -> Option<String> {
        match self.shared.state.lock().containers.get(id) {
            Some(ContainerState::Text(text)) => Some(text.text()),
            _ => None,
        }
    }

    pub fn register(&self, id: &ContainerId) -> Option<Scalar> {
        match self.shared.state.lock().containers.get(id) {
            Some(ContainerState::Register(reg)) => Some(reg.value.clone()),
            _ => None,
        }
    }

    pub fn state_vector(&self) -> StateVector {
        self.shared.state.lock().state_vector.clone()
    }

    /// Operations a replica at `remote` has not integrated yet, in causal
    /// order.
    pub fn ops_since(&self, remote: &StateVector) -> Vec<Op> {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .filter(|op| op.id.counter > remote.get(&op.id.client).copied().unwrap_or(0))
            .cloned()
            .collect()
    }

    /// Every integrated operation followed by the parked ones.
    pub fn ops(&self) -> Vec<Op> {
        let state = self.shared.state.lock();
        state.log.iter().chain(state.pending.iter()).cloned().collect()
    }

    pub fn op_count(&self) -> usize {
        self.shared.state.lock().log.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Names of all top-level containers present in the document.
    pub fn root_names(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<String> = state
            .containers
            .keys()
            .filter_map(|id| match id {
                ContainerId::Root(name) => Some(name.clone()),
                ContainerId::Created(_) => None,
            })
            .collect();
        names.sort();
        names
    }

    /// Materialize every top-level container as JSON. Cyclic container
    /// references materialize as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.shared.state.lock();
        let mut roots: Vec<&ContainerId> =
            state.containers.keys().filter(|id| id.is_root()).collect();
        roots.sort();
        let mut out = serde_json::Map::new();
        for id in roots {
            let mut path = Vec::new();
            out.insert(id.to_string(), state.materialize(id, &mut path));
        }
        serde_json::Value::Object(out)
    }

    /// Materialize one container as JSON.
    pub fn container_json(&self, id: &ContainerId) -> serde_json::Value {
        let state = self.shared.state.lock();
        let mut path = Vec::new();
        state.materialize(id, &mut path)
    }

    /// Run a local transaction. Every operation it produces integrates
    /// immediately; observers are notified once the closure returns, even if
    /// it returned an error part-way.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<R>) -> Result<R> {
        let result = {
            let mut state = self.shared.state.lock();
            let mut txn = Transaction {
                state: &mut state,
                ops: Vec::new(),
                events: Vec::new(),
            };
            let result = f(&mut txn);
            let (ops, events) = (txn.ops, txn.events);
            state.commit(events, Origin::Local, ops);
            result
        };
        self.flush();
        result
    }

    /// Integrate a batch of operations received from elsewhere.
    pub fn apply_update(&self, ops: Vec<Op>) -> ApplyStats {
        let mut stats = ApplyStats::default();
        {
            let mut state = self.shared.state.lock();
            let mut integrated = Vec::new();
            let mut events = Vec::new();
            for op in ops {
                match state.integrate(&op, Origin::Remote, &mut events) {
                    Integration::Applied => {
                        integrated.push(op);
                        state.release_pending(&mut integrated, &mut events);
                    }
                    Integration::Duplicate => stats.duplicates += 1,
                    Integration::Missing => {
                        if !state.pending.iter().any(|p| p.id == op.id) {
                            state.pending.push(op);
                        }
                    }
                }
            }
            stats.pending = state.pending.len();
            stats.applied = integrated.len();
            state.commit(events, Origin::Remote, integrated);
        }
        if stats.pending > 0 {
            tracing::debug!(pending = stats.pending, "operations parked awaiting dependencies");
        }
        self.flush();
        stats
    }

    /// Number of the last commit, read together with one container. A mirror
    /// seeded from the result already reflects every change event stamped
    /// with a commit number at or below it.
    pub(crate) fn read_container<R>(
        &self,
        id: &ContainerId,
        f: impl FnOnce(Option<&ContainerState>) -> R,
    ) -> (u64, R) {
        let state = self.shared.state.lock();
        (state.commits, f(state.containers.get(id)))
    }

    /// Observe changes to one container. Dropping the returned
    /// [`Subscription`] stops the callbacks.
    pub fn observe(
        &self,
        container: ContainerId,
        f: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut observers = self.shared.observers.lock();
        observers.next_id += 1;
        let id = observers.next_id;
        observers
            .containers
            .entry(container.clone())
            .or_default()
            .push((id, Arc::new(f)));
        Subscription {
            doc: Arc::downgrade(&self.shared),
            id,
            container: Some(container),
        }
    }

    /// Observe every batch of integrated operations.
    pub fn observe_updates(
        &self,
        f: impl Fn(&UpdateEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut observers = self.shared.observers.lock();
        observers.next_id += 1;
        let id = observers.next_id;
        observers.updates.push((id, Arc::new(f)));
        Subscription {
            doc: Arc::downgrade(&self.shared),
            id,
            container: None,
        }
    }

    /// Deliver queued batches in commit order. Returns once the queue is
    /// empty, so a caller's own commit has been observed when this returns,
    /// except from inside a callback, where the outer drain picks it up.
    fn flush(&self) {
        let draining = self.shared.dispatch.lock();
        if draining.replace(true) {
            return;
        }
        let _reset = DrainGuard(&*draining);
        loop {
            let next = self.shared.state.lock().queue.pop_front();
            let Some(batch) = next else { break };
            self.deliver(batch);
        }
    }

    fn deliver(&self, batch: Batch) {
        for event in &batch.events {
            let callbacks: Vec<ChangeCallback> = {
                let observers = self.shared.observers.lock();
                observers
                    .containers
                    .get(&event.container)
                    .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                    .unwrap_or_default()
            };
            for callback in callbacks {
                callback(event);
            }
        }

        if batch.update.ops.is_empty() {
            return;
        }
        let callbacks: Vec<UpdateCallback> = {
            let observers = self.shared.observers.lock();
            observers.updates.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(&batch.update);
        }
    }
}

/// Clears the draining flag even if a callback panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Keeps an observer registered. Unregisters on drop.
pub struct Subscription {
    doc: Weak<DocShared>,
    id: u64,
    container: Option<ContainerId>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("container", &self.container)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.doc.upgrade() else {
            return;
        };
        let mut observers = shared.observers.lock();
        match &self.container {
            Some(container) => {
                if let Some(subs) = observers.containers.get_mut(container) {
                    subs.retain(|(id, _)| *id != self.id);
                    if subs.is_empty() {
                        observers.containers.remove(container);
                    }
                }
            }
            None => observers.updates.retain(|(id, _)| *id != self.id),
        }
    }
}

impl DocState {
    /// Stamp a commit and queue it for delivery.
    fn commit(&mut self, mut events: Vec<ChangeEvent>, origin: Origin, ops: Vec<Op>) {
        if events.is_empty() && ops.is_empty() {
            return;
        }
        self.commits += 1;
        for event in &mut events {
            event.seq = self.commits;
        }
        self.queue.push_back(Batch {
            events,
            update: UpdateEvent { origin, ops },
        });
    }

    fn integrate(&mut self, op: &Op, origin: Origin, events: &mut Vec<ChangeEvent>) -> Integration {
        if self.applied.contains(&op.id) {
            return Integration::Duplicate;
        }

        let change = match &op.action {
            OpAction::Create { kind } => {
                if op.target != ContainerId::Created(op.id) {
                    tracing::warn!(op = %op.id, target = %op.target, "create op with foreign target ignored");
                } else {
                    self.containers
                        .entry(op.target.clone())
                        .or_insert_with(|| ContainerState::new(*kind));
                }
                None
            }
            action => {
                let Some(expected) = action.target_kind() else {
                    return Integration::Missing;
                };
                if op.target.is_root() && !self.containers.contains_key(&op.target) {
                    self.containers
                        .insert(op.target.clone(), ContainerState::new(expected));
                }
                let Some(container) = self.containers.get_mut(&op.target) else {
                    return Integration::Missing;
                };
                if container.kind() != expected {
                    tracing::warn!(
                        op = %op.id,
                        target = %op.target,
                        expected = %expected,
                        found = %container.kind(),
                        "operation does not match container kind, discarding"
                    );
                    None
                } else {
                    match apply_action(container, op.id, action) {
                        Ok(change) => change,
                        Err(()) => return Integration::Missing,
                    }
                }
            }
        };

        self.applied.insert(op.id);
        self.clock.observe(&op.id);
        let seen = self.state_vector.entry(op.id.client).or_insert(0);
        *seen = (*seen).max(op.id.counter);
        self.log.push(op.clone());

        if let Some(change) = change {
            events.push(ChangeEvent {
                container: op.target.clone(),
                origin,
                change,
                seq: 0,
            });
        }
        Integration::Applied
    }

    /// Retry parked operations until no more of them integrate.
    fn release_pending(&mut self, integrated: &mut Vec<Op>, events: &mut Vec<ChangeEvent>) {
        loop {
            let mut progress = false;
            for op in std::mem::take(&mut self.pending) {
                match self.integrate(&op, Origin::Remote, events) {
                    Integration::Applied => {
                        integrated.push(op);
                        progress = true;
                    }
                    Integration::Duplicate => {}
                    Integration::Missing => self.pending.push(op),
                }
            }
            if !progress || self.pending.is_empty() {
                break;
            }
        }
    }

    fn materialize(&self, id: &ContainerId, path: &mut Vec<ContainerId>) -> serde_json::Value {
        if path.contains(id) {
            return serde_json::Value::Null;
        }
        let Some(container) = self.containers.get(id) else {
            return serde_json::Value::Null;
        };
        path.push(id.clone());
        let value = match container {
            ContainerState::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.materialize_value(v, path)))
                    .collect(),
            ),
            ContainerState::Sequence(seq) => serde_json::Value::Array(
                seq.visible()
                    .map(|v| self.materialize_value(v, path))
                    .collect(),
            ),
            ContainerState::Text(text) => serde_json::Value::String(text.text()),
            ContainerState::Register(reg) => reg.value.to_json(),
        };
        path.pop();
        value
    }

    fn materialize_value(&self, value: &ReplicaValue, path: &mut Vec<ContainerId>) -> serde_json::Value {
        match value {
            ReplicaValue::Scalar(scalar) => scalar.to_json(),
            ReplicaValue::Container(id) => self.materialize(id, path),
        }
    }
}

/// Apply a non-create action to a container of the right kind. `Err` means a
/// referenced element is not known yet.
fn apply_action(
    container: &mut ContainerState,
    id: OpId,
    action: &OpAction,
) -> std::result::Result<Option<Change>, ()> {
    let change = match (container, action) {
        (ContainerState::Map(map), OpAction::MapSet { key, value }) => map
            .apply(id, key, Some(value.clone()))
            .map(|c| Change::Map(vec![c])),
        (ContainerState::Map(map), OpAction::MapDelete { key }) => {
            map.apply(id, key, None).map(|c| Change::Map(vec![c]))
        }
        (ContainerState::Sequence(seq), OpAction::SeqInsert { after, value }) => {
            if matches!(after, Some(origin) if !seq.contains(origin)) {
                return Err(());
            }
            seq.insert(id, *after, value.clone())
                .map(|index| Change::Sequence(vec![Rga::<ReplicaValue>::insert_delta(index, value.clone())]))
        }
        (ContainerState::Sequence(seq), OpAction::SeqDelete { elem }) => {
            if !seq.contains(elem) {
                return Err(());
            }
            seq.delete(elem)
                .map(|index| Change::Sequence(vec![SeqDelta::Delete { index, len: 1 }]))
        }
        (ContainerState::Text(text), OpAction::TextInsert { after, ch }) => {
            if matches!(after, Some(origin) if !text.contains(origin)) {
                return Err(());
            }
            text.insert(id, *after, *ch)
                .map(|index| Change::Text(vec![Rga::<char>::insert_delta(index, *ch)]))
        }
        (ContainerState::Text(text), OpAction::TextDelete { elem }) => {
            if !text.contains(elem) {
                return Err(());
            }
            text.delete(elem)
                .map(|index| Change::Text(vec![TextDelta::Delete { index, len: 1 }]))
        }
        (ContainerState::Register(reg), OpAction::RegisterSet { value }) => {
            reg.apply(id, value.clone()).map(Change::Register)
        }
        _ => None,
    };
    Ok(change)
}

/// A local transaction. Obtained through [`Doc::transact`].
pub struct Transaction<'a> {
    state: &'a mut DocState,
    ops: Vec<Op>,
    events: Vec<ChangeEvent>,
}

impl Transaction<'_> {
    fn push(&mut self, target: ContainerId, action: OpAction) -> Result<OpId> {
        let id = self.state.clock.tick();
        let op = Op::new(id, target.clone(), action);
        match self.state.integrate(&op, Origin::Local, &mut self.events) {
            Integration::Applied => {
                self.ops.push(op);
                Ok(id)
            }
            Integration::Duplicate | Integration::Missing => Err(Error::ContainerNotFound(target)),
        }
    }

    fn expect(&self, id: &ContainerId, kind: ContainerKind) -> Result<&ContainerState> {
        let container = self
            .state
            .containers
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.clone()))?;
        if container.kind() != kind {
            return Err(Error::KindMismatch {
                id: id.clone(),
                expected: kind,
                found: container.kind(),
            });
        }
        Ok(container)
    }

    /// Create an empty nested container.
    pub fn create(&mut self, kind: ContainerKind) -> Result<ContainerId> {
        let id = self.state.clock.tick();
        let target = ContainerId::Created(id);
        let op = Op::new(id, target.clone(), OpAction::Create { kind });
        self.state.integrate(&op, Origin::Local, &mut self.events);
        self.ops.push(op);
        Ok(target)
    }

    /// Turn preliminary content into a slot value, creating containers for
    /// nested content.
    pub fn integrate_prelim(&mut self, prelim: Prelim) -> Result<ReplicaValue> {
        match prelim {
            Prelim::Scalar(scalar) => Ok(ReplicaValue::Scalar(scalar)),
            Prelim::Map(entries) => {
                let id = self.create(ContainerKind::Map)?;
                for (key, value) in entries {
                    self.map_set(&id, &key, value)?;
                }
                Ok(ReplicaValue::Container(id))
            }
            Prelim::Sequence(items) => {
                let id = self.create(ContainerKind::Sequence)?;
                self.seq_insert(&id, 0, items)?;
                Ok(ReplicaValue::Container(id))
            }
            Prelim::Text(text) => {
                let id = self.create(ContainerKind::Text)?;
                self.text_insert(&id, 0, &text)?;
                Ok(ReplicaValue::Container(id))
            }
            Prelim::Register(value) => {
                let id = self.create(ContainerKind::Register)?;
                self.register_set(&id, value)?;
                Ok(ReplicaValue::Container(id))
            }
            Prelim::Existing(id) => {
                if self.state.containers.contains_key(&id) {
                    Ok(ReplicaValue::Container(id))
                } else {
                    Err(Error::ContainerNotFound(id))
                }
            }
        }
    }

    /// Set a map key. Returns the slot value that was written.
    pub fn map_set(&mut self, map: &ContainerId, key: &str, value: Prelim) -> Result<ReplicaValue> {
        self.expect(map, ContainerKind::Map)?;
        let value = self.integrate_prelim(value)?;
        self.push(
            map.clone(),
            OpAction::MapSet {
                key: key.to_string(),
                value: value.clone(),
            },
        )?;
        Ok(value)
    }

    /// Delete a map key. Returns false if the key was not present.
    pub fn map_delete(&mut self, map: &ContainerId, key: &str) -> Result<bool> {
        let present = match self.expect(map, ContainerKind::Map)? {
            ContainerState::Map(state) => state.get(key).is_some(),
            _ => false,
        };
        if present {
            self.push(
                map.clone(),
                OpAction::MapDelete {
                    key: key.to_string(),
                },
            )?;
        }
        Ok(present)
    }

    pub fn seq_len(&self, seq: &ContainerId) -> Result<usize> {
        match self.expect(seq, ContainerKind::Sequence)? {
            ContainerState::Sequence(state) => Ok(state.visible_len()),
            _ => Ok(0),
        }
    }

    /// Insert values at a visible index. Returns the slot values written.
    pub fn seq_insert(
        &mut self,
        seq: &ContainerId,
        index: usize,
        values: Vec<Prelim>,
    ) -> Result<Vec<ReplicaValue>> {
        let mut after = match self.expect(seq, ContainerKind::Sequence)? {
            ContainerState::Sequence(state) => {
                let len = state.visible_len();
                if index > len {
                    return Err(Error::IndexOutOfBounds { index, len });
                }
                if index == 0 {
                    None
                } else {
                    state.id_at(index - 1)
                }
            }
            _ => None,
        };
        let mut written = Vec::with_capacity(values.len());
        for prelim in values {
            let value = self.integrate_prelim(prelim)?;
            let id = self.push(
                seq.clone(),
                OpAction::SeqInsert {
                    after,
                    value: value.clone(),
                },
            )?;
            after = Some(id);
            written.push(value);
        }
        Ok(written)
    }

    /// Delete `len` visible elements starting at `index`.
    pub fn seq_delete(&mut self, seq: &ContainerId, index: usize, len: usize) -> Result<()> {
        let ids = match self.expect(seq, ContainerKind::Sequence)? {
            ContainerState::Sequence(state) => {
                let total = state.visible_len();
                if index + len > total {
                    return Err(Error::IndexOutOfBounds {
                        index: index + len,
                        len: total,
                    });
                }
                (index..index + len)
                    .filter_map(|i| state.id_at(i))
                    .collect::<Vec<_>>()
            }
            _ => Vec::new(),
        };
        for elem in ids {
            self.push(seq.clone(), OpAction::SeqDelete { elem })?;
        }
        Ok(())
    }

    /// Length of a text container in characters.
    pub fn text_len(&self, text: &ContainerId) -> Result<usize> {
        match self.expect(text, ContainerKind::Text)? {
            ContainerState::Text(state) => Ok(state.visible_len()),
            _ => Ok(0),
        }
    }

    /// Insert text at a character index.
    pub fn text_insert(&mut self, text: &ContainerId, index: usize, content: &str) -> Result<()> {
        let mut after = match self.expect(text, ContainerKind::Text)? {
            ContainerState::Text(state) => {
                let len = state.visible_len();
                if index > len {
                    return Err(Error::IndexOutOfBounds { index, len });
                }
                if index == 0 {
                    None
                } else {
                    state.id_at(index - 1)
                }
            }
            _ => None,
        };
        for ch in content.chars() {
            let id = self.push(text.clone(), OpAction::TextInsert { after, ch })?;
            after = Some(id);
        }
        Ok(())
    }

    /// Delete `len` characters starting at a character index.
    pub fn text_delete(&mut self, text: &ContainerId, index: usize, len: usize) -> Result<()> {
        let ids = match self.expect(text, ContainerKind::Text)? {
            ContainerState::Text(state) => {
                let total = state.visible_len();
                if index + len > total {
                    return Err(Error::IndexOutOfBounds {
                        index: index + len,
                        len: total,
                    });
                }
                (index..index + len)
                    .filter_map(|i| state.id_at(i))
                    .collect::<Vec<_>>()
            }
            _ => Vec::new(),
        };
        for elem in ids {
            self.push(text.clone(), OpAction::TextDelete { elem })?;
        }
        Ok(())
    }

    pub fn register_set(&mut self, register: &ContainerId, value: Scalar) -> Result<()> {
        self.expect(register, ContainerKind::Register)?;
        self.push(register.clone(), OpAction::RegisterSet { value })?;
        Ok(())
    }
}
