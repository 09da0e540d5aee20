use super::{NodeCore, NodeState, Proxy, Store};
use crate::container::ContainerState;
use crate::event::SeqDelta;
use crate::{Change, ChangeEvent, ContainerId, Prelim, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct ArrayNode {
    core: NodeCore,
    mirror: RwLock<Vec<Value>>,
}

enum Patch {
    Insert(usize, Vec<Value>),
    Delete(usize, usize),
}

impl Patch {
    /// Out-of-range positions are clamped to the mirror.
    fn apply(self, mirror: &mut Vec<Value>) {
        match self {
            Patch::Insert(index, values) => {
                let index = index.min(mirror.len());
                mirror.splice(index..index, values);
            }
            Patch::Delete(index, len) => {
                let start = index.min(mirror.len());
                let end = index.saturating_add(len).min(mirror.len());
                mirror.drain(start..end);
            }
        }
    }
}

/// Proxy over a replicated sequence.
#[derive(Clone)]
pub struct ArrayProxy(Arc<ArrayNode>);

impl ArrayProxy {
    pub(super) fn attach(store: Store, id: ContainerId) -> Self {
        let node = Arc::new(ArrayNode {
            core: NodeCore::new(store, id.clone()),
            mirror: RwLock::new(Vec::new()),
        });
        let weak = Arc::downgrade(&node);
        let subscription = node.core.store.doc().observe(id, move |event| {
            if let Some(node) = weak.upgrade() {
                ArrayProxy(node).apply_event(event);
            }
        });
        node.core.attach(subscription);
        ArrayProxy(node)
    }

    pub(super) fn from_node(node: Arc<ArrayNode>) -> Self {
        ArrayProxy(node)
    }

    pub(super) fn downgrade(&self) -> Weak<ArrayNode> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn core(&self) -> &NodeCore {
        &self.0.core
    }

    pub(super) fn seed(&self) {
        let core = &self.0.core;
        let mut mirror = self.0.mirror.write();
        let (seq, values) = core.read(|container| match container {
            Some(ContainerState::Sequence(seq)) => seq.visible().cloned().collect(),
            _ => Vec::new(),
        });
        *mirror = values.iter().map(|v| core.store.decode(v)).collect();
        core.seeded_at(seq);
    }

    fn apply_event(&self, event: &ChangeEvent) {
        let Change::Sequence(deltas) = &event.change else {
            return;
        };
        let core = &self.0.core;
        let _scope = core.applying(event);
        let patches: Vec<Patch> = deltas
            .iter()
            .map(|delta| match delta {
                SeqDelta::Insert { index, values } => Patch::Insert(
                    *index,
                    values.iter().map(|v| core.store.decode(v)).collect(),
                ),
                SeqDelta::Delete { index, len } => Patch::Delete(*index, *len),
            })
            .collect();

        // inserting shifts existing elements, which keep their proxies
        let mut mirror = self.0.mirror.write();
        if core.reflects(event) {
            return;
        }
        for patch in patches {
            patch.apply(&mut mirror);
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.0.core.id
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.mirror.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.mirror.read().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.mirror.read().clone()
    }

    /// Remove `delete_count` elements at `start` and insert `items` in their
    /// place, as one transaction. Returns the removed elements. Out-of-range
    /// arguments are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        self.splice_inner(start, delete_count, items).0
    }

    fn splice_inner(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> (Vec<Value>, Vec<Value>) {
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let (start, removed) = {
            let mirror = self.0.mirror.read();
            let start = start.min(mirror.len());
            let end = start.saturating_add(delete_count).min(mirror.len());
            (start, mirror[start..end].to_vec())
        };
        let delete_count = removed.len();
        let prelims: Vec<Prelim> = items.iter().map(|v| core.store.encode(v)).collect();

        // the mirror may trail a commit still being delivered
        let written = core.write("array.splice", |txn| {
            let len = txn.seq_len(&core.id)?;
            let start = start.min(len);
            let delete_count = delete_count.min(len - start);
            if delete_count > 0 {
                txn.seq_delete(&core.id, start, delete_count)?;
            }
            txn.seq_insert(&core.id, start, prelims)
        });
        let inserted = match written {
            Some(written) => written.iter().map(|v| core.store.decode(v)).collect(),
            None => {
                let mut mirror = self.0.mirror.write();
                Patch::Delete(start, delete_count).apply(&mut mirror);
                Patch::Insert(start, items.clone()).apply(&mut mirror);
                items
            }
        };
        (removed, inserted)
    }

    /// Append a value. Returns it as it now reads back.
    pub fn push(&self, value: impl Into<Value>) -> Value {
        let len = self.len();
        self.splice_inner(len, 0, vec![value.into()])
            .1
            .pop()
            .unwrap_or(Value::Null)
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        let len = self.len();
        self.splice_inner(len, 0, values.into_iter().collect());
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Value {
        self.splice_inner(index, 0, vec![value.into()])
            .1
            .pop()
            .unwrap_or(Value::Null)
    }

    /// Insert at the front.
    pub fn unshift(&self, value: impl Into<Value>) -> Value {
        self.insert(0, value)
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        self.splice(index, 1, Vec::new()).pop()
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.remove(len - 1)
    }

    /// Remove from the front.
    pub fn shift(&self) -> Option<Value> {
        self.remove(0)
    }

    /// Replace the element at `index`. Writing past the end pads the gap
    /// with nulls.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Value {
        let value = value.into();
        let len = self.len();
        let mut inserted = if index < len {
            self.splice_inner(index, 1, vec![value]).1
        } else {
            let mut items = vec![Value::Null; index - len];
            items.push(value);
            self.splice_inner(len, 0, items).1
        };
        inserted.pop().unwrap_or(Value::Null)
    }

    pub fn to_value(&self) -> Value {
        Proxy::Array(self.clone()).to_value()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }
}

impl PartialEq for ArrayProxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArrayProxy")
            .field(&self.id().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Doc;
    use serde_json::json;

    fn sync(a: &Store, b: &Store) {
        b.doc().apply_update(a.doc().ops_since(&b.doc().state_vector()));
        a.doc().apply_update(b.doc().ops_since(&a.doc().state_vector()));
    }

    #[test]
    fn push_insert_remove() {
        let store = Store::new(Doc::with_client(1));
        let list = store.array("layers").unwrap();
        list.push("b");
        list.unshift("a");
        list.insert(2, "c");
        assert_eq!(list.to_json(), json!(["a", "b", "c"]));

        assert_eq!(list.remove(1), Some(Value::from("b")));
        assert_eq!(list.pop(), Some(Value::from("c")));
        assert_eq!(list.shift(), Some(Value::from("a")));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn set_past_end_pads_with_nulls() {
        let store = Store::new(Doc::with_client(1));
        let list = store.array("layers").unwrap();
        list.push(1);
        list.set(3, 4);
        assert_eq!(list.to_json(), json!([1.0, null, null, 4.0]));
        list.set(0, "first");
        assert_eq!(list.get(0), Some(Value::from("first")));
        assert_eq!(store.doc().container_json(list.id()), list.to_json());
    }

    #[test]
    fn splice_replaces_range() {
        let store = Store::new(Doc::with_client(1));
        let list = store.array("layers").unwrap();
        list.extend([1, 2, 3, 4].map(Value::from));
        let removed = list.splice(1, 2, vec![Value::from("x")]);
        assert_eq!(removed, vec![Value::Number(2.0), Value::Number(3.0)]);
        assert_eq!(list.to_json(), json!([1.0, "x", 4.0]));
    }

    #[test]
    fn remote_insert_shifts_and_keeps_identity() {
        let a = Store::new(Doc::with_client(1));
        let b = Store::new(Doc::with_client(2));
        let la = a.array("layers").unwrap();
        la.push(Value::object([("name", Value::from("bg"))]));
        sync(&a, &b);

        let lb = b.array("layers").unwrap();
        let first = lb.get(0).unwrap();
        la.unshift(Value::object([("name", Value::from("fg"))]));
        sync(&a, &b);

        assert_eq!(lb.len(), 2);
        assert_eq!(lb.get(1), Some(first));
        assert_eq!(lb.to_json(), json!([{"name": "fg"}, {"name": "bg"}]));
    }

    #[test]
    fn concurrent_pushes_converge() {
        let a = Store::new(Doc::with_client(1));
        let b = Store::new(Doc::with_client(2));
        let la = a.array("log").unwrap();
        let lb = b.array("log").unwrap();

        la.push("from-a");
        lb.push("from-b");
        sync(&a, &b);

        assert_eq!(la.to_json(), lb.to_json());
        assert_eq!(la.len(), 2);
    }
}
