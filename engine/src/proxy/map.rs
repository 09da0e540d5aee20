use super::{BoxProxy, NodeCore, NodeState, Proxy, Store, TextProxy};
use crate::container::ContainerState;
use crate::event::KeyChange;
use crate::{Change, ChangeEvent, ContainerId, Prelim, ReplicaValue, Scalar, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct MapNode {
    core: NodeCore,
    mirror: RwLock<BTreeMap<String, Value>>,
}

/// Proxy over a replicated map.
#[derive(Clone)]
pub struct MapProxy(Arc<MapNode>);

impl MapProxy {
    pub(super) fn attach(store: Store, id: ContainerId) -> Self {
        let node = Arc::new(MapNode {
            core: NodeCore::new(store, id.clone()),
            mirror: RwLock::new(BTreeMap::new()),
        });
        let weak = Arc::downgrade(&node);
        let subscription = node.core.store.doc().observe(id, move |event| {
            if let Some(node) = weak.upgrade() {
                MapProxy(node).apply_event(event);
            }
        });
        node.core.attach(subscription);
        MapProxy(node)
    }

    pub(super) fn from_node(node: Arc<MapNode>) -> Self {
        MapProxy(node)
    }

    pub(super) fn downgrade(&self) -> Weak<MapNode> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn core(&self) -> &NodeCore {
        &self.0.core
    }

    pub(super) fn seed(&self) {
        let core = &self.0.core;
        let mut mirror = self.0.mirror.write();
        let (seq, entries) = core.read(|container| match container {
            Some(ContainerState::Map(map)) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Vec::<(String, ReplicaValue)>::new(),
        });
        *mirror = entries
            .iter()
            .map(|(key, value)| (key.clone(), core.store.decode(value)))
            .collect();
        core.seeded_at(seq);
    }

    fn apply_event(&self, event: &ChangeEvent) {
        let Change::Map(changes) = &event.change else {
            return;
        };
        let core = &self.0.core;
        let _scope = core.applying(event);
        let decoded: Vec<(String, Option<Value>)> = changes
            .iter()
            .map(|change| match change {
                KeyChange::Added { key, value } | KeyChange::Updated { key, value } => {
                    (key.clone(), Some(core.store.decode(value)))
                }
                KeyChange::Removed { key } => (key.clone(), None),
            })
            .collect();

        let mut mirror = self.0.mirror.write();
        if core.reflects(event) {
            return;
        }
        for (key, value) in decoded {
            match value {
                Some(value) => {
                    mirror.insert(key, value);
                }
                None => {
                    mirror.remove(&key);
                }
            }
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.0.core.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.mirror.read().get(key).cloned()
    }

    /// Write a key. Returns the value as it now reads back: nested objects
    /// and arrays come back as proxies.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let prelim = core.store.encode(&value);
        match core.write("map.set", |txn| txn.map_set(&core.id, key, prelim)) {
            Some(written) => core.store.decode(&written),
            None => {
                self.0.mirror.write().insert(key.to_string(), value.clone());
                value
            }
        }
    }

    /// Write a new text container under `key`.
    pub fn set_text(&self, key: &str, content: &str) -> Option<TextProxy> {
        self.set_prelim(key, Prelim::Text(content.to_string()))
            .as_proxy()
            .and_then(|p| p.as_text().cloned())
    }

    /// Write a new register container under `key`. Non-scalar values are
    /// stored as `null`.
    pub fn set_box(&self, key: &str, value: impl Into<Value>) -> Option<BoxProxy> {
        let scalar = match self.0.core.store.encode(&value.into()) {
            Prelim::Scalar(scalar) => scalar,
            other => {
                tracing::warn!(container = %self.id(), key, value = ?other, "box values must be scalars");
                Scalar::Null
            }
        };
        self.set_prelim(key, Prelim::Register(scalar))
            .as_proxy()
            .and_then(|p| p.as_box().cloned())
    }

    fn set_prelim(&self, key: &str, prelim: Prelim) -> Value {
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        match core.write("map.set", |txn| txn.map_set(&core.id, key, prelim)) {
            Some(written) => core.store.decode(&written),
            None => {
                self.0.mirror.write().insert(key.to_string(), Value::Null);
                Value::Null
            }
        }
    }

    /// Remove a key. Returns the removed value.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let previous = self.get(key);
        if core.write("map.delete", |txn| txn.map_delete(&core.id, key)).is_none() {
            self.0.mirror.write().remove(key);
        }
        previous
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.mirror.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.mirror.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .mirror
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.mirror.read().is_empty()
    }

    pub fn to_value(&self) -> Value {
        Proxy::Map(self.clone()).to_value()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }
}

impl PartialEq for MapProxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MapProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapProxy").field(&self.id().to_string()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Doc;
    use serde_json::json;

    fn pair() -> (Store, Store) {
        (
            Store::new(Doc::with_client(1)),
            Store::new(Doc::with_client(2)),
        )
    }

    fn sync(a: &Store, b: &Store) {
        b.doc().apply_update(a.doc().ops_since(&b.doc().state_vector()));
        a.doc().apply_update(b.doc().ops_since(&a.doc().state_vector()));
    }

    #[test]
    fn set_then_get_reads_back() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        map.set("count", 3);
        assert_eq!(map.get("count"), Some(Value::Number(3.0)));
        assert!(map.contains_key("count"));
        assert_eq!(map.keys(), vec!["count".to_string()]);
    }

    #[test]
    fn nested_objects_become_proxies() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        let layer = map.set("layer", Value::object([("name", Value::from("bg"))]));

        let layer = layer.as_proxy().and_then(Proxy::as_map).cloned().unwrap();
        assert_eq!(layer.get("name"), Some(Value::from("bg")));
        assert_eq!(map.to_json(), json!({"layer": {"name": "bg"}}));
    }

    #[test]
    fn remote_changes_patch_the_mirror() {
        let (a, b) = pair();
        let ma = a.map("states-r").unwrap();
        let mb = b.map("states-r").unwrap();

        ma.set("title", "hello");
        ma.set("gone", true);
        sync(&a, &b);
        assert_eq!(mb.get("title"), Some(Value::from("hello")));

        ma.delete("gone");
        sync(&a, &b);
        assert_eq!(mb.get("gone"), None);
        assert_eq!(mb.len(), 1);
    }

    #[test]
    fn assigning_a_proxy_does_not_copy_it() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        let inner = map.set("a", Value::object([("x", Value::from(1))]));
        let ops_before = store.doc().op_count();

        let stored = map.set("b", inner.clone());

        assert_eq!(stored, inner);
        // one map-set, no new container
        assert_eq!(store.doc().op_count(), ops_before + 1);
    }

    #[test]
    fn remote_update_keeps_nested_identity() {
        let (a, b) = pair();
        let ma = a.map("states-r").unwrap();
        ma.set("layer", Value::object([("name", Value::from("bg"))]));
        sync(&a, &b);

        let mb = b.map("states-r").unwrap();
        let before = mb.get("layer").unwrap();
        let layer_a = ma.get("layer").unwrap();
        layer_a
            .as_proxy()
            .and_then(Proxy::as_map)
            .unwrap()
            .set("name", "fg");
        sync(&a, &b);

        let after = mb.get("layer").unwrap();
        assert_eq!(before, after);
        assert_eq!(
            after.as_proxy().and_then(Proxy::as_map).unwrap().get("name"),
            Some(Value::from("fg"))
        );
    }

    #[test]
    fn text_and_box_children() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        let text = map.set_text("note", "hi").unwrap();
        text.push_str("!");
        let flag = map.set_box("flag", true).unwrap();
        assert_eq!(flag.get(), Value::Bool(true));
        assert_eq!(map.to_json(), json!({"flag": true, "note": "hi!"}));
    }

    #[test]
    fn external_local_transactions_reach_the_mirror() {
        let store = Store::new(Doc::with_client(1));
        let map = store.map("states-r").unwrap();
        let id = map.id().clone();
        store
            .doc()
            .transact(|txn| txn.map_set(&id, "_lastSyncTime", Prelim::Scalar(5.0.into())))
            .unwrap();
        assert_eq!(map.get("_lastSyncTime"), Some(Value::Number(5.0)));
    }
}
