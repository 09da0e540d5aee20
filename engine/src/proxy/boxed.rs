use super::{NodeCore, NodeState, Store};
use crate::codec::decode_scalar;
use crate::container::ContainerState;
use crate::{Change, ChangeEvent, ContainerId, Prelim, Scalar, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct BoxNode {
    core: NodeCore,
    mirror: RwLock<Value>,
}

/// Proxy over a register: a single replicated scalar.
#[derive(Clone)]
pub struct BoxProxy(Arc<BoxNode>);

impl BoxProxy {
    pub(super) fn attach(store: Store, id: ContainerId) -> Self {
        let node = Arc::new(BoxNode {
            core: NodeCore::new(store, id.clone()),
            mirror: RwLock::new(Value::Null),
        });
        let weak = Arc::downgrade(&node);
        let subscription = node.core.store.doc().observe(id, move |event| {
            if let Some(node) = weak.upgrade() {
                BoxProxy(node).apply_event(event);
            }
        });
        node.core.attach(subscription);
        BoxProxy(node)
    }

    pub(super) fn from_node(node: Arc<BoxNode>) -> Self {
        BoxProxy(node)
    }

    pub(super) fn downgrade(&self) -> Weak<BoxNode> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn core(&self) -> &NodeCore {
        &self.0.core
    }

    pub(super) fn seed(&self) {
        let core = &self.0.core;
        let mut mirror = self.0.mirror.write();
        let (seq, scalar) = core.read(|container| match container {
            Some(ContainerState::Register(reg)) => Some(reg.value.clone()),
            _ => None,
        });
        *mirror = scalar
            .map(|scalar| decode_scalar(&scalar, core.store.options()))
            .unwrap_or(Value::Null);
        core.seeded_at(seq);
    }

    fn apply_event(&self, event: &ChangeEvent) {
        let Change::Register(scalar) = &event.change else {
            return;
        };
        let core = &self.0.core;
        let _scope = core.applying(event);
        let value = decode_scalar(scalar, core.store.options());
        let mut mirror = self.0.mirror.write();
        if !core.reflects(event) {
            *mirror = value;
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.0.core.id
    }

    pub fn get(&self) -> Value {
        self.0.mirror.read().clone()
    }

    /// Replace the boxed value. Only scalars (including dates and special
    /// numbers) can be boxed; anything else is stored as `null`.
    pub fn set(&self, value: impl Into<Value>) -> Value {
        let value = value.into();
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let scalar = match core.store.encode(&value) {
            Prelim::Scalar(scalar) => scalar,
            other => {
                tracing::warn!(container = %core.id, value = ?other, "box values must be scalars");
                Scalar::Null
            }
        };
        let stored = decode_scalar(&scalar, core.store.options());
        if core.write("box.set", |txn| txn.register_set(&core.id, scalar)).is_none() {
            *self.0.mirror.write() = stored.clone();
        }
        stored
    }
}

impl PartialEq for BoxProxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BoxProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxProxy").field(&self.id().to_string()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Doc;
    use chrono::{TimeZone, Utc};

    #[test]
    fn box_round_trips_dates() {
        let store = Store::new(Doc::with_client(1));
        let cell = store.register("updated-at").unwrap();
        let when = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        cell.set(when);
        assert_eq!(cell.get(), Value::Date(when));
    }

    #[test]
    fn non_scalars_are_boxed_as_null() {
        let store = Store::new(Doc::with_client(1));
        let cell = store.register("cell").unwrap();
        assert_eq!(cell.set(Value::Array(vec![])), Value::Null);
    }

    #[test]
    fn remote_set_updates_mirror() {
        let a = Store::new(Doc::with_client(1));
        let b = Store::new(Doc::with_client(2));
        let ca = a.register("cell").unwrap();
        let cb = b.register("cell").unwrap();
        ca.set("on");
        b.doc().apply_update(a.doc().ops());
        assert_eq!(cb.get(), Value::from("on"));
    }
}
