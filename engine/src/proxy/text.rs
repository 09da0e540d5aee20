use super::{NodeCore, NodeState, Store};
use crate::container::ContainerState;
use crate::event::TextDelta;
use crate::{Change, ChangeEvent, ContainerId};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct TextNode {
    core: NodeCore,
    mirror: RwLock<String>,
}

/// Proxy over a replicated text container. Indices count characters.
#[derive(Clone)]
pub struct TextProxy(Arc<TextNode>);

/// Byte offset of the character at `index`, or the end of the string.
fn byte_offset(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(i, _)| i)
}

fn insert_at(s: &mut String, index: usize, text: &str) {
    let at = byte_offset(s, index);
    s.insert_str(at, text);
}

fn delete_at(s: &mut String, index: usize, len: usize) {
    let start = byte_offset(s, index);
    let end = byte_offset(s, index.saturating_add(len));
    s.replace_range(start..end, "");
}

impl TextProxy {
    pub(super) fn attach(store: Store, id: ContainerId) -> Self {
        let node = Arc::new(TextNode {
            core: NodeCore::new(store, id.clone()),
            mirror: RwLock::new(String::new()),
        });
        let weak = Arc::downgrade(&node);
        let subscription = node.core.store.doc().observe(id, move |event| {
            if let Some(node) = weak.upgrade() {
                TextProxy(node).apply_event(event);
            }
        });
        node.core.attach(subscription);
        TextProxy(node)
    }

    pub(super) fn from_node(node: Arc<TextNode>) -> Self {
        TextProxy(node)
    }

    pub(super) fn downgrade(&self) -> Weak<TextNode> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn core(&self) -> &NodeCore {
        &self.0.core
    }

    pub(super) fn seed(&self) {
        let core = &self.0.core;
        let mut mirror = self.0.mirror.write();
        let (seq, text) = core.read(|container| match container {
            Some(ContainerState::Text(text)) => text.text(),
            _ => String::new(),
        });
        *mirror = text;
        core.seeded_at(seq);
    }

    fn apply_event(&self, event: &ChangeEvent) {
        let Change::Text(deltas) = &event.change else {
            return;
        };
        let core = &self.0.core;
        let _scope = core.applying(event);
        let mut mirror = self.0.mirror.write();
        if core.reflects(event) {
            return;
        }
        for delta in deltas {
            match delta {
                TextDelta::Insert { index, text } => insert_at(&mut mirror, *index, text),
                TextDelta::Delete { index, len } => delete_at(&mut mirror, *index, *len),
            }
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.0.core.id
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.mirror.read().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.mirror.read().is_empty()
    }

    pub fn insert(&self, index: usize, content: &str) {
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let written = core.write("text.insert", |txn| {
            let index = index.min(txn.text_len(&core.id)?);
            txn.text_insert(&core.id, index, content)
        });
        if written.is_none() {
            insert_at(&mut self.0.mirror.write(), index, content);
        }
    }

    pub fn delete(&self, index: usize, len: usize) {
        let core = &self.0.core;
        let _writing = core.writing.lock();
        let _scope = core.enter(NodeState::LocalWrite);

        let written = core.write("text.delete", |txn| {
            let total = txn.text_len(&core.id)?;
            let index = index.min(total);
            let len = len.min(total - index);
            if len == 0 {
                return Ok(());
            }
            txn.text_delete(&core.id, index, len)
        });
        if written.is_none() {
            delete_at(&mut self.0.mirror.write(), index, len);
        }
    }

    pub fn push_str(&self, content: &str) {
        self.insert(self.len(), content);
    }
}

impl fmt::Display for TextProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.mirror.read())
    }
}

impl PartialEq for TextProxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TextProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextProxy").field(&self.id().to_string()).finish()
    }
}
