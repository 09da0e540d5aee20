//! Replicated container states and their merge rules.
//!
//! - Maps and registers are last-writer-wins by [`OpId`].
//! - Sequences and text are RGAs: an element is inserted right after its
//!   origin, skipping any elements with a higher id. Because ids carry Lamport
//!   counters, everything inserted after a skipped element also has a higher
//!   id, so the skip keeps whole concurrent runs together.

use crate::event::{KeyChange, SeqDelta, TextDelta};
use crate::{ContainerKind, OpId, ReplicaValue, Scalar};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) enum ContainerState {
    Map(MapState),
    Sequence(Rga<ReplicaValue>),
    Text(Rga<char>),
    Register(RegisterState),
}

impl ContainerState {
    pub(crate) fn new(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Map => ContainerState::Map(MapState::default()),
            ContainerKind::Sequence => ContainerState::Sequence(Rga::default()),
            ContainerKind::Text => ContainerState::Text(Rga::default()),
            ContainerKind::Register => ContainerState::Register(RegisterState::default()),
        }
    }

    pub(crate) fn kind(&self) -> ContainerKind {
        match self {
            ContainerState::Map(_) => ContainerKind::Map,
            ContainerState::Sequence(_) => ContainerKind::Sequence,
            ContainerState::Text(_) => ContainerKind::Text,
            ContainerState::Register(_) => ContainerKind::Register,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            ContainerState::Map(map) => map.len() == 0,
            ContainerState::Sequence(seq) => seq.visible_len() == 0,
            ContainerState::Text(text) => text.visible_len() == 0,
            ContainerState::Register(reg) => reg.value.is_null(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MapEntry {
    id: OpId,
    /// `None` is a tombstone left by a delete.
    value: Option<ReplicaValue>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MapState {
    entries: BTreeMap<String, MapEntry>,
}

impl MapState {
    /// Write (or with `None`, delete) a key if `id` beats the current writer.
    pub(crate) fn apply(
        &mut self,
        id: OpId,
        key: &str,
        value: Option<ReplicaValue>,
    ) -> Option<KeyChange> {
        let previous = match self.entries.get(key) {
            Some(entry) if entry.id >= id => return None,
            Some(entry) => entry.value.clone(),
            None => None,
        };

        self.entries.insert(
            key.to_string(),
            MapEntry {
                id,
                value: value.clone(),
            },
        );

        match (previous, value) {
            (None, Some(value)) => Some(KeyChange::Added {
                key: key.to_string(),
                value,
            }),
            (Some(old), Some(value)) if old != value => Some(KeyChange::Updated {
                key: key.to_string(),
                value,
            }),
            (Some(_), None) => Some(KeyChange::Removed {
                key: key.to_string(),
            }),
            _ => None,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&ReplicaValue> {
        self.entries.get(key).and_then(|e| e.value.as_ref())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &ReplicaValue)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value.as_ref().map(|v| (k, v)))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().filter(|e| e.value.is_some()).count()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RgaItem<T> {
    id: OpId,
    value: T,
    deleted: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Rga<T> {
    items: Vec<RgaItem<T>>,
}

impl<T> Default for Rga<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Clone> Rga<T> {
    pub(crate) fn contains(&self, id: &OpId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &OpId) -> Option<usize> {
        self.items.iter().position(|item| item.id == *id)
    }

    fn visible_before(&self, pos: usize) -> usize {
        self.items[..pos].iter().filter(|i| !i.deleted).count()
    }

    /// Integrate an insert. Returns the visible index of the new element, or
    /// `None` if the element already exists or its origin is unknown.
    pub(crate) fn insert(&mut self, id: OpId, after: Option<OpId>, value: T) -> Option<usize> {
        if self.contains(&id) {
            return None;
        }
        let mut pos = match after {
            Some(origin) => self.position(&origin)? + 1,
            None => 0,
        };
        while pos < self.items.len() && self.items[pos].id > id {
            pos += 1;
        }
        let index = self.visible_before(pos);
        self.items.insert(
            pos,
            RgaItem {
                id,
                value,
                deleted: false,
            },
        );
        Some(index)
    }

    /// Tombstone an element. Returns its visible index if it was visible.
    pub(crate) fn delete(&mut self, elem: &OpId) -> Option<usize> {
        let pos = self.position(elem)?;
        if self.items[pos].deleted {
            return None;
        }
        let index = self.visible_before(pos);
        self.items[pos].deleted = true;
        Some(index)
    }

    pub(crate) fn visible(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter(|i| !i.deleted).map(|i| &i.value)
    }

    pub(crate) fn visible_len(&self) -> usize {
        self.items.iter().filter(|i| !i.deleted).count()
    }

    /// Id of the element at a visible index.
    pub(crate) fn id_at(&self, index: usize) -> Option<OpId> {
        self.items
            .iter()
            .filter(|i| !i.deleted)
            .nth(index)
            .map(|i| i.id)
    }
}

impl Rga<ReplicaValue> {
    pub(crate) fn insert_delta(index: usize, value: ReplicaValue) -> SeqDelta {
        SeqDelta::Insert {
            index,
            values: vec![value],
        }
    }
}

impl Rga<char> {
    pub(crate) fn insert_delta(index: usize, ch: char) -> TextDelta {
        TextDelta::Insert {
            index,
            text: ch.to_string(),
        }
    }

    pub(crate) fn text(&self) -> String {
        self.visible().collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RegisterState {
    id: Option<OpId>,
    pub(crate) value: Scalar,
}

impl Default for RegisterState {
    fn default() -> Self {
        Self {
            id: None,
            value: Scalar::Null,
        }
    }
}

impl RegisterState {
    /// Returns the new value if the write won.
    pub(crate) fn apply(&mut self, id: OpId, value: Scalar) -> Option<Scalar> {
        if matches!(self.id, Some(current) if current >= id) {
            return None;
        }
        self.id = Some(id);
        self.value = value.clone();
        Some(value)
    }
}
