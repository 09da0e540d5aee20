//! Change events emitted by a [`Doc`](crate::Doc) after operations integrate.

use crate::{ContainerId, Op, Origin, ReplicaValue, Scalar};

/// How a single map key changed.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    Added { key: String, value: ReplicaValue },
    Updated { key: String, value: ReplicaValue },
    Removed { key: String },
}

impl KeyChange {
    pub fn key(&self) -> &str {
        match self {
            KeyChange::Added { key, .. }
            | KeyChange::Updated { key, .. }
            | KeyChange::Removed { key } => key,
        }
    }
}

/// Positional change of a sequence, expressed in visible indices at the time
/// the change was integrated. Deltas must be applied in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SeqDelta {
    Insert {
        index: usize,
        values: Vec<ReplicaValue>,
    },
    Delete {
        index: usize,
        len: usize,
    },
}

/// Positional change of a text container, in character indices.
#[derive(Debug, Clone, PartialEq)]
pub enum TextDelta {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Map(Vec<KeyChange>),
    Sequence(Vec<SeqDelta>),
    Text(Vec<TextDelta>),
    Register(Scalar),
}

/// A change to one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub container: ContainerId,
    pub origin: Origin,
    pub change: Change,
    /// Commit that produced the change. Increases per document in the order
    /// events are delivered.
    pub seq: u64,
}

/// A batch of operations that integrated together, as seen by update
/// listeners (transports, persistence, change-frequency tracking).
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub origin: Origin,
    pub ops: Vec<Op>,
}
