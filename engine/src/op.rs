//! Operation types for expressing changes.
//!
//! Replicas never exchange state directly; they exchange operations. Each
//! operation targets one container and carries the [`OpId`] that decides how
//! it merges with concurrent operations.

use crate::OpId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a replicated container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerId {
    /// Named top-level container. Every replica that accesses the same name
    /// refers to the same container.
    Root(String),
    /// Nested container, identified by the operation that created it.
    Created(OpId),
}

impl ContainerId {
    pub fn root(name: impl Into<String>) -> Self {
        ContainerId::Root(name.into())
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ContainerId::Root(_))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerId::Root(name) => f.write_str(name),
            ContainerId::Created(id) => write!(f, "#{id}"),
        }
    }
}

/// The replicated primitive a container implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Last-writer-wins map of string keys
    Map,
    /// Ordered sequence of values
    Sequence,
    /// Ordered sequence of characters
    Text,
    /// Single last-writer-wins scalar slot (a "box")
    Register,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Map => "map",
            ContainerKind::Sequence => "sequence",
            ContainerKind::Text => "text",
            ContainerKind::Register => "register",
        };
        f.write_str(name)
    }
}

/// A plain value that can be stored inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// JSON form of the scalar. Non-finite numbers have no JSON form and map
    /// to `null`; the codec encodes them as strings before they get here.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

/// A slot value: either a scalar or a reference to another container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicaValue {
    Scalar(Scalar),
    Container(ContainerId),
}

impl ReplicaValue {
    pub fn null() -> Self {
        ReplicaValue::Scalar(Scalar::Null)
    }

    pub fn as_container(&self) -> Option<&ContainerId> {
        match self {
            ReplicaValue::Container(id) => Some(id),
            ReplicaValue::Scalar(_) => None,
        }
    }
}

impl From<Scalar> for ReplicaValue {
    fn from(value: Scalar) -> Self {
        ReplicaValue::Scalar(value)
    }
}

/// What an operation does to its target container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OpAction {
    /// Bring a nested container into existence. The target of a create
    /// operation is always `ContainerId::Created(op.id)`.
    Create { kind: ContainerKind },
    MapSet { key: String, value: ReplicaValue },
    MapDelete { key: String },
    /// Insert after the element `after` (or at the head when `None`).
    SeqInsert {
        after: Option<OpId>,
        value: ReplicaValue,
    },
    SeqDelete { elem: OpId },
    TextInsert { after: Option<OpId>, ch: char },
    TextDelete { elem: OpId },
    RegisterSet { value: Scalar },
}

impl OpAction {
    /// The container kind this action can be applied to.
    pub fn target_kind(&self) -> Option<ContainerKind> {
        match self {
            OpAction::Create { .. } => None,
            OpAction::MapSet { .. } | OpAction::MapDelete { .. } => Some(ContainerKind::Map),
            OpAction::SeqInsert { .. } | OpAction::SeqDelete { .. } => {
                Some(ContainerKind::Sequence)
            }
            OpAction::TextInsert { .. } | OpAction::TextDelete { .. } => Some(ContainerKind::Text),
            OpAction::RegisterSet { .. } => Some(ContainerKind::Register),
        }
    }
}

/// A single replicated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Op {
    /// Causal stamp of this operation
    pub id: OpId,
    /// Container the operation applies to
    pub target: ContainerId,
    /// The mutation itself
    pub action: OpAction,
}

impl Op {
    pub fn new(id: OpId, target: ContainerId, action: OpAction) -> Self {
        Self { id, target, action }
    }
}

/// Where a batch of changes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created on this replica
    Local,
    /// Received from a peer or loaded from persistence
    Remote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_display() {
        assert_eq!(ContainerId::root("states-a").to_string(), "states-a");
        assert_eq!(
            ContainerId::Created(OpId::new(3, 0xff)).to_string(),
            "#3@ff"
        );
    }

    #[test]
    fn scalar_serializes_as_plain_json() {
        assert_eq!(serde_json::to_string(&Scalar::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Scalar::Number(1.5)).unwrap(), "1.5");
        let parsed: Scalar = serde_json::from_str(r#""hi""#).unwrap();
        assert_eq!(parsed, Scalar::from("hi"));
    }

    #[test]
    fn op_serialization_format() {
        let op = Op::new(
            OpId::new(1, 9),
            ContainerId::root("states-r"),
            OpAction::MapSet {
                key: "count".into(),
                value: Scalar::Number(2.0).into(),
            },
        );
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""type":"mapSet""#));
        assert!(json.contains(r#""root":"states-r""#));

        let parsed: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn target_kind_matches_action() {
        let action = OpAction::TextInsert { after: None, ch: 'x' };
        assert_eq!(action.target_kind(), Some(ContainerKind::Text));
        assert_eq!(
            OpAction::Create {
                kind: ContainerKind::Map
            }
            .target_kind(),
            None
        );
    }
}
