//! Snapshot types for persisting and restoring document state.
//!
//! A snapshot is the document's operation log. Loading it into any document
//! replays the operations, so loading is idempotent and merges with whatever
//! the target document already holds.

use crate::{error::Result, ClientId, Doc, Error, Op, StateVector};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Client id of the document the snapshot was taken from
    pub client: ClientId,
    /// State vector at the time of the snapshot
    pub state_vector: StateVector,
    /// Every integrated operation, in integration order
    pub ops: Vec<Op>,
}

impl DocSnapshot {
    /// Capture the current state of a document.
    pub fn capture(doc: &Doc) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            client: doc.client_id(),
            state_vector: doc.state_vector(),
            ops: doc.ops(),
        }
    }

    /// Replay the snapshot into a document. Returns how many operations were
    /// new to it.
    pub fn load_into(&self, doc: &Doc) -> usize {
        doc.apply_update(self.ops.clone()).applied
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Size of the document's encoded snapshot in bytes.
pub fn encoded_size(doc: &Doc) -> usize {
    DocSnapshot::capture(doc)
        .to_json()
        .map(|json| json.len())
        .unwrap_or(0)
}
