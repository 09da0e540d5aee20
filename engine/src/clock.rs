//! Lamport clock and operation identifiers.
//!
//! Every mutation of a replicated container is stamped with an [`OpId`]. The
//! ids form a total order across all replicas, which is what makes concurrent
//! writes merge deterministically.

use crate::ClientId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a single operation.
///
/// Ordering rules:
/// 1. Higher counter wins
/// 2. If counters are equal, the higher client id wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpId {
    /// Lamport counter at the time the operation was created
    pub counter: u64,
    /// Replica that created the operation
    pub client: ClientId,
}

impl OpId {
    pub fn new(counter: u64, client: ClientId) -> Self {
        Self { counter, client }
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.client.cmp(&other.client),
            other => other,
        }
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.counter, self.client)
    }
}

/// A Lamport clock owned by one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LamportClock {
    /// Replica owning this clock
    pub client: ClientId,
    /// Highest counter issued or observed
    pub counter: u64,
}

impl LamportClock {
    /// Create a new clock for a replica, starting at counter 0.
    pub fn new(client: ClientId) -> Self {
        Self { client, counter: 0 }
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(client: ClientId, counter: u64) -> Self {
        Self { client, counter }
    }

    /// Advance the clock and return the id for a new local operation.
    pub fn tick(&mut self) -> OpId {
        self.counter += 1;
        OpId::new(self.counter, self.client)
    }

    /// Fold in an id received from another replica so that subsequent local
    /// operations are ordered after it.
    pub fn observe(&mut self, id: &OpId) {
        self.counter = self.counter.max(id.counter);
    }
}
