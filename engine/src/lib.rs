//! # Tandem Engine
//!
//! A replicated reactive state engine for collaborative applications.
//!
//! This crate lets independent replicas share mutable structured state. Each
//! replica edits its own copy through ordinary-looking map and array
//! operations; replicas exchange operations and converge to the same state
//! without coordination.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about sockets, files or timers
//! - **Convergent**: replicas that integrated the same operations hold the
//!   same state, regardless of delivery order or duplication
//! - **Local-first**: local writes apply immediately and are readable at once
//!
//! ## Core Concepts
//!
//! ### Documents and containers
//!
//! A [`Doc`] holds named top-level containers and any containers nested in
//! them. Four container kinds exist (see [`ContainerKind`]):
//! - maps and registers merge by last writer, ordered by [`OpId`]
//! - sequences and text merge positionally (RGA)
//!
//! ### Operations
//!
//! Every change is an [`Op`] stamped with an [`OpId`] from the replica's
//! [`LamportClock`]. [`Doc::ops_since`] and [`Doc::apply_update`] are all a
//! transport needs to keep two replicas in sync.
//!
//! ### Proxies
//!
//! A [`Store`] wraps a document in reactive proxies ([`MapProxy`],
//! [`ArrayProxy`], [`TextProxy`], [`BoxProxy`]) that read from a local
//! mirror and stay current as remote operations arrive. Native values are
//! converted by the [`codec`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_engine::{Doc, Store};
//! use serde_json::json;
//!
//! let alice = Store::new(Doc::with_client(1));
//! let bob = Store::new(Doc::with_client(2));
//!
//! alice.map("states-demo").unwrap().set("count", 1);
//! bob.map("states-demo").unwrap().set("count", 2);
//!
//! // exchange whatever each side is missing
//! bob.doc().apply_update(alice.doc().ops_since(&bob.doc().state_vector()));
//! alice.doc().apply_update(bob.doc().ops_since(&alice.doc().state_vector()));
//!
//! assert_eq!(alice.doc().to_json(), bob.doc().to_json());
//! assert_eq!(alice.doc().to_json(), json!({"states-demo": {"count": 2.0}}));
//! ```
//!
//! ## Persistence
//!
//! Use [`DocSnapshot::capture`] and [`DocSnapshot::load_into`] to persist a
//! document. Snapshots serialize to JSON.

pub mod clock;
pub mod codec;
mod container;
pub mod doc;
pub mod error;
pub mod event;
pub mod op;
pub mod proxy;
pub mod snapshot;

// Re-export main types at crate root
pub use clock::{LamportClock, OpId};
pub use codec::{CodecOptions, SharedValue, Value};
pub use doc::{ApplyStats, Doc, Prelim, StateVector, Subscription, Transaction};
pub use error::{Error, Result};
pub use event::{Change, ChangeEvent, KeyChange, SeqDelta, TextDelta, UpdateEvent};
pub use op::{ContainerId, ContainerKind, Op, OpAction, Origin, ReplicaValue, Scalar};
pub use proxy::{ArrayProxy, BoxProxy, MapProxy, NodeState, Proxy, Store, TextProxy};
pub use snapshot::{encoded_size, DocSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Identifier of a replica.
pub type ClientId = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
