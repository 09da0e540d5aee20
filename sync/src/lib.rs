//! # Tandem Sync
//!
//! Rooms on top of [`tandem_engine`]: each room is a replicated document
//! kept in sync with peers through a signaling server, with reconnection,
//! an adaptive heartbeat, local persistence and diagnostics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem_sync::{Registry, RoomOptions, SyncedRoom};
//! use tandem_engine::Value;
//!
//! # async fn run() -> tandem_sync::Result<()> {
//! let registry = Registry::new().into_shared();
//! let room = SyncedRoom::create_or_get(
//!     &registry,
//!     "whiteboard",
//!     Value::object([("title", Value::from("Untitled"))]),
//!     RoomOptions::default(),
//! )
//! .await?;
//!
//! room.state().set("title", "Roadmap");
//! println!("{}", room.status().status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pieces
//!
//! - [`Registry`]: per-room documents and the collaborators rooms use
//! - [`SignalingSelector`]: probes and ranks signaling endpoints
//! - [`PeerTransportManager`]: connection state machine and sync handshake
//! - [`AdaptiveSyncScheduler`]: heartbeat with an adaptive period
//! - [`DiagnosticsReporter`]: connection health snapshot
//! - [`Persistence`]: snapshot storage
//! - [`Awareness`]: ephemeral per-client presence
//! - [`RoomEvent`]: what [`SyncedRoom::events`] publishes

pub mod awareness;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod scheduler;
pub mod signaling;
pub mod transport;

pub use awareness::{Awareness, AwarenessChange, PeerPresence};
pub use config::{AutoSyncConfig, PeerDiscoveryConfig, RelayServer, RetryStrategy, RoomOptions};
pub use diagnostics::{ConnectionRating, DiagnosticsReporter, DiagnosticsSnapshot};
pub use error::{Error, Result};
pub use event::RoomEvent;
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use protocol::{Envelope, SyncMessage};
pub use registry::{Registry, RoomReplica};
pub use room::{RoomStatus, SyncedRoom};
pub use scheduler::{
    AdaptiveSyncScheduler, BatteryInfo, ChangeFrequencyTracker, EnvironmentProbe, LinkClass,
    NetworkInfo, StaticEnvironment,
};
pub use signaling::{EndpointProbe, HttpProbe, ProbeResult, SignalingSelector, StaticProbe};
pub use transport::{
    ConnectionState, MemoryNetwork, MemoryTransport, PeerTransport, PeerTransportManager,
    TransportEvent, TransportFactory, WsTransport, WsTransportFactory,
};
