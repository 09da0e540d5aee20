//! Error types for tandem-sync.

use thiserror::Error;

/// Errors produced by rooms, transports and persistence.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid room key: {0:?}")]
    InvalidRoomKey(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Transient failure; retried with backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport could not be set up at all; not retried.
    #[error("Provider initialization failed: {0}")]
    ProviderInit(String),

    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Engine error: {0}")]
    Engine(#[from] tandem_engine::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }
}

/// Result type alias for tandem-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
