//! Error types for the Tandem engine.

use crate::{ContainerId, ContainerKind};
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Container errors
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("container {id} is a {found}, expected a {expected}")]
    KindMismatch {
        id: ContainerId,
        expected: ContainerKind,
        found: ContainerKind,
    },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid root container name: {0:?}")]
    InvalidRootName(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
