//! Error types for the confsync engine.

use crate::state::SyncState;
use thiserror::Error;

/// All possible errors from the confsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // State machine errors
    #[error("cannot start sync while syncing")]
    SyncInProgress,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SyncState, to: SyncState },

    #[error("no sync operation in progress")]
    NoSyncInProgress,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // Document errors
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    // Persistence errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
