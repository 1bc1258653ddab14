//! # confsync engine
//!
//! Deterministic core of a multi-device configuration sync engine.
//!
//! This crate holds the logic that decides what a synchronized configuration
//! document should look like and when sync work may run. It has no knowledge
//! of networks, files or clocks: every timestamp is passed in by the caller,
//! so the same inputs always produce the same outputs.
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A configuration document is a `serde_json::Value` tree. Locations are
//! addressed with dotted paths (`projects.web.port`); see [`document`].
//!
//! ### Conflict resolution
//!
//! The [`ConflictResolver`] merges a local and a remote document, optionally
//! against a common ancestor, and reports every [`ConflictRecord`]. Scalar
//! conflicts follow a [`ResolutionStrategy`]:
//! - [`ResolutionStrategy::Auto`] - remote wins, deletions are undone (default)
//! - [`ResolutionStrategy::MostRecent`] - newer `lastModified` wins
//! - [`ResolutionStrategy::LocalWins`] / [`ResolutionStrategy::RemoteWins`]
//! - [`ResolutionStrategy::Manual`] - conflicts are left for the user
//!
//! ### Offline tracking
//!
//! The [`OfflineTracker`] records edits made while disconnected, either as
//! whole-document snapshots or per-path changes, and can replay them.
//!
//! ### Sync state machine
//!
//! The [`SyncStateManager`] serializes sync work, queues operations while
//! offline and reports every transition as a [`SyncEvent`].
//!
//! ## Quick Start
//!
//! ```rust
//! use confsync_engine::{ConflictKind, ConflictResolver, ResolutionStrategy};
//! use serde_json::json;
//!
//! let resolver = ConflictResolver::with_strategy(ResolutionStrategy::Auto);
//!
//! let base = json!({"theme": "dark", "projects": {"web": {"port": 80}}});
//! let local = json!({"projects": {"web": {"port": 80}}});
//! let remote = json!({"theme": "dark", "projects": {"web": {"port": 80}, "api": {}}});
//!
//! let result = resolver.resolve(&local, &remote, Some(&base));
//! assert_eq!(result.conflicts[0].kind, ConflictKind::DeletedLocal);
//! assert_eq!(result.resolved, remote);
//! ```

pub mod document;
pub mod error;
pub mod resolver;
pub mod state;
pub mod tracker;

// Re-export main types at crate root
pub use error::Error;
pub use resolver::{
    ArrayMergeStrategy, ConflictKind, ConflictRecord, ConflictResolution, ConflictResolver,
    Resolution, ResolutionStrategy, ResolverConfig,
};
pub use state::{
    CompletionStatus, OperationKind, OperationStatus, StartOutcome, StateConfig,
    StateTransition, StatsSnapshot, SyncCompletion, SyncEvent, SyncObserver, SyncOperation,
    SyncState, SyncStateManager, SyncStats,
};
pub use tracker::{
    ChangeEntry, ChangeKind, OfflineTracker, TrackerConfig, TrackerSnapshot, TrackingMode,
    TRACKER_FORMAT_VERSION,
};

/// Type aliases for clarity
pub type Timestamp = u64;
pub type Version = u64;
pub type ChangeId = String;
pub type OperationId = String;
