//! # confsync client
//!
//! Async sync manager that keeps one user's configuration document in step
//! across devices. Conflict resolution, offline tracking and the sync state
//! machine live in [`confsync_engine`]; this crate adds the remote store,
//! encryption, persistence and logging around them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use confsync_client::{CloudSyncManager, MemoryRemoteStore, PassphraseEncryptor, SyncConfig, SyncOptions};
//! use serde_json::json;
//!
//! # async fn run() -> confsync_client::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let store = Arc::new(MemoryRemoteStore::new());
//! let encryptor = Arc::new(PassphraseEncryptor::new("/var/lib/confsync/keys"));
//!
//! let mut manager = CloudSyncManager::new(config, store, encryptor);
//! manager.initialize("user-1", Some("passphrase")).await?;
//! manager.sync(&json!({"theme": "dark"}), SyncOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod offline;
pub mod remote;

pub use config::{ConfigError, SyncConfig};
pub use crypto::{
    CryptoError, EncryptionEnvelope, EncryptionKey, Encryptor, KdfParams, PassphraseEncryptor,
    Sealed,
};
pub use error::{Result, SyncError};
pub use manager::{
    CloudSyncManager, Dispatch, DownloadResult, ForceDirection, QueueReplay, SyncAction,
    SyncOptions, SyncReport, SyncStatus, UploadResult,
};
pub use offline::{OfflineLog, SyncMark, LOG_FORMAT_VERSION};
pub use remote::{
    DeviceInfo, DeviceRegistration, DeviceStats, DeviceStatsDelta, HistoryAction, HistoryEntry,
    HistoryQuery, MemoryRemoteStore, RecordMetadata, RemoteRecord, RemoteStore, StoreError,
    UpdateAck, UserProfile,
};
