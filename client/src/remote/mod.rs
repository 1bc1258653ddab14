//! Remote document store abstraction.
//!
//! The sync manager talks to the backend only through [`RemoteStore`]. One
//! record per user holds the current configuration; devices and an upload
//! history are kept alongside it.

mod memory;

pub use memory::{MemoryRemoteStore, DEFAULT_MAX_HISTORY_ENTRIES};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confsync_engine::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::EncryptionEnvelope;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record of {size} bytes exceeds the store limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Summary of a configuration document, stored unencrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub project_count: usize,
    pub group_count: usize,
    pub active_project: Option<String>,
    pub active_group: Option<String>,
}

impl RecordMetadata {
    /// Extract counts from the `projects` and `groups` collections and the
    /// `activeProject` / `activeGroup` selectors.
    pub fn from_document(doc: &Value) -> Self {
        let count = |key: &str| match doc.get(key) {
            Some(Value::Object(map)) => map.len(),
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };
        let text = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_owned);

        Self {
            project_count: count("projects"),
            group_count: count("groups"),
            active_project: text("activeProject"),
            active_group: text("activeGroup"),
        }
    }
}

/// The stored configuration for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub version: Version,
    pub last_modified: DateTime<Utc>,
    /// Plain JSON, or base64 ciphertext when `encryption` is set
    pub data: String,
    /// Hex SHA-256 of the plaintext JSON
    pub hash: String,
    pub encryption: Option<EncryptionEnvelope>,
    pub metadata: RecordMetadata,
    pub device_id: String,
    /// Plaintext size in bytes
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAck {
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_name: String,
    pub platform: String,
}

/// Per-device counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub uploads: u64,
    pub downloads: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
}

/// Increments applied by [`RemoteStore::update_device_stats`].
pub type DeviceStatsDelta = DeviceStats;

impl DeviceStats {
    pub fn apply(&mut self, delta: &DeviceStatsDelta) {
        self.uploads += delta.uploads;
        self.downloads += delta.downloads;
        self.successful_syncs += delta.successful_syncs;
        self.failed_syncs += delta.failed_syncs;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub platform: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub stats: DeviceStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Upload,
    Merge,
}

/// One entry per stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub version: Version,
    pub device_id: String,
    pub action: HistoryAction,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub size: usize,
}

/// Filter for [`RemoteStore::get_history`]. Results are newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    /// Only entries with a version strictly greater than this
    pub since_version: Option<Version>,
}

/// Backend holding users, their configuration record, devices and history.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_or_create_user(&self, user_id: &str) -> StoreResult<UserProfile>;

    /// The current record, or `None` if nothing was uploaded yet.
    async fn get_user_config(&self, user_id: &str) -> StoreResult<Option<RemoteRecord>>;

    /// Store a new record. `record.version` must be exactly one above the
    /// stored version.
    async fn update_user_config(&self, user_id: &str, record: RemoteRecord)
        -> StoreResult<UpdateAck>;

    /// Register a device, or refresh its name and last-seen time.
    async fn register_device(
        &self,
        user_id: &str,
        device: &DeviceRegistration,
    ) -> StoreResult<DeviceInfo>;

    async fn update_device_stats(
        &self,
        user_id: &str,
        device_id: &str,
        delta: &DeviceStatsDelta,
    ) -> StoreResult<()>;

    async fn add_history_entry(&self, user_id: &str, entry: HistoryEntry) -> StoreResult<()>;

    async fn get_history(&self, user_id: &str, query: &HistoryQuery)
        -> StoreResult<Vec<HistoryEntry>>;

    async fn get_all_devices(&self, user_id: &str) -> StoreResult<Vec<DeviceInfo>>;

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
