//! Cloud sync manager.
//!
//! Drives uploads, downloads and bidirectional syncs of one user's
//! configuration document against a [`RemoteStore`], serialized through a
//! [`SyncStateManager`]. While offline, operations are queued and local edits
//! are recorded in the [`OfflineLog`]; both are replayed on reconnect.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use confsync_engine::{
    document, ChangeEntry, ChangeId, ConflictRecord, ConflictResolver, OperationId, OperationKind,
    StartOutcome, StatsSnapshot, SyncCompletion, SyncEvent, SyncOperation, SyncState,
    SyncStateManager, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{ConfigError, SyncConfig};
use crate::crypto::{EncryptionKey, Encryptor};
use crate::error::{Result, SyncError};
use crate::offline::{OfflineLog, SyncMark};
use crate::remote::{
    DeviceInfo, DeviceRegistration, DeviceStatsDelta, HistoryAction, HistoryEntry, HistoryQuery,
    RecordMetadata, RemoteRecord, RemoteStore,
};

/// Result of a public operation: either it ran, or it was queued offline.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<T> {
    Completed(T),
    Queued(OperationId),
}

impl<T> Dispatch<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Dispatch::Completed(value) => Some(value),
            Dispatch::Queued(_) => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Dispatch::Queued(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub version: Version,
    pub encrypted: bool,
    /// Hex SHA-256 of the uploaded plaintext
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    /// `None` when nothing was uploaded yet
    pub config: Option<Value>,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Skip divergence detection and push or pull unconditionally
    pub force: Option<ForceDirection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Upload,
    Download,
    Merge,
    None,
    ManualResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub action: SyncAction,
    /// Remote version after the sync
    pub version: Version,
    /// Document the caller should now hold
    pub config: Value,
    pub conflicts: Vec<ConflictRecord>,
    pub uploaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub initialized: bool,
    pub user_id: Option<String>,
    pub device_id: String,
    pub encryption_enabled: bool,
    pub last_sync_version: Option<Version>,
    pub pending_changes: usize,
    pub state: SyncState,
    pub stats: StatsSnapshot,
}

/// Outcome of one queued operation replayed after reconnecting.
#[derive(Debug)]
pub struct QueueReplay {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub result: Result<()>,
}

/// Payload of a queued bidirectional sync.
#[derive(Serialize, Deserialize)]
struct QueuedSync {
    local: Value,
    options: SyncOptions,
}

struct Session {
    user_id: String,
    key: Option<EncryptionKey>,
}

#[derive(Debug, Default)]
struct Transfer {
    uploaded: bool,
    downloaded: bool,
    conflicts_resolved: usize,
}

/// Synchronizes one device's configuration with the remote store.
pub struct CloudSyncManager {
    config: SyncConfig,
    store: Arc<dyn RemoteStore>,
    encryptor: Arc<dyn Encryptor>,
    resolver: ConflictResolver,
    state: SyncStateManager,
    offline: OfflineLog,
    session: Option<Session>,
}

impl fmt::Debug for CloudSyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSyncManager")
            .field("device_id", &self.config.device_id)
            .field("user_id", &self.session.as_ref().map(|s| &s.user_id))
            .field("state", &self.state.state())
            .field("last_sync", &self.offline.last_sync())
            .finish_non_exhaustive()
    }
}

impl CloudSyncManager {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RemoteStore>,
        encryptor: Arc<dyn Encryptor>,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(config.resolver),
            state: SyncStateManager::new(config.state),
            offline: OfflineLog::new(config.tracker),
            config,
            store,
            encryptor,
            session: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bind the manager to `user_id`.
    ///
    /// Registers the user and this device, derives the document key when
    /// encryption is enabled, and reloads the persisted offline log.
    pub async fn initialize(&mut self, user_id: &str, passphrase: Option<&str>) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "user_id",
                value: user_id.to_string(),
            }
            .into());
        }

        let key = if self.config.encryption_enabled {
            let passphrase = passphrase
                .filter(|p| !p.is_empty())
                .ok_or(SyncError::MissingPassphrase)?;
            Some(self.encryptor.load_or_create_key(passphrase).await?)
        } else {
            None
        };

        self.store.get_or_create_user(user_id).await?;
        let registration = DeviceRegistration {
            device_id: self.config.device_id.clone(),
            device_name: self.config.device_name.clone(),
            platform: std::env::consts::OS.to_string(),
        };
        self.store.register_device(user_id, &registration).await?;

        let path = self.config.offline_log_path.clone();
        let keep_in_memory = path.is_none() && self.offline.user_id() == Some(user_id);
        if !keep_in_memory {
            self.offline = OfflineLog::load(self.config.tracker, path, user_id).await?;
        }

        tracing::info!(
            user_id,
            device_id = %self.config.device_id,
            key_id = key.as_ref().map(|k| k.key_id()),
            pending = self.offline.tracker().pending_count(),
            "sync manager initialized"
        );

        self.session = Some(Session {
            user_id: user_id.to_string(),
            key,
        });
        Ok(())
    }

    /// Upload `config` as the next version.
    pub async fn upload(&mut self, config: &Value) -> Result<Dispatch<UploadResult>> {
        self.session()?;
        let op = new_operation(OperationKind::Upload, Some(config.clone()));
        self.upload_operation(op).await
    }

    /// Fetch, decrypt and verify the stored configuration.
    pub async fn download(&mut self) -> Result<Dispatch<DownloadResult>> {
        self.session()?;
        let op = new_operation(OperationKind::Download, None);
        self.download_operation(op).await
    }

    /// Reconcile `local` with the stored configuration.
    pub async fn sync(&mut self, local: &Value, options: SyncOptions) -> Result<Dispatch<SyncReport>> {
        self.session()?;
        let data = serde_json::to_value(QueuedSync {
            local: local.clone(),
            options,
        })?;
        let op = new_operation(OperationKind::Bidirectional, Some(data));
        self.sync_operation(op, local, options).await
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            initialized: self.session.is_some(),
            user_id: self.session.as_ref().map(|s| s.user_id.clone()),
            device_id: self.config.device_id.clone(),
            encryption_enabled: self.config.encryption_enabled,
            last_sync_version: self.offline.last_sync().map(|m| m.version),
            pending_changes: self.offline.tracker().pending_count(),
            state: self.state.state(),
            stats: self.state.stats(),
        }
    }

    pub async fn history(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let user_id = &self.session()?.user_id;
        Ok(self.store.get_history(user_id, &query).await?)
    }

    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let user_id = &self.session()?.user_id;
        Ok(self.store.get_all_devices(user_id).await?)
    }

    /// Update connectivity. Coming back online replays queued operations in
    /// the order they were issued.
    pub async fn set_online_status(&mut self, online: bool) -> Vec<QueueReplay> {
        tracing::info!(online, queued = self.state.queue_len(), "connectivity changed");
        let drained = self.state.set_online_status(online, now_ms());
        self.replay(drained).await
    }

    /// Replay queued operations now. A no-op while offline or syncing.
    pub async fn process_queue(&mut self) -> Vec<QueueReplay> {
        let drained = self.state.process_queue();
        self.replay(drained).await
    }

    /// Record a local edit in the offline log.
    pub async fn track_local_change(&mut self, config: &Value) -> Result<Vec<ChangeId>> {
        self.session()?;
        self.record_local_change(config).await
    }

    pub fn pending_changes(&self) -> Vec<ChangeEntry> {
        self.offline.tracker().pending_changes().cloned().collect()
    }

    /// Receive every subsequent state machine event.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribe(move |event: &SyncEvent| {
            // Receiver may be gone; events are best-effort.
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Persist the offline log, close the store and forget the session key.
    pub async fn close(&mut self) -> Result<()> {
        self.offline.save().await?;
        self.store.close().await?;
        if let Some(session) = self.session.take() {
            tracing::info!(user_id = %session.user_id, "sync manager closed");
        }
        Ok(())
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(SyncError::NotInitialized)
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.session()?.user_id.clone())
    }

    async fn upload_operation(&mut self, op: SyncOperation) -> Result<Dispatch<UploadResult>> {
        let config = op.data.clone().unwrap_or_default();
        if let Some(id) = self.begin(op, Some(&config)).await? {
            return Ok(Dispatch::Queued(id));
        }
        let outcome = self.run_upload(&config).await;
        self.finish(outcome).await.map(Dispatch::Completed)
    }

    async fn download_operation(&mut self, op: SyncOperation) -> Result<Dispatch<DownloadResult>> {
        if let Some(id) = self.begin(op, None).await? {
            return Ok(Dispatch::Queued(id));
        }
        let outcome = self.run_download().await;
        self.finish(outcome).await.map(Dispatch::Completed)
    }

    async fn sync_operation(
        &mut self,
        op: SyncOperation,
        local: &Value,
        options: SyncOptions,
    ) -> Result<Dispatch<SyncReport>> {
        if let Some(id) = self.begin(op, Some(local)).await? {
            return Ok(Dispatch::Queued(id));
        }
        let outcome = self.run_sync(local, options).await;
        self.finish(outcome).await.map(Dispatch::Completed)
    }

    /// Start `op`, or queue it. Returns the operation id when queued.
    async fn begin(&mut self, op: SyncOperation, local: Option<&Value>) -> Result<Option<OperationId>> {
        let id = op.id.clone();
        let kind = op.kind;

        match self.state.start_sync(op, now_ms())? {
            StartOutcome::Started => {
                tracing::debug!(operation_id = %id, ?kind, "sync started");
                Ok(None)
            }
            StartOutcome::Queued { position } => {
                match position {
                    Some(position) => {
                        tracing::info!(operation_id = %id, ?kind, position, "offline, operation queued")
                    }
                    None => tracing::warn!(
                        operation_id = %id,
                        ?kind,
                        max_queue_size = self.config.state.max_queue_size,
                        "offline queue full, operation dropped"
                    ),
                }
                if let Some(doc) = local {
                    self.record_local_change(doc).await?;
                }
                Ok(Some(id))
            }
        }
    }

    /// Close out the in-flight operation and update device counters.
    async fn finish<T>(&mut self, outcome: Result<(T, Transfer)>) -> Result<T> {
        let now = now_ms();
        match outcome {
            Ok((value, transfer)) => {
                self.state.complete_sync(
                    SyncCompletion::success_with_conflicts(transfer.conflicts_resolved),
                    now,
                )?;
                self.record_attempt(DeviceStatsDelta {
                    uploads: u64::from(transfer.uploaded),
                    downloads: u64::from(transfer.downloaded),
                    successful_syncs: 1,
                    failed_syncs: 0,
                })
                .await;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "sync operation failed");
                self.state.transition_to_error(err.to_string(), now);
                self.record_attempt(DeviceStatsDelta {
                    failed_syncs: 1,
                    ..Default::default()
                })
                .await;
                Err(err)
            }
        }
    }

    async fn record_attempt(&self, delta: DeviceStatsDelta) {
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = self
            .store
            .update_device_stats(&session.user_id, &self.config.device_id, &delta)
            .await
        {
            tracing::warn!(error = %e, "failed to update device stats");
        }
    }

    async fn run_upload(&mut self, config: &Value) -> Result<(UploadResult, Transfer)> {
        self.state.transition_to_uploading(now_ms())?;
        let user_id = self.user_id()?;
        let previous = self
            .store
            .get_user_config(&user_id)
            .await?
            .map_or(0, |r| r.version);

        let result = self.write(&user_id, config, previous, HistoryAction::Upload).await?;
        Ok((
            result,
            Transfer {
                uploaded: true,
                ..Default::default()
            },
        ))
    }

    async fn run_download(&mut self) -> Result<(DownloadResult, Transfer)> {
        self.state.transition_to_downloading(now_ms())?;
        let user_id = self.user_id()?;

        let Some(record) = self.store.get_user_config(&user_id).await? else {
            tracing::debug!(user_id = %user_id, "nothing to download");
            return Ok((
                DownloadResult {
                    config: None,
                    version: 0,
                },
                Transfer::default(),
            ));
        };

        let config = self.open(&record)?;
        self.mark_downloaded(record.version, &record.hash, &config).await?;
        tracing::info!(user_id = %user_id, version = record.version, "configuration downloaded");

        Ok((
            DownloadResult {
                config: Some(config),
                version: record.version,
            },
            Transfer {
                downloaded: true,
                ..Default::default()
            },
        ))
    }

    async fn run_sync(&mut self, local: &Value, options: SyncOptions) -> Result<(SyncReport, Transfer)> {
        let user_id = self.user_id()?;

        let Some(remote) = self.store.get_user_config(&user_id).await? else {
            return self.push(&user_id, local, 0).await;
        };

        let local_hash = self.encryptor.hash(serde_json::to_string(local)?.as_bytes());
        if local_hash == remote.hash {
            self.mark_synced(remote.version, &remote.hash, local).await?;
            let report = SyncReport {
                action: SyncAction::None,
                version: remote.version,
                config: local.clone(),
                conflicts: Vec::new(),
                uploaded: false,
            };
            return Ok((report, Transfer::default()));
        }

        match options.force {
            Some(ForceDirection::Upload) => return self.push(&user_id, local, remote.version).await,
            Some(ForceDirection::Download) => {
                let remote_doc = self.open(&remote)?;
                return self.pull(&remote, remote_doc).await;
            }
            None => {}
        }

        let mark = self.offline.last_sync();
        let local_changed = mark.map(|m| m.hash != local_hash);
        let remote_changed = mark.map(|m| m.version != remote.version);

        match (local_changed, remote_changed) {
            (Some(true), Some(true)) => self.merge(&user_id, local, &remote).await,
            (Some(true), Some(false)) => self.push(&user_id, local, remote.version).await,
            (Some(false), Some(true)) => {
                let remote_doc = self.open(&remote)?;
                self.pull(&remote, remote_doc).await
            }
            _ => {
                let remote_doc = self.open(&remote)?;
                let local_ts = document::last_modified(local).unwrap_or(0);
                let remote_ts = document::last_modified(&remote_doc).unwrap_or(0);
                tracing::debug!(local_ts, remote_ts, "no sync baseline, newest document wins");

                if local_ts > remote_ts {
                    self.push(&user_id, local, remote.version).await
                } else {
                    self.pull(&remote, remote_doc).await
                }
            }
        }
    }

    async fn push(&mut self, user_id: &str, local: &Value, previous: Version) -> Result<(SyncReport, Transfer)> {
        self.state.transition_to_uploading(now_ms())?;
        let upload = self.write(user_id, local, previous, HistoryAction::Upload).await?;
        let report = SyncReport {
            action: SyncAction::Upload,
            version: upload.version,
            config: local.clone(),
            conflicts: Vec::new(),
            uploaded: true,
        };
        Ok((
            report,
            Transfer {
                uploaded: true,
                ..Default::default()
            },
        ))
    }

    async fn pull(&mut self, remote: &RemoteRecord, remote_doc: Value) -> Result<(SyncReport, Transfer)> {
        self.state.transition_to_downloading(now_ms())?;
        self.mark_downloaded(remote.version, &remote.hash, &remote_doc).await?;
        let report = SyncReport {
            action: SyncAction::Download,
            version: remote.version,
            config: remote_doc,
            conflicts: Vec::new(),
            uploaded: false,
        };
        Ok((
            report,
            Transfer {
                downloaded: true,
                ..Default::default()
            },
        ))
    }

    /// Both sides moved since the last sync: three-way merge against the
    /// last synced document.
    async fn merge(&mut self, user_id: &str, local: &Value, remote: &RemoteRecord) -> Result<(SyncReport, Transfer)> {
        self.state.transition_to_resolving_conflicts(now_ms())?;
        let remote_doc = self.open(remote)?;
        let resolution = self
            .resolver
            .resolve(local, &remote_doc, self.offline.tracker().baseline());

        tracing::info!(
            user_id,
            remote_version = remote.version,
            conflicts = resolution.conflicts.len(),
            manual = resolution.manual_required,
            "merging diverged configurations"
        );

        if resolution.needs_manual_resolution() {
            let report = SyncReport {
                action: SyncAction::ManualResolution,
                version: remote.version,
                config: resolution.resolved,
                conflicts: resolution.conflicts,
                uploaded: false,
            };
            return Ok((report, Transfer::default()));
        }

        let conflicts_resolved = resolution.auto_resolved;
        if resolution.resolved == remote_doc {
            self.mark_synced(remote.version, &remote.hash, &remote_doc).await?;
            let report = SyncReport {
                action: SyncAction::Merge,
                version: remote.version,
                config: resolution.resolved,
                conflicts: resolution.conflicts,
                uploaded: false,
            };
            return Ok((
                report,
                Transfer {
                    downloaded: true,
                    conflicts_resolved,
                    ..Default::default()
                },
            ));
        }

        let upload = self
            .write(user_id, &resolution.resolved, remote.version, HistoryAction::Merge)
            .await?;
        let report = SyncReport {
            action: SyncAction::Merge,
            version: upload.version,
            config: resolution.resolved,
            conflicts: resolution.conflicts,
            uploaded: true,
        };
        Ok((
            report,
            Transfer {
                uploaded: true,
                downloaded: true,
                conflicts_resolved,
            },
        ))
    }

    /// Store `config` as `previous + 1` and append a history entry.
    async fn write(
        &mut self,
        user_id: &str,
        config: &Value,
        previous: Version,
        action: HistoryAction,
    ) -> Result<UploadResult> {
        let record = self.seal(config, previous + 1)?;
        let hash = record.hash.clone();
        let size = record.size;
        let encrypted = record.encryption.is_some();

        let ack = self.store.update_user_config(user_id, record).await?;
        self.store
            .add_history_entry(
                user_id,
                HistoryEntry {
                    version: ack.version,
                    device_id: self.config.device_id.clone(),
                    action,
                    timestamp: Utc::now(),
                    hash: hash.clone(),
                    size,
                },
            )
            .await?;

        tracing::info!(user_id, version = ack.version, encrypted, size, ?action, "configuration uploaded");
        self.mark_synced(ack.version, &hash, config).await?;

        Ok(UploadResult {
            version: ack.version,
            encrypted,
            hash,
        })
    }

    fn seal(&self, config: &Value, version: Version) -> Result<RemoteRecord> {
        let plaintext = serde_json::to_string(config)?;
        let size = plaintext.len();
        if size > self.config.max_config_size {
            return Err(SyncError::SizeLimit {
                size,
                max: self.config.max_config_size,
            });
        }

        let hash = self.encryptor.hash(plaintext.as_bytes());
        let (data, encryption) = match &self.session()?.key {
            Some(key) => {
                let sealed = self.encryptor.encrypt(key, plaintext.as_bytes())?;
                (sealed.ciphertext, Some(sealed.envelope))
            }
            None => (plaintext, None),
        };

        Ok(RemoteRecord {
            version,
            last_modified: Utc::now(),
            data,
            hash,
            encryption,
            metadata: RecordMetadata::from_document(config),
            device_id: self.config.device_id.clone(),
            size,
        })
    }

    fn open(&self, record: &RemoteRecord) -> Result<Value> {
        let plaintext = match &record.encryption {
            Some(envelope) => {
                let key = self
                    .session()?
                    .key
                    .as_ref()
                    .ok_or(SyncError::MissingPassphrase)?;
                self.encryptor.decrypt(key, envelope, &record.data)?
            }
            None => record.data.as_bytes().to_vec(),
        };

        let actual = self.encryptor.hash(&plaintext);
        if actual != record.hash {
            return Err(SyncError::Integrity {
                version: record.version,
                expected: record.hash.clone(),
                actual,
            });
        }
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// `config` now matches the remote copy: every pending edit is in it.
    /// Records the exchanged version and makes `config` the new baseline.
    async fn mark_synced(&mut self, version: Version, hash: &str, config: &Value) -> Result<()> {
        self.offline.set_last_sync(SyncMark {
            version,
            hash: hash.to_string(),
        });

        let tracker = self.offline.tracker_mut();
        tracker.mark_all_synced();
        tracker.clear_synced();
        tracker.set_baseline(config.clone());
        self.offline.save().await
    }

    /// `config` was fetched from the remote copy. Pending local edits are not
    /// part of it, so they stay queued for the next upload or sync.
    async fn mark_downloaded(&mut self, version: Version, hash: &str, config: &Value) -> Result<()> {
        self.offline.set_last_sync(SyncMark {
            version,
            hash: hash.to_string(),
        });
        self.offline.tracker_mut().advance_baseline(config.clone());
        self.offline.save().await
    }

    async fn record_local_change(&mut self, config: &Value) -> Result<Vec<ChangeId>> {
        let ids = self.offline.tracker_mut().track_change(config, now_ms());
        if !ids.is_empty() {
            tracing::debug!(changes = ids.len(), "tracked local change");
            self.offline.save().await?;
        }
        Ok(ids)
    }

    async fn replay(&mut self, ops: Vec<SyncOperation>) -> Vec<QueueReplay> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let operation_id = op.id.clone();
            let kind = op.kind;
            let result = self.replay_one(op).await;
            if let Err(e) = &result {
                tracing::warn!(operation_id = %operation_id, ?kind, error = %e, "queued operation failed");
            }
            results.push(QueueReplay {
                operation_id,
                kind,
                result,
            });
        }
        results
    }

    async fn replay_one(&mut self, op: SyncOperation) -> Result<()> {
        match op.kind {
            OperationKind::Upload => self.upload_operation(op).await.map(drop),
            OperationKind::Download => self.download_operation(op).await.map(drop),
            OperationKind::Bidirectional => {
                let queued: QueuedSync = serde_json::from_value(op.data.clone().unwrap_or_default())?;
                self.sync_operation(op, &queued.local, queued.options)
                    .await
                    .map(drop)
            }
        }
    }
}

fn new_operation(kind: OperationKind, data: Option<Value>) -> SyncOperation {
    SyncOperation::new(uuid::Uuid::new_v4().to_string(), kind, data, now_ms())
}

fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KdfParams, PassphraseEncryptor};
    use crate::remote::MemoryRemoteStore;
    use serde_json::json;

    fn manager(store: Arc<MemoryRemoteStore>) -> CloudSyncManager {
        let config = SyncConfig {
            encryption_enabled: false,
            ..SyncConfig::default()
        };
        CloudSyncManager::new(config, store, Arc::new(PassphraseEncryptor::new("unused")))
    }

    #[tokio::test]
    async fn operations_require_initialize() {
        let mut mgr = manager(Arc::new(MemoryRemoteStore::new()));

        assert!(matches!(
            mgr.upload(&json!({})).await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(mgr.download().await, Err(SyncError::NotInitialized)));
        assert!(matches!(
            mgr.sync(&json!({}), SyncOptions::default()).await,
            Err(SyncError::NotInitialized)
        ));
        assert!(mgr.history(HistoryQuery::default()).await.is_err());
        assert!(!mgr.status().initialized);
        assert_eq!(mgr.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn encryption_requires_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let encryptor = PassphraseEncryptor::new(dir.path()).with_kdf_params(KdfParams::fast());
        let mut mgr = CloudSyncManager::new(
            SyncConfig::default(),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(encryptor),
        );

        assert!(matches!(
            mgr.initialize("user", None).await,
            Err(SyncError::MissingPassphrase)
        ));
        assert!(matches!(
            mgr.initialize("user", Some("")).await,
            Err(SyncError::MissingPassphrase)
        ));
        assert!(matches!(
            mgr.initialize(" ", Some("pw")).await,
            Err(SyncError::Config(_))
        ));
        mgr.initialize("user", Some("pw")).await.unwrap();
        assert!(mgr.status().initialized);
    }

    #[tokio::test]
    async fn identical_documents_sync_to_none() {
        let store = Arc::new(MemoryRemoteStore::new());
        let mut mgr = manager(store);
        mgr.initialize("user", None).await.unwrap();

        let doc = json!({"theme": "dark"});
        mgr.upload(&doc).await.unwrap();
        let report = mgr
            .sync(&doc, SyncOptions::default())
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.action, SyncAction::None);
        assert_eq!(report.version, 1);
        assert!(!report.uploaded);
    }

    #[tokio::test]
    async fn first_sync_uploads() {
        let mut mgr = manager(Arc::new(MemoryRemoteStore::new()));
        mgr.initialize("user", None).await.unwrap();

        let report = mgr
            .sync(&json!({"a": 1}), SyncOptions::default())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.action, SyncAction::Upload);
        assert_eq!(report.version, 1);
        assert_eq!(mgr.status().last_sync_version, Some(1));
    }

    #[tokio::test]
    async fn reinitialize_keeps_in_memory_mark_for_same_user() {
        let mut mgr = manager(Arc::new(MemoryRemoteStore::new()));
        mgr.initialize("user", None).await.unwrap();
        mgr.upload(&json!({"a": 1})).await.unwrap();
        mgr.close().await.unwrap();

        mgr.initialize("user", None).await.unwrap();
        assert_eq!(mgr.status().last_sync_version, Some(1));

        mgr.initialize("someone-else", None).await.unwrap();
        assert_eq!(mgr.status().last_sync_version, None);
    }

    #[tokio::test]
    async fn forced_upload_overrides_newer_remote() {
        let store = Arc::new(MemoryRemoteStore::new());
        let mut other = manager(store.clone());
        other.initialize("user", None).await.unwrap();
        other.upload(&json!({"a": 2, "lastModified": 2000})).await.unwrap();

        let mut mgr = manager(store);
        mgr.initialize("user", None).await.unwrap();
        let options = SyncOptions {
            force: Some(ForceDirection::Upload),
        };
        let report = mgr
            .sync(&json!({"a": 1, "lastModified": 1000}), options)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.action, SyncAction::Upload);
        assert_eq!(report.version, 2);
    }

    #[tokio::test]
    async fn subscribers_see_state_changes() {
        let mut mgr = manager(Arc::new(MemoryRemoteStore::new()));
        let mut events = mgr.subscribe();
        mgr.initialize("user", None).await.unwrap();
        mgr.upload(&json!({"a": 1})).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StateChanged(t) = event {
                states.push(t.to);
            }
        }
        assert_eq!(
            states,
            vec![SyncState::Syncing, SyncState::Uploading, SyncState::Idle]
        );
    }

    #[test]
    fn dispatch_helpers() {
        let queued: Dispatch<u64> = Dispatch::Queued("op".into());
        assert!(queued.is_queued());
        assert_eq!(queued.completed(), None);
        assert_eq!(Dispatch::Completed(3u64).completed(), Some(3));
    }
}
