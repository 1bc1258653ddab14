//! Persisted offline change log.
//!
//! Besides the tracker, the log remembers which user it belongs to and the
//! remote version and hash of the last successful exchange, so divergence
//! detection survives a restart.

use std::path::{Path, PathBuf};

use confsync_engine::{OfflineTracker, TrackerConfig, TrackerSnapshot, Version};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Version of the on-disk log format.
pub const LOG_FORMAT_VERSION: u32 = 1;

/// Remote state as of the last successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMark {
    pub version: Version,
    /// Plaintext hash of the exchanged document
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogFile {
    format_version: u32,
    user_id: Option<String>,
    last_sync: Option<SyncMark>,
    tracker: TrackerSnapshot,
}

/// An [`OfflineTracker`] optionally mirrored to a JSON file.
#[derive(Debug, Clone)]
pub struct OfflineLog {
    tracker: OfflineTracker,
    user_id: Option<String>,
    last_sync: Option<SyncMark>,
    path: Option<PathBuf>,
}

impl OfflineLog {
    /// In-memory log.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracker: OfflineTracker::new(config),
            user_id: None,
            last_sync: None,
            path: None,
        }
    }

    /// Load `user_id`'s log from `path`.
    ///
    /// Starts empty when the file does not exist or belongs to another user.
    /// A stored tracker configuration that differs from `config` is replaced
    /// by it.
    pub async fn load(config: TrackerConfig, path: Option<PathBuf>, user_id: &str) -> Result<Self> {
        let mut log = Self::new(config);
        log.user_id = Some(user_id.to_string());
        let Some(path) = path else {
            return Ok(log);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let file: LogFile = serde_json::from_str(&json)?;
                if file.format_version > LOG_FORMAT_VERSION {
                    return Err(confsync_engine::Error::InvalidSnapshot(format!(
                        "offline log format version {} is newer than supported version {}",
                        file.format_version, LOG_FORMAT_VERSION
                    ))
                    .into());
                }

                if file.user_id.as_deref() == Some(user_id) {
                    let mut tracker = OfflineTracker::import_state(file.tracker)?;
                    if *tracker.config() != config {
                        let evicted = tracker.reconfigure(config);
                        tracing::warn!(
                            path = %path.display(),
                            ?config,
                            evicted,
                            "offline log was written with a different tracker config"
                        );
                    }
                    tracing::debug!(
                        path = %path.display(),
                        pending = tracker.pending_count(),
                        last_sync_version = file.last_sync.as_ref().map(|m| m.version),
                        "loaded offline log"
                    );
                    log.tracker = tracker;
                    log.last_sync = file.last_sync;
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        stored_user = ?file.user_id,
                        user_id,
                        "offline log belongs to another user, starting fresh"
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        log.path = Some(path);
        Ok(log)
    }

    /// Write the log to disk. A no-op for in-memory logs.
    ///
    /// The file is replaced atomically.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = LogFile {
            format_version: LOG_FORMAT_VERSION,
            user_id: self.user_id.clone(),
            last_sync: self.last_sync.clone(),
            tracker: self.tracker.export_state(),
        };
        let json = serde_json::to_string(&file)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn last_sync(&self) -> Option<&SyncMark> {
        self.last_sync.as_ref()
    }

    pub fn set_last_sync(&mut self, mark: SyncMark) {
        self.last_sync = Some(mark);
    }

    pub fn tracker(&self) -> &OfflineTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut OfflineTracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_engine::TrackingMode;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/offline.json");
        let log = OfflineLog::load(TrackerConfig::default(), Some(path.clone()), "user-1")
            .await
            .unwrap();
        assert!(!log.tracker().has_pending());
        assert_eq!(log.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn save_then_load_restores_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/offline.json");
        let config = TrackerConfig {
            mode: TrackingMode::Granular,
            max_changes: 50,
        };

        let mut log = OfflineLog::load(config, Some(path.clone()), "user-1").await.unwrap();
        log.tracker_mut().set_baseline(json!({"a": 1}));
        log.tracker_mut().track_change(&json!({"a": 2, "b": true}), 1000);
        log.set_last_sync(SyncMark {
            version: 4,
            hash: "abc".to_string(),
        });
        log.save().await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let reloaded = OfflineLog::load(config, Some(path), "user-1").await.unwrap();
        assert_eq!(reloaded.tracker().pending_count(), 2);
        assert_eq!(reloaded.tracker().baseline(), Some(&json!({"a": 1})));
        assert_eq!(reloaded.last_sync().map(|m| m.version), Some(4));
        assert_eq!(reloaded.user_id(), Some("user-1"));
    }

    #[tokio::test]
    async fn log_of_another_user_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");

        let mut log = OfflineLog::load(TrackerConfig::default(), Some(path.clone()), "alice")
            .await
            .unwrap();
        log.tracker_mut().track_change(&json!({"secret": 1}), 1000);
        log.set_last_sync(SyncMark {
            version: 2,
            hash: "h".to_string(),
        });
        log.save().await.unwrap();

        let other = OfflineLog::load(TrackerConfig::default(), Some(path), "bob")
            .await
            .unwrap();
        assert!(!other.tracker().has_pending());
        assert!(other.tracker().baseline().is_none());
        assert!(other.last_sync().is_none());
        assert_eq!(other.user_id(), Some("bob"));
    }

    #[tokio::test]
    async fn configured_tracker_settings_win_over_stored_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        let stored = TrackerConfig {
            mode: TrackingMode::Granular,
            max_changes: 100,
        };

        let mut log = OfflineLog::load(stored, Some(path.clone()), "user-1").await.unwrap();
        log.tracker_mut().set_baseline(json!({}));
        for n in 0..4 {
            log.tracker_mut().track_change(&json!({"n": n}), 1000 + n);
        }
        log.save().await.unwrap();

        let configured = TrackerConfig {
            mode: TrackingMode::Snapshot,
            max_changes: 1,
        };
        let reloaded = OfflineLog::load(configured, Some(path), "user-1").await.unwrap();
        assert_eq!(*reloaded.tracker().config(), configured);
        assert_eq!(reloaded.tracker().changes().count(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(OfflineLog::load(TrackerConfig::default(), Some(path), "user-1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn in_memory_log_never_touches_disk() {
        let mut log = OfflineLog::new(TrackerConfig::default());
        log.tracker_mut().track_change(&json!({"a": 1}), 1);
        log.save().await.unwrap();
        assert!(log.path().is_none());
    }
}
