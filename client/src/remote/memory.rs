//! In-process [`RemoteStore`] backed by `DashMap`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{
    DeviceInfo, DeviceRegistration, DeviceStatsDelta, HistoryEntry, HistoryQuery, RemoteRecord,
    RemoteStore, StoreError, StoreResult, UpdateAck, UserProfile,
};
use crate::config::DEFAULT_MAX_CONFIG_SIZE;

/// History entries kept per user before the oldest are pruned.
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 100;

#[derive(Debug)]
struct UserData {
    profile: UserProfile,
    record: Option<RemoteRecord>,
    devices: Vec<DeviceInfo>,
    history: VecDeque<HistoryEntry>,
}

/// Memory-backed store. Shareable through `Arc`.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    users: DashMap<String, UserData>,
    available: AtomicBool,
    max_record_size: usize,
    max_history: usize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            available: AtomicBool::new(true),
            max_record_size: DEFAULT_MAX_CONFIG_SIZE,
            max_history: DEFAULT_MAX_HISTORY_ENTRIES,
        }
    }

    /// Reject records whose `data` is larger than `max` bytes.
    pub fn with_max_record_size(mut self, max: usize) -> Self {
        self.max_record_size = max;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Overwrite the stored record without any version or size checks.
    ///
    /// Creates the user if needed.
    pub fn put_record(&self, user_id: &str, record: RemoteRecord) {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| new_user(user_id))
            .record = Some(record);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut UserData) -> StoreResult<T>) -> StoreResult<T> {
        self.check_available()?;
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        f(&mut user)
    }
}

fn new_user(user_id: &str) -> UserData {
    UserData {
        profile: UserProfile {
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        },
        record: None,
        devices: Vec::new(),
        history: VecDeque::new(),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_or_create_user(&self, user_id: &str) -> StoreResult<UserProfile> {
        self.check_available()?;
        let user = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| new_user(user_id));
        Ok(user.profile.clone())
    }

    async fn get_user_config(&self, user_id: &str) -> StoreResult<Option<RemoteRecord>> {
        self.with_user(user_id, |user| Ok(user.record.clone()))
    }

    async fn update_user_config(
        &self,
        user_id: &str,
        record: RemoteRecord,
    ) -> StoreResult<UpdateAck> {
        self.check_available()?;
        if record.data.len() > self.max_record_size {
            return Err(StoreError::TooLarge {
                size: record.data.len(),
                max: self.max_record_size,
            });
        }

        self.with_user(user_id, |user| {
            let current = user.record.as_ref().map_or(0, |r| r.version);
            if record.version != current + 1 {
                return Err(StoreError::Rejected(format!(
                    "version {} does not follow stored version {current}",
                    record.version
                )));
            }
            let version = record.version;
            user.record = Some(record);
            Ok(UpdateAck { version })
        })
    }

    async fn register_device(
        &self,
        user_id: &str,
        device: &DeviceRegistration,
    ) -> StoreResult<DeviceInfo> {
        self.with_user(user_id, |user| {
            let now = Utc::now();
            if let Some(existing) = user
                .devices
                .iter_mut()
                .find(|d| d.device_id == device.device_id)
            {
                existing.device_name = device.device_name.clone();
                existing.platform = device.platform.clone();
                existing.last_seen = now;
                return Ok(existing.clone());
            }

            let info = DeviceInfo {
                device_id: device.device_id.clone(),
                device_name: device.device_name.clone(),
                platform: device.platform.clone(),
                registered_at: now,
                last_seen: now,
                stats: Default::default(),
            };
            user.devices.push(info.clone());
            Ok(info)
        })
    }

    async fn update_device_stats(
        &self,
        user_id: &str,
        device_id: &str,
        delta: &DeviceStatsDelta,
    ) -> StoreResult<()> {
        self.with_user(user_id, |user| {
            let device = user
                .devices
                .iter_mut()
                .find(|d| d.device_id == device_id)
                .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
            device.stats.apply(delta);
            device.last_seen = Utc::now();
            Ok(())
        })
    }

    async fn add_history_entry(&self, user_id: &str, entry: HistoryEntry) -> StoreResult<()> {
        let max = self.max_history;
        self.with_user(user_id, |user| {
            user.history.push_back(entry);
            while user.history.len() > max {
                user.history.pop_front();
            }
            Ok(())
        })
    }

    async fn get_history(
        &self,
        user_id: &str,
        query: &HistoryQuery,
    ) -> StoreResult<Vec<HistoryEntry>> {
        self.with_user(user_id, |user| {
            let since = query.since_version.unwrap_or(0);
            let limit = query.limit.unwrap_or(usize::MAX);
            Ok(user
                .history
                .iter()
                .rev()
                .filter(|e| query.since_version.is_none() || e.version > since)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    async fn get_all_devices(&self, user_id: &str) -> StoreResult<Vec<DeviceInfo>> {
        self.with_user(user_id, |user| Ok(user.devices.clone()))
    }
}
