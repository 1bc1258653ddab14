//! Offline change tracking.
//!
//! The tracker records edits made while disconnected as a log of
//! [`ChangeEntry`] values. Entries stay pending until the caller marks them
//! synced. The whole tracker can be exported to a [`TrackerSnapshot`] for
//! persistence and restored later.

use crate::{
    document::{remove_in, set_in},
    error::Result,
    ChangeId, Error, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};

/// Version of the tracker snapshot format.
pub const TRACKER_FORMAT_VERSION: u32 = 2;

/// Default cap on retained change entries.
pub const DEFAULT_MAX_CHANGES: usize = 1000;

/// How changes are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingMode {
    /// One `Replace` entry holding the whole document per change (default)
    #[default]
    Snapshot,
    /// One entry per changed leaf path
    Granular,
}

/// Kind of a recorded change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Replace,
}

/// A single recorded change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Unique identifier within this tracker
    pub id: ChangeId,
    /// What happened at `path`
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Keys leading to the change, outermost first (empty for the whole document)
    pub path: Vec<String>,
    /// New value, absent for deletions
    pub value: Option<Value>,
    /// When the change was recorded (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Whether the change has reached the remote copy
    pub synced: bool,
}

/// Tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    pub mode: TrackingMode,
    /// Oldest entries are evicted once this many are retained
    pub max_changes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Snapshot,
            max_changes: DEFAULT_MAX_CHANGES,
        }
    }
}

/// Records local edits against a baseline document.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineTracker {
    config: TrackerConfig,
    /// Document state the pending changes are relative to
    baseline: Option<Value>,
    /// Last document seen by `track_change`
    snapshot: Option<Value>,
    changes: VecDeque<ChangeEntry>,
    next_seq: u64,
}

impl OfflineTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            baseline: None,
            snapshot: None,
            changes: VecDeque::new(),
            next_seq: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Document the pending changes are relative to.
    pub fn baseline(&self) -> Option<&Value> {
        self.baseline.as_ref()
    }

    /// Last document recorded.
    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    /// Set the baseline and snapshot to a known-synced document.
    pub fn set_baseline(&mut self, doc: Value) {
        self.snapshot = Some(doc.clone());
        self.baseline = Some(doc);
    }

    /// Move the baseline to `doc` without touching recorded changes.
    ///
    /// The snapshot only follows when nothing is pending, so later edits keep
    /// diffing against the local view.
    pub fn advance_baseline(&mut self, doc: Value) {
        if !self.has_pending() {
            self.snapshot = Some(doc.clone());
        }
        self.baseline = Some(doc);
    }

    /// Record the difference between `doc` and the last snapshot.
    ///
    /// Returns the ids of the entries recorded; empty when nothing changed.
    pub fn track_change(&mut self, doc: &Value, now: Timestamp) -> Vec<ChangeId> {
        if self.snapshot.as_ref() == Some(doc) {
            return Vec::new();
        }

        let mut recorded = Vec::new();
        match self.config.mode {
            TrackingMode::Snapshot => {
                let id = self.push(ChangeKind::Replace, Vec::new(), Some(doc.clone()), now);
                recorded.push(id);
            }
            TrackingMode::Granular => {
                let empty = Value::Object(Map::new());
                let previous = self.snapshot.take().unwrap_or(empty);
                let mut diffs = Vec::new();
                diff_values(&mut Vec::new(), &previous, doc, &mut diffs);
                for (kind, path, value) in diffs {
                    recorded.push(self.push(kind, path, value, now));
                }
            }
        }

        if self.baseline.is_none() {
            self.baseline = Some(doc.clone());
        }
        self.snapshot = Some(doc.clone());
        recorded
    }

    fn push(
        &mut self,
        kind: ChangeKind,
        path: Vec<String>,
        value: Option<Value>,
        now: Timestamp,
    ) -> ChangeId {
        let id = format!("chg-{}-{}", now, self.next_seq);
        self.next_seq += 1;
        self.changes.push_back(ChangeEntry {
            id: id.clone(),
            kind,
            path,
            value,
            timestamp: now,
            synced: false,
        });

        while self.changes.len() > self.config.max_changes {
            self.changes.pop_front();
        }
        id
    }

    /// Replay unsynced changes onto `base` in recorded order.
    ///
    /// A root `Replace` swaps in the whole document, so in snapshot mode the
    /// result is the latest pending payload, or `base` when nothing is pending.
    pub fn apply_pending_changes(&self, base: &Value) -> Result<Value> {
        let mut doc = base.clone();
        for change in self.pending_changes() {
            match (change.kind, &change.value) {
                (ChangeKind::Delete, _) => {
                    remove_in(&mut doc, &change.path);
                }
                (_, Some(value)) => set_in(&mut doc, &change.path, value.clone()),
                (kind, None) => {
                    return Err(Error::InvalidSnapshot(format!(
                        "change {} of kind {:?} has no value",
                        change.id, kind
                    )))
                }
            }
        }
        Ok(doc)
    }

    /// Adopt a new configuration, evicting the oldest entries if the new cap
    /// is smaller. Returns how many entries were evicted.
    pub fn reconfigure(&mut self, config: TrackerConfig) -> usize {
        self.config = config;
        let excess = self.changes.len().saturating_sub(config.max_changes);
        self.changes.drain(..excess);
        excess
    }

    /// All retained changes, oldest first.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.changes.iter()
    }

    /// Changes not yet synced, oldest first.
    pub fn pending_changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.changes.iter().filter(|c| !c.synced)
    }

    /// Changes marked synced but not yet cleared.
    pub fn synced_changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.changes.iter().filter(|c| c.synced)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_changes().count()
    }

    pub fn has_pending(&self) -> bool {
        self.changes.iter().any(|c| !c.synced)
    }

    /// Flag changes as synced without removing them. Returns how many were flagged.
    pub fn mark_synced(&mut self, ids: &[ChangeId]) -> usize {
        let ids: HashSet<&ChangeId> = ids.iter().collect();
        let mut flagged = 0;
        for change in self.changes.iter_mut() {
            if !change.synced && ids.contains(&change.id) {
                change.synced = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Flag every pending change as synced.
    pub fn mark_all_synced(&mut self) -> usize {
        let ids: Vec<ChangeId> = self.pending_changes().map(|c| c.id.clone()).collect();
        self.mark_synced(&ids)
    }

    /// Remove changes flagged as synced. Returns how many were removed.
    pub fn clear_synced(&mut self) -> usize {
        let before = self.changes.len();
        self.changes.retain(|c| !c.synced);
        before - self.changes.len()
    }

    /// Reset the change log together with the baseline and snapshot.
    pub fn clear_all(&mut self) {
        self.changes.clear();
        self.baseline = None;
        self.snapshot = None;
    }

    /// Export state for persistence.
    pub fn export_state(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            format_version: TRACKER_FORMAT_VERSION,
            config: self.config,
            baseline: self.baseline.clone(),
            snapshot: self.snapshot.clone(),
            changes: self.changes.iter().cloned().collect(),
            next_seq: self.next_seq,
        }
    }

    /// Restore a tracker from a snapshot.
    pub fn import_state(snapshot: TrackerSnapshot) -> Result<Self> {
        if snapshot.format_version > TRACKER_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported tracker format version: {} (max supported: {})",
                snapshot.format_version, TRACKER_FORMAT_VERSION
            )));
        }

        let mut tracker = Self {
            config: snapshot.config,
            baseline: snapshot.baseline,
            snapshot: snapshot.snapshot,
            changes: snapshot.changes.into(),
            next_seq: snapshot.next_seq.max(1),
        };
        while tracker.changes.len() > tracker.config.max_changes {
            tracker.changes.pop_front();
        }
        Ok(tracker)
    }
}

impl Default for OfflineTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

/// Recursive diff of two documents into leaf-level changes.
fn diff_values(
    path: &mut Vec<String>,
    old: &Value,
    new: &Value,
    out: &mut Vec<(ChangeKind, Vec<String>, Option<Value>)>,
) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                path.push(key.clone());
                match new_map.get(key) {
                    Some(new_value) => diff_values(path, old_value, new_value, out),
                    None => out.push((ChangeKind::Delete, path.clone(), None)),
                }
                path.pop();
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    let mut child = path.clone();
                    child.push(key.clone());
                    out.push((ChangeKind::Create, child, Some(new_value.clone())));
                }
            }
        }
        _ if path.is_empty() => out.push((ChangeKind::Replace, Vec::new(), Some(new.clone()))),
        _ => out.push((ChangeKind::Update, path.clone(), Some(new.clone()))),
    }
}

/// Persisted form of an [`OfflineTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub format_version: u32,
    pub config: TrackerConfig,
    pub baseline: Option<Value>,
    pub snapshot: Option<Value>,
    pub changes: Vec<ChangeEntry>,
    pub next_seq: u64,
}

impl TrackerSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}
