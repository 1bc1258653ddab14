//! Sync state machine.
//!
//! [`SyncStateManager`] decides when uploads, downloads and conflict
//! resolution may run. Only one operation is in flight at a time; while
//! offline, new operations are parked in a bounded FIFO queue.
//!
//! ```text
//! Idle ──start──▶ Syncing ──▶ Uploading ──────────┐
//!  ▲                 │  ├───▶ Downloading ────────┤
//!  │                 │  └───▶ ResolvingConflicts ─┤
//!  └──── complete ───┴─────────────────────────────┘
//!
//! any active state ──fault──▶ Error ──start / reset──▶ Syncing / Idle
//! set_online_status(false) ──▶ Offline ──set_online_status(true)──▶ Idle
//! ```
//!
//! Every transition is recorded in a bounded history and announced to all
//! subscribed [`SyncObserver`]s.

use crate::{error::Result, Error, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default cap on queued operations.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default cap on retained transitions.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// State of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Uploading,
    Downloading,
    ResolvingConflicts,
    Error,
    Offline,
}

impl SyncState {
    /// Whether an operation is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SyncState::Syncing
                | SyncState::Uploading
                | SyncState::Downloading
                | SyncState::ResolvingConflicts
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Uploading => "uploading",
            SyncState::Downloading => "downloading",
            SyncState::ResolvingConflicts => "resolving_conflicts",
            SyncState::Error => "error",
            SyncState::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Direction of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Upload,
    Download,
    Bidirectional,
}

/// Lifecycle status of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// A unit of sync work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Document to upload or reconcile, if any
    pub data: Option<serde_json::Value>,
    pub status: OperationStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
}

impl SyncOperation {
    pub fn new(
        id: impl Into<OperationId>,
        kind: OperationKind,
        data: Option<serde_json::Value>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            data,
            status: OperationStatus::Pending,
            created_at,
            started_at: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidOperation("operation id is empty".to_string()));
        }
        if self.kind == OperationKind::Upload && self.data.is_none() {
            return Err(Error::InvalidOperation(format!(
                "upload operation {} has no data",
                self.id
            )));
        }
        Ok(())
    }
}

/// Outcome of [`SyncStateManager::start_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The operation is now in flight
    Started,
    /// The machine is offline; `position` is the queue slot, or `None` when
    /// the queue was full and the operation was not kept
    Queued { position: Option<usize> },
}

/// How an in-flight operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Report passed to [`SyncStateManager::complete_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCompletion {
    pub status: CompletionStatus,
    pub error: Option<String>,
    pub conflicts_resolved: usize,
}

impl SyncCompletion {
    pub fn success() -> Self {
        Self {
            status: CompletionStatus::Success,
            error: None,
            conflicts_resolved: 0,
        }
    }

    pub fn success_with_conflicts(conflicts_resolved: usize) -> Self {
        Self {
            conflicts_resolved,
            ..Self::success()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Failed,
            error: Some(error.into()),
            conflicts_resolved: 0,
        }
    }
}

/// A recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: SyncState,
    pub to: SyncState,
    pub at: Timestamp,
    pub operation_id: Option<OperationId>,
}

/// Lifecycle events emitted to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    StateChanged(StateTransition),
    #[serde(rename_all = "camelCase")]
    SyncStarted {
        operation_id: OperationId,
        kind: OperationKind,
    },
    #[serde(rename_all = "camelCase")]
    OperationQueued {
        operation_id: OperationId,
        queue_len: usize,
    },
    #[serde(rename_all = "camelCase")]
    QueueFull {
        operation_id: OperationId,
        max_queue_size: usize,
    },
    #[serde(rename_all = "camelCase")]
    QueueProcessing { count: usize },
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        operation_id: OperationId,
        status: CompletionStatus,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        state: SyncState,
        operation_id: Option<OperationId>,
    },
    Online,
    Offline,
}

/// Receives [`SyncEvent`]s from a [`SyncStateManager`].
pub trait SyncObserver: Send {
    fn on_event(&mut self, event: &SyncEvent);
}

impl<F> SyncObserver for F
where
    F: FnMut(&SyncEvent) + Send,
{
    fn on_event(&mut self, event: &SyncEvent) {
        self(event)
    }
}

/// Running counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub conflicts_resolved: u64,
    pub last_error: Option<String>,
    pub last_sync_at: Option<Timestamp>,
}

/// Point-in-time view of the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub state: SyncState,
    pub online: bool,
    pub stats: SyncStats,
    pub current_operation: Option<SyncOperation>,
    pub queue_len: usize,
}

/// State machine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    pub max_queue_size: usize,
    pub max_history: usize,
    /// Drain the queue automatically when connectivity returns
    pub auto_process_queue: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_history: DEFAULT_MAX_HISTORY,
            auto_process_queue: true,
        }
    }
}

/// The sync finite-state machine.
pub struct SyncStateManager {
    config: StateConfig,
    state: SyncState,
    online: bool,
    current: Option<SyncOperation>,
    queue: VecDeque<SyncOperation>,
    history: VecDeque<StateTransition>,
    stats: SyncStats,
    observers: Vec<Box<dyn SyncObserver>>,
}

impl fmt::Debug for SyncStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStateManager")
            .field("state", &self.state)
            .field("online", &self.online)
            .field("current", &self.current.as_ref().map(|op| &op.id))
            .field("queue_len", &self.queue.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SyncStateManager {
    pub fn new(config: StateConfig) -> Self {
        Self {
            config,
            state: SyncState::Idle,
            online: true,
            current: None,
            queue: VecDeque::new(),
            history: VecDeque::new(),
            stats: SyncStats::default(),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_syncing(&self) -> bool {
        self.state.is_active()
    }

    /// The operation in flight, if any.
    pub fn current_operation(&self) -> Option<&SyncOperation> {
        self.current.as_ref()
    }

    /// Operations waiting for connectivity, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &SyncOperation> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Register an observer for all subsequent events.
    pub fn subscribe(&mut self, observer: impl SyncObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Begin an operation, or queue it while offline.
    pub fn start_sync(&mut self, mut op: SyncOperation, now: Timestamp) -> Result<StartOutcome> {
        op.validate()?;

        if self.state.is_active() {
            return Err(Error::SyncInProgress);
        }

        if !self.online {
            return Ok(self.enqueue(op));
        }

        op.status = OperationStatus::InProgress;
        op.started_at = Some(now);
        let id = op.id.clone();
        let kind = op.kind;
        self.current = Some(op);
        self.stats.total_syncs += 1;

        self.transition(SyncState::Syncing, now);
        self.emit(SyncEvent::SyncStarted {
            operation_id: id,
            kind,
        });
        Ok(StartOutcome::Started)
    }

    fn enqueue(&mut self, mut op: SyncOperation) -> StartOutcome {
        if self.queue.len() >= self.config.max_queue_size {
            self.emit(SyncEvent::QueueFull {
                operation_id: op.id,
                max_queue_size: self.config.max_queue_size,
            });
            return StartOutcome::Queued { position: None };
        }

        op.status = OperationStatus::Queued;
        let operation_id = op.id.clone();
        self.queue.push_back(op);
        let queue_len = self.queue.len();
        self.emit(SyncEvent::OperationQueued {
            operation_id,
            queue_len,
        });
        StartOutcome::Queued {
            position: Some(queue_len - 1),
        }
    }

    pub fn transition_to_uploading(&mut self, now: Timestamp) -> Result<()> {
        self.sub_transition(SyncState::Uploading, now)
    }

    pub fn transition_to_downloading(&mut self, now: Timestamp) -> Result<()> {
        self.sub_transition(SyncState::Downloading, now)
    }

    pub fn transition_to_resolving_conflicts(&mut self, now: Timestamp) -> Result<()> {
        self.sub_transition(SyncState::ResolvingConflicts, now)
    }

    fn sub_transition(&mut self, to: SyncState, now: Timestamp) -> Result<()> {
        if self.state != SyncState::Syncing {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.transition(to, now);
        Ok(())
    }

    /// Finish the in-flight operation. A failed status is recorded, not returned.
    pub fn complete_sync(&mut self, completion: SyncCompletion, now: Timestamp) -> Result<()> {
        let mut op = self.current.take().ok_or(Error::NoSyncInProgress)?;
        let duration_ms = now.saturating_sub(op.started_at.unwrap_or(now));

        match completion.status {
            CompletionStatus::Success => {
                op.status = OperationStatus::Completed;
                self.stats.successful_syncs += 1;
                self.stats.conflicts_resolved += completion.conflicts_resolved as u64;
                self.stats.last_sync_at = Some(now);
            }
            CompletionStatus::Failed => {
                op.status = OperationStatus::Failed;
                self.stats.failed_syncs += 1;
                self.stats.last_error = Some(
                    completion
                        .error
                        .unwrap_or_else(|| "sync failed".to_string()),
                );
            }
        }

        let resting = self.resting_state();
        self.transition_with(resting, now, Some(op.id.clone()));
        self.emit(SyncEvent::SyncCompleted {
            operation_id: op.id,
            status: completion.status,
            duration_ms,
        });
        Ok(())
    }

    /// Record an unexpected fault. The machine stays in `Error` until the
    /// next `start_sync` or `reset`.
    pub fn transition_to_error(&mut self, message: impl Into<String>, now: Timestamp) {
        let message = message.into();
        let operation_id = self.current.take().map(|op| op.id);

        self.stats.failed_syncs += 1;
        self.stats.last_error = Some(message.clone());

        let state = self.state;
        self.transition_with(SyncState::Error, now, operation_id.clone());
        self.emit(SyncEvent::Error {
            message,
            state,
            operation_id,
        });
    }

    /// Leave `Error` (or abandon an in-flight operation) and go back to rest.
    pub fn reset(&mut self, now: Timestamp) {
        self.current = None;
        let resting = self.resting_state();
        if self.state != resting {
            self.transition(resting, now);
        }
    }

    /// Update connectivity.
    ///
    /// Going offline parks the machine in `Offline`, deferred until the
    /// in-flight operation completes. Coming back online returns to `Idle`
    /// and, with `auto_process_queue`, drains the queue; the drained
    /// operations are returned for the caller to run.
    pub fn set_online_status(&mut self, online: bool, now: Timestamp) -> Vec<SyncOperation> {
        if self.online == online {
            return Vec::new();
        }
        self.online = online;

        if !online {
            self.emit(SyncEvent::Offline);
            if !self.state.is_active() {
                self.transition(SyncState::Offline, now);
            }
            return Vec::new();
        }

        self.emit(SyncEvent::Online);
        if self.state == SyncState::Offline {
            self.transition(SyncState::Idle, now);
        }

        if self.config.auto_process_queue {
            self.process_queue()
        } else {
            Vec::new()
        }
    }

    /// Hand out every queued operation in FIFO order, each exactly once.
    ///
    /// No-op while offline or while an operation is in flight.
    pub fn process_queue(&mut self) -> Vec<SyncOperation> {
        if !self.online || self.state.is_active() || self.queue.is_empty() {
            return Vec::new();
        }

        let drained: Vec<SyncOperation> = self
            .queue
            .drain(..)
            .map(|mut op| {
                op.status = OperationStatus::Pending;
                op
            })
            .collect();
        self.emit(SyncEvent::QueueProcessing {
            count: drained.len(),
        });
        drained
    }

    /// Drop all queued operations.
    pub fn clear_queue(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            state: self.state,
            online: self.online,
            stats: self.stats.clone(),
            current_operation: self.current.clone(),
            queue_len: self.queue.len(),
        }
    }

    fn resting_state(&self) -> SyncState {
        if self.online {
            SyncState::Idle
        } else {
            SyncState::Offline
        }
    }

    fn transition(&mut self, to: SyncState, now: Timestamp) {
        let operation_id = self.current.as_ref().map(|op| op.id.clone());
        self.transition_with(to, now, operation_id);
    }

    fn transition_with(&mut self, to: SyncState, now: Timestamp, operation_id: Option<OperationId>) {
        let record = StateTransition {
            from: self.state,
            to,
            at: now,
            operation_id,
        };
        self.state = to;

        self.history.push_back(record.clone());
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
        self.emit(SyncEvent::StateChanged(record));
    }

    fn emit(&mut self, event: SyncEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(&event);
        }
    }
}

impl Default for SyncStateManager {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}
