//! Edge case tests for confsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use confsync_engine::{
    ArrayMergeStrategy, ChangeKind, ConflictKind, ConflictResolution, ConflictResolver,
    OfflineTracker, OperationKind, ResolutionStrategy, ResolverConfig, StartOutcome, StateConfig,
    SyncCompletion, SyncOperation, SyncState, SyncStateManager, TrackerConfig, TrackingMode,
};
use serde_json::{json, Value};

fn auto() -> ConflictResolver {
    ConflictResolver::with_strategy(ResolutionStrategy::Auto)
}

// ============================================================================
// Resolver Scenarios
// ============================================================================

#[test]
fn most_recent_remote_newer() {
    let local = json!({"a": 1, "lastModified": 1000});
    let remote = json!({"a": 2, "lastModified": 2000});

    let result =
        ConflictResolver::with_strategy(ResolutionStrategy::MostRecent).resolve(&local, &remote, None);

    assert_eq!(result.resolved["a"], 2);
    assert_eq!(result.resolved, remote);
    assert_eq!(result.auto_resolved, 2); // "a" and "lastModified"
}

#[test]
fn most_recent_with_rfc3339_timestamps() {
    let local = json!({"a": 1, "lastModified": "2024-03-01T10:00:00Z"});
    let remote = json!({"a": 2, "lastModified": "2024-02-01T10:00:00Z"});

    let result =
        ConflictResolver::with_strategy(ResolutionStrategy::MostRecent).resolve(&local, &remote, None);
    assert_eq!(result.resolved, local);
}

#[test]
fn most_recent_tie_prefers_remote() {
    let local = json!({"a": 1});
    let remote = json!({"a": 2});
    let result =
        ConflictResolver::with_strategy(ResolutionStrategy::MostRecent).resolve(&local, &remote, None);
    assert_eq!(result.resolved, remote);
}

#[test]
fn union_array_merge() {
    let result = auto().resolve(&json!([1, 2, 3]), &json!([2, 3, 4]), None);
    assert_eq!(result.resolved, json!([1, 2, 3, 4]));
}

#[test]
fn union_collapses_local_duplicates() {
    let result = auto().resolve(&json!({"l": [1, 1, 2]}), &json!({"l": [3, 1]}), None);
    assert_eq!(result.resolved, json!({"l": [1, 2, 3]}));
}

#[test]
fn deletion_restored_by_auto() {
    let base = json!({"f": "orig"});
    let result = auto().resolve(&json!({}), &json!({"f": "orig"}), Some(&base));

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].kind, ConflictKind::DeletedLocal);
    assert_eq!(result.resolved, json!({"f": "orig"}));
}

#[test]
fn deletion_with_most_recent() {
    let base = json!({"f": "orig", "lastModified": 1});
    let local = json!({"lastModified": 5000});
    let remote = json!({"f": "orig", "lastModified": 2000});

    let result =
        ConflictResolver::with_strategy(ResolutionStrategy::MostRecent).resolve(&local, &remote, Some(&base));

    let deletion = result
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::DeletedLocal)
        .unwrap();
    assert_eq!(deletion.resolution, Some(ConflictResolution::KeepDeleted));
    assert!(result.resolved.get("f").is_none());
}

#[test]
fn manual_deletions_keep_local_view() {
    let base = json!({"gone_local": 1, "gone_remote": 2});
    let result = ConflictResolver::with_strategy(ResolutionStrategy::Manual).resolve(
        &json!({"gone_remote": 2}),
        &json!({"gone_local": 1}),
        Some(&base),
    );

    assert_eq!(result.manual_required, 2);
    assert_eq!(result.resolved, json!({"gone_remote": 2}));
}

#[test]
fn non_object_base_is_ignored() {
    let result = auto().resolve(&json!({}), &json!({"f": 1}), Some(&json!([1, 2])));
    assert!(!result.has_conflicts());
    assert_eq!(result.resolved, json!({"f": 1}));
}

#[test]
fn null_versus_value_is_type_change() {
    let result = auto().resolve(&json!({"a": null}), &json!({"a": 3}), None);
    assert_eq!(result.conflicts[0].kind, ConflictKind::TypeChange);
    assert_eq!(result.resolved, json!({"a": 3}));
}

#[test]
fn many_conflicts_are_all_counted() {
    let local: Value = (0..50)
        .map(|i| (format!("k{i}"), json!(i)))
        .collect::<serde_json::Map<_, _>>()
        .into();
    let remote: Value = (0..50)
        .map(|i| (format!("k{i}"), json!(i + 1)))
        .collect::<serde_json::Map<_, _>>()
        .into();

    let result = ConflictResolver::new(ResolverConfig {
        strategy: ResolutionStrategy::Manual,
        array_merge: ArrayMergeStrategy::Union,
    })
    .resolve(&local, &remote, None);

    assert_eq!(result.conflicts.len(), 50);
    assert_eq!(result.manual_required, 50);
}

#[test]
fn deeply_nested_document() {
    let mut local = json!("leaf-local");
    let mut remote = json!("leaf-remote");
    for _ in 0..64 {
        local = json!({"n": local});
        remote = json!({"n": remote});
    }

    let result = auto().resolve(&local, &remote, None);
    let path = &result.conflicts[0].path;
    assert_eq!(path.split('.').count(), 64);
    assert!(path.chars().all(|c| c == 'n' || c == '.'));
}

#[test]
fn unicode_keys_and_values() {
    let local = json!({"設定": {"名前": "ローカル"}, "emoji🎉": [1]});
    let remote = json!({"設定": {"名前": "リモート"}, "emoji🎉": [2]});

    let result = auto().resolve(&local, &remote, None);
    assert_eq!(result.resolved["設定"]["名前"], "リモート");
    assert_eq!(result.resolved["emoji🎉"], json!([1, 2]));
    assert!(result.conflict_paths().any(|p| p == "設定.名前"));
}

// ============================================================================
// Offline Tracker Edge Cases
// ============================================================================

#[test]
fn granular_root_type_change_replaces() {
    let mut tracker = OfflineTracker::new(TrackerConfig {
        mode: TrackingMode::Granular,
        max_changes: 10,
    });
    tracker.set_baseline(json!({"a": 1}));
    tracker.track_change(&json!([1, 2]), 1000);

    let change = tracker.changes().next().unwrap();
    assert_eq!(change.kind, ChangeKind::Replace);
    assert_eq!(
        tracker.apply_pending_changes(&json!({"a": 1})).unwrap(),
        json!([1, 2])
    );
}

#[test]
fn granular_without_baseline_creates_every_key() {
    let mut tracker = OfflineTracker::new(TrackerConfig {
        mode: TrackingMode::Granular,
        max_changes: 10,
    });
    tracker.track_change(&json!({"a": 1, "b": {"c": 2}}), 1000);

    assert!(tracker.changes().all(|c| c.kind == ChangeKind::Create));
    assert_eq!(tracker.changes().count(), 2);
}

#[test]
fn replay_skips_synced_entries() {
    let mut tracker = OfflineTracker::new(TrackerConfig {
        mode: TrackingMode::Granular,
        max_changes: 10,
    });
    tracker.set_baseline(json!({"a": 1, "b": 1}));
    let first = tracker.track_change(&json!({"a": 2, "b": 1}), 1000);
    tracker.track_change(&json!({"a": 2, "b": 2}), 2000);
    tracker.mark_synced(&first);

    let replayed = tracker.apply_pending_changes(&json!({"a": 9, "b": 1})).unwrap();
    assert_eq!(replayed, json!({"a": 9, "b": 2}));
}

#[test]
fn zero_capacity_tracker_keeps_nothing() {
    let mut tracker = OfflineTracker::new(TrackerConfig {
        mode: TrackingMode::Snapshot,
        max_changes: 0,
    });
    tracker.track_change(&json!({"a": 1}), 1000);
    assert_eq!(tracker.changes().count(), 0);
    assert_eq!(tracker.snapshot(), Some(&json!({"a": 1})));
}

#[test]
fn mark_unknown_ids_is_noop() {
    let mut tracker = OfflineTracker::default();
    tracker.track_change(&json!({"a": 1}), 1000);
    assert_eq!(tracker.mark_synced(&["missing".to_string()]), 0);
    assert_eq!(tracker.clear_synced(), 0);
}

// ============================================================================
// State Machine Edge Cases
// ============================================================================

#[test]
fn offline_queue_length_is_min_of_calls_and_cap() {
    for (calls, cap) in [(0usize, 5usize), (3, 5), (5, 5), (12, 5), (4, 0)] {
        let mut manager = SyncStateManager::new(StateConfig {
            max_queue_size: cap,
            ..StateConfig::default()
        });
        manager.set_online_status(false, 0);

        for i in 0..calls {
            let op = SyncOperation::new(format!("op-{i}"), OperationKind::Download, None, 0);
            assert!(matches!(
                manager.start_sync(op, 0).unwrap(),
                StartOutcome::Queued { .. }
            ));
        }
        assert_eq!(manager.queue_len(), calls.min(cap));
    }
}

#[test]
fn queued_operations_run_exactly_once() {
    let mut manager = SyncStateManager::default();
    manager.set_online_status(false, 0);
    for i in 0..10 {
        let op = SyncOperation::new(format!("op-{i}"), OperationKind::Bidirectional, Some(json!({})), 0);
        manager.start_sync(op, 0).unwrap();
    }

    let mut processed = Vec::new();
    for op in manager.set_online_status(true, 100) {
        manager.start_sync(op.clone(), 100).unwrap();
        manager.complete_sync(SyncCompletion::success(), 101).unwrap();
        processed.push(op.id);
    }
    processed.extend(manager.process_queue().into_iter().map(|op| op.id));

    let expected: Vec<String> = (0..10).map(|i| format!("op-{i}")).collect();
    assert_eq!(processed, expected);
    assert_eq!(manager.stats().stats.successful_syncs, 10);
    assert_eq!(manager.state(), SyncState::Idle);
}

#[test]
fn repeated_online_status_is_idempotent() {
    let mut manager = SyncStateManager::default();
    assert!(manager.set_online_status(true, 0).is_empty());
    manager.set_online_status(false, 1);
    manager.set_online_status(false, 2);

    let offline_transitions = manager
        .history()
        .filter(|t| t.to == SyncState::Offline)
        .count();
    assert_eq!(offline_transitions, 1);
}
