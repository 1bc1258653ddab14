//! Structural conflict resolution for configuration documents.
//!
//! The resolver merges a local and a remote document into a fresh tree. It is
//! a pure function: inputs are never mutated and the same inputs always
//! produce the same output.
//!
//! # Algorithm
//!
//! 1. Walk both trees recursively, keyed by dotted path
//! 2. Identical values are copied through
//! 3. Objects are merged key by key; one-sided keys pass through
//! 4. Diverged arrays are merged with the configured array strategy
//! 5. Scalar and type conflicts are resolved with the configured strategy
//! 6. With a common ancestor, removed keys are reported as deletions

use crate::document::{join_path, last_modified, same_kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Strategy for resolving scalar, type and deletion conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Local value always wins
    LocalWins,
    /// Remote value always wins
    RemoteWins,
    /// Side with the newer top-level `lastModified` wins
    MostRecent,
    /// Remote wins for modifications, deletions are undone (default)
    #[default]
    Auto,
    /// Leave conflicts unresolved for the user
    Manual,
}

/// Strategy for merging arrays whose contents diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayMergeStrategy {
    /// Local items followed by remote items not already present (default)
    #[default]
    Union,
    /// Keep the local array
    Local,
    /// Keep the remote array
    Remote,
}

/// Kind of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// Both sides changed a value to different values
    ModifiedBoth,
    /// Both sides hold arrays with different contents
    ArrayDiverged,
    /// The two sides hold values of different types
    TypeChange,
    /// Removed locally, still present remotely
    DeletedLocal,
    /// Removed remotely, still present locally
    DeletedRemote,
}

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// The local value was kept
    LocalWins,
    /// The remote value was taken
    RemoteWins,
    /// Both values were combined
    Merged,
    /// The deletion was kept and the key stays absent
    KeepDeleted,
}

/// A conflict detected at one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Dotted path of the conflict (empty for the document root)
    pub path: String,
    /// What kind of conflict this is
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    /// Local value, absent if deleted locally
    pub local_value: Option<Value>,
    /// Remote value, absent if deleted remotely
    pub remote_value: Option<Value>,
    /// Applied resolution, `None` when manual resolution is required
    pub resolution: Option<ConflictResolution>,
}

impl ConflictRecord {
    /// Whether the conflict still needs a decision from the user.
    pub fn is_manual(&self) -> bool {
        self.resolution.is_none()
    }
}

/// Result of resolving two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// The merged document
    pub resolved: Value,
    /// Every conflict found, in traversal order
    pub conflicts: Vec<ConflictRecord>,
    /// Number of conflicts resolved automatically
    pub auto_resolved: usize,
    /// Number of conflicts left for manual resolution
    pub manual_required: usize,
}

impl Resolution {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn needs_manual_resolution(&self) -> bool {
        self.manual_required > 0
    }

    /// Paths of all conflicts.
    pub fn conflict_paths(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|c| c.path.as_str())
    }
}

/// Resolver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    pub strategy: ResolutionStrategy,
    pub array_merge: ArrayMergeStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Merges configuration documents.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ResolverConfig,
}

impl ConflictResolver {
    /// Create a resolver with the given configuration.
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Create a resolver with a strategy and the default array merge.
    pub fn with_strategy(strategy: ResolutionStrategy) -> Self {
        Self::new(ResolverConfig {
            strategy,
            ..ResolverConfig::default()
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Merge `local` and `remote`, optionally against their common ancestor.
    ///
    /// Deletions can only be detected when `base` is supplied; without it a
    /// key present on one side is treated as an addition.
    pub fn resolve(&self, local: &Value, remote: &Value, base: Option<&Value>) -> Resolution {
        let local_is_newer =
            last_modified(local).unwrap_or(0) > last_modified(remote).unwrap_or(0);
        let mut pass = Pass {
            config: &self.config,
            local_is_newer,
            conflicts: Vec::new(),
        };

        let resolved = pass.merge("", local, remote, base);
        let manual_required = pass.conflicts.iter().filter(|c| c.is_manual()).count();

        Resolution {
            resolved,
            auto_resolved: pass.conflicts.len() - manual_required,
            manual_required,
            conflicts: pass.conflicts,
        }
    }
}

/// State of a single resolve call.
struct Pass<'a> {
    config: &'a ResolverConfig,
    local_is_newer: bool,
    conflicts: Vec<ConflictRecord>,
}

impl Pass<'_> {
    fn merge(&mut self, path: &str, local: &Value, remote: &Value, base: Option<&Value>) -> Value {
        if local == remote {
            return local.clone();
        }

        // Leaves changed on one side only take that side. Objects always
        // recurse so deletions inside them are still seen.
        let both_objects = local.is_object() && remote.is_object();
        if let (Some(base), false) = (base, both_objects) {
            if base == remote {
                return local.clone();
            }
            if base == local {
                return remote.clone();
            }
        }

        match (local, remote) {
            (Value::Object(l), Value::Object(r)) => {
                Value::Object(self.merge_objects(path, l, r, base.and_then(Value::as_object)))
            }
            (Value::Array(l), Value::Array(r)) => self.merge_arrays(path, l, r),
            _ => {
                let kind = if same_kind(local, remote) {
                    ConflictKind::ModifiedBoth
                } else {
                    ConflictKind::TypeChange
                };
                self.merge_scalars(path, kind, local, remote)
            }
        }
    }

    fn merge_objects(
        &mut self,
        path: &str,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
        base: Option<&Map<String, Value>>,
    ) -> Map<String, Value> {
        let mut merged = Map::new();

        for (key, local_value) in local {
            let child = join_path(path, key);
            let base_value = base.and_then(|b| b.get(key));
            match remote.get(key) {
                Some(remote_value) => {
                    let value = self.merge(&child, local_value, remote_value, base_value);
                    merged.insert(key.clone(), value);
                }
                None if base_value.is_some() => {
                    if let Some(value) = self.deleted_remote(child, local_value) {
                        merged.insert(key.clone(), value);
                    }
                }
                None => {
                    merged.insert(key.clone(), local_value.clone());
                }
            }
        }

        for (key, remote_value) in remote {
            if local.contains_key(key) {
                continue;
            }
            let child = join_path(path, key);
            if base.is_some_and(|b| b.contains_key(key)) {
                if let Some(value) = self.deleted_local(child, remote_value) {
                    merged.insert(key.clone(), value);
                }
            } else {
                merged.insert(key.clone(), remote_value.clone());
            }
        }

        merged
    }

    fn merge_arrays(&mut self, path: &str, local: &[Value], remote: &[Value]) -> Value {
        let (merged, resolution) = match self.config.array_merge {
            ArrayMergeStrategy::Union => {
                let mut items: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
                for item in local.iter().chain(remote) {
                    if !items.contains(item) {
                        items.push(item.clone());
                    }
                }
                (items, ConflictResolution::Merged)
            }
            ArrayMergeStrategy::Local => (local.to_vec(), ConflictResolution::LocalWins),
            ArrayMergeStrategy::Remote => (remote.to_vec(), ConflictResolution::RemoteWins),
        };

        self.record(
            path.to_string(),
            ConflictKind::ArrayDiverged,
            Some(Value::Array(local.to_vec())),
            Some(Value::Array(remote.to_vec())),
            Some(resolution),
        );
        Value::Array(merged)
    }

    fn merge_scalars(
        &mut self,
        path: &str,
        kind: ConflictKind,
        local: &Value,
        remote: &Value,
    ) -> Value {
        let side = self.pick(Side::Remote);
        let (value, resolution) = match side {
            Some(Side::Local) => (local.clone(), Some(ConflictResolution::LocalWins)),
            Some(Side::Remote) => (remote.clone(), Some(ConflictResolution::RemoteWins)),
            // Manual: keep the local value until the user decides
            None => (local.clone(), None),
        };

        self.record(
            path.to_string(),
            kind,
            Some(local.clone()),
            Some(remote.clone()),
            resolution,
        );
        value
    }

    /// Key removed locally but still present remotely.
    fn deleted_local(&mut self, path: String, remote: &Value) -> Option<Value> {
        let (value, resolution) = match self.pick(Side::Remote) {
            Some(Side::Remote) => (Some(remote.clone()), Some(ConflictResolution::RemoteWins)),
            Some(Side::Local) => (None, Some(ConflictResolution::KeepDeleted)),
            None => (None, None),
        };
        self.record(
            path,
            ConflictKind::DeletedLocal,
            None,
            Some(remote.clone()),
            resolution,
        );
        value
    }

    /// Key removed remotely but still present locally.
    fn deleted_remote(&mut self, path: String, local: &Value) -> Option<Value> {
        let (value, resolution) = match self.pick(Side::Local) {
            Some(Side::Local) => (Some(local.clone()), Some(ConflictResolution::LocalWins)),
            Some(Side::Remote) => (None, Some(ConflictResolution::KeepDeleted)),
            None => (Some(local.clone()), None),
        };
        self.record(
            path,
            ConflictKind::DeletedRemote,
            Some(local.clone()),
            None,
            resolution,
        );
        value
    }

    /// Pick the winning side for the configured strategy. `auto` is the side
    /// `Auto` favors for this kind of conflict; `None` means manual.
    fn pick(&self, auto: Side) -> Option<Side> {
        match self.config.strategy {
            ResolutionStrategy::LocalWins => Some(Side::Local),
            ResolutionStrategy::RemoteWins => Some(Side::Remote),
            ResolutionStrategy::MostRecent if self.local_is_newer => Some(Side::Local),
            ResolutionStrategy::MostRecent => Some(Side::Remote),
            ResolutionStrategy::Auto => Some(auto),
            ResolutionStrategy::Manual => None,
        }
    }

    fn record(
        &mut self,
        path: String,
        kind: ConflictKind,
        local_value: Option<Value>,
        remote_value: Option<Value>,
        resolution: Option<ConflictResolution>,
    ) {
        self.conflicts.push(ConflictRecord {
            path,
            kind,
            local_value,
            remote_value,
            resolution,
        });
    }
}
