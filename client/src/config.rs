//! Configuration management for the sync client.

use confsync_engine::{
    ArrayMergeStrategy, ResolutionStrategy, ResolverConfig, StateConfig, TrackerConfig,
    TrackingMode,
};
use std::env;
use std::path::PathBuf;

/// Default maximum serialized configuration size (5 MiB).
pub const DEFAULT_MAX_CONFIG_SIZE: usize = 5 * 1024 * 1024;

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of this device
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Encrypt documents before they leave the device
    pub encryption_enabled: bool,
    /// Largest serialized document accepted for upload
    pub max_config_size: usize,
    /// Where the offline change log is persisted, if anywhere
    pub offline_log_path: Option<PathBuf>,
    pub resolver: ResolverConfig,
    pub state: StateConfig,
    pub tracker: TrackerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: "unknown-device".to_string(),
            encryption_enabled: true,
            max_config_size: DEFAULT_MAX_CONFIG_SIZE,
            offline_log_path: None,
            resolver: ResolverConfig::default(),
            state: StateConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from `CONFSYNC_*` environment variables.
    ///
    /// A `.env` file is honored if present. Unset variables fall back to
    /// [`SyncConfig::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let device_id = env::var("CONFSYNC_DEVICE_ID").unwrap_or(defaults.device_id);
        let device_name = env::var("CONFSYNC_DEVICE_NAME").unwrap_or(defaults.device_name);

        let encryption_enabled =
            parse_var("CONFSYNC_ENCRYPTION", defaults.encryption_enabled, parse_bool)?;
        let max_config_size = parse_var("CONFSYNC_MAX_CONFIG_SIZE", defaults.max_config_size, |v| {
            v.parse().ok()
        })?;
        let offline_log_path = env::var("CONFSYNC_OFFLINE_LOG").ok().map(PathBuf::from);

        let resolver = ResolverConfig {
            strategy: parse_var("CONFSYNC_CONFLICT_STRATEGY", defaults.resolver.strategy, parse_strategy)?,
            array_merge: parse_var(
                "CONFSYNC_ARRAY_MERGE",
                defaults.resolver.array_merge,
                parse_array_merge,
            )?,
        };

        let state = StateConfig {
            max_queue_size: parse_var("CONFSYNC_MAX_QUEUE_SIZE", defaults.state.max_queue_size, |v| {
                v.parse().ok()
            })?,
            max_history: parse_var("CONFSYNC_MAX_HISTORY", defaults.state.max_history, |v| {
                v.parse().ok()
            })?,
            auto_process_queue: parse_var(
                "CONFSYNC_AUTO_PROCESS_QUEUE",
                defaults.state.auto_process_queue,
                parse_bool,
            )?,
        };

        let tracker = TrackerConfig {
            mode: parse_var("CONFSYNC_TRACKING_MODE", defaults.tracker.mode, parse_tracking_mode)?,
            max_changes: parse_var("CONFSYNC_MAX_CHANGES", defaults.tracker.max_changes, |v| {
                v.parse().ok()
            })?,
        };

        Ok(Self {
            device_id,
            device_name,
            encryption_enabled,
            max_config_size,
            offline_log_path,
            resolver,
            state,
            tracker,
        })
    }
}

fn parse_var<T>(name: &'static str, default: T, parse: impl Fn(&str) -> Option<T>) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse(raw.trim()).ok_or(ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_strategy(value: &str) -> Option<ResolutionStrategy> {
    match value.to_ascii_lowercase().replace('-', "_").as_str() {
        "local_wins" => Some(ResolutionStrategy::LocalWins),
        "remote_wins" => Some(ResolutionStrategy::RemoteWins),
        "most_recent" => Some(ResolutionStrategy::MostRecent),
        "auto" => Some(ResolutionStrategy::Auto),
        "manual" => Some(ResolutionStrategy::Manual),
        _ => None,
    }
}

fn parse_array_merge(value: &str) -> Option<ArrayMergeStrategy> {
    match value.to_ascii_lowercase().as_str() {
        "union" => Some(ArrayMergeStrategy::Union),
        "local" => Some(ArrayMergeStrategy::Local),
        "remote" => Some(ArrayMergeStrategy::Remote),
        _ => None,
    }
}

fn parse_tracking_mode(value: &str) -> Option<TrackingMode> {
    match value.to_ascii_lowercase().as_str() {
        "snapshot" => Some(TrackingMode::Snapshot),
        "granular" => Some(TrackingMode::Granular),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert!(config.encryption_enabled);
        assert_eq!(config.max_config_size, DEFAULT_MAX_CONFIG_SIZE);
        assert_eq!(config.resolver.strategy, ResolutionStrategy::Auto);
        assert!(config.state.auto_process_queue);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn parsers() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(
            parse_strategy("most-recent"),
            Some(ResolutionStrategy::MostRecent)
        );
        assert_eq!(parse_strategy("LOCAL_WINS"), Some(ResolutionStrategy::LocalWins));
        assert_eq!(parse_array_merge("remote"), Some(ArrayMergeStrategy::Remote));
        assert_eq!(parse_tracking_mode("granular"), Some(TrackingMode::Granular));
    }

    #[test]
    fn from_env_reads_overrides() {
        // Only this test touches these variables.
        env::set_var("CONFSYNC_MAX_QUEUE_SIZE", "7");
        env::set_var("CONFSYNC_CONFLICT_STRATEGY", "manual");
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.state.max_queue_size, 7);
        assert_eq!(config.resolver.strategy, ResolutionStrategy::Manual);

        env::set_var("CONFSYNC_MAX_QUEUE_SIZE", "lots");
        let err = SyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CONFSYNC_MAX_QUEUE_SIZE"));

        env::remove_var("CONFSYNC_MAX_QUEUE_SIZE");
        env::remove_var("CONFSYNC_CONFLICT_STRATEGY");
    }
}
