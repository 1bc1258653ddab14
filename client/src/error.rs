//! Unified error handling for the sync client.

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::remote::StoreError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync manager is not initialized")]
    NotInitialized,

    #[error("encryption is enabled but no passphrase was supplied")]
    MissingPassphrase,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("integrity check failed for version {version}: expected hash {expected}, got {actual}")]
    Integrity {
        version: u64,
        expected: String,
        actual: String,
    },

    #[error("configuration is {size} bytes, exceeding the {max} byte limit")]
    SizeLimit { size: usize, max: usize },

    #[error("engine error: {0}")]
    Engine(#[from] confsync_engine::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_transient())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::SizeLimit { size: 10, max: 5 };
        assert_eq!(
            err.to_string(),
            "configuration is 10 bytes, exceeding the 5 byte limit"
        );

        let err = SyncError::Integrity {
            version: 3,
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.to_string().contains("version 3"));
    }

    #[test]
    fn transient_classification() {
        let err = SyncError::from(StoreError::Unavailable("timeout".into()));
        assert!(err.is_transient());

        let err = SyncError::from(StoreError::TooLarge { size: 2, max: 1 });
        assert!(!err.is_transient());
        assert!(!SyncError::NotInitialized.is_transient());
    }
}
