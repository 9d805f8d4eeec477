//! Error types for quayside-state

use thiserror::Error;

/// Errors returned by storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object or blob does not exist
    #[error("not found: {key}")]
    NotFound { key: String },

    /// Digest string is not 64 hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Backend could not be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A single operation exceeded its deadline
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Backend refused the write
    #[error("object rejected: {key}: {reason}")]
    Rejected { key: String, reason: String },

    /// Compare-and-swap on the publish pointer lost a race
    #[error("publish pointer for site '{site}' changed: expected {expected:?}, found {actual:?}")]
    PointerConflict {
        site: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Record could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_)
                | StorageError::Timeout { .. }
                | StorageError::Http(_)
                | StorageError::Io(_)
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StorageError::Timeout { elapsed_ms: 0 }
        } else {
            StorageError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(StorageError::Timeout { elapsed_ms: 10 }.is_transient());
        assert!(!StorageError::Rejected {
            key: "k".into(),
            reason: "denied".into()
        }
        .is_transient());
        assert!(!StorageError::PointerConflict {
            site: "s".into(),
            expected: None,
            actual: Some("deploy-live".into()),
        }
        .is_transient());
    }
}
