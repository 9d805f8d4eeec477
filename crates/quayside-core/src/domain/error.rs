//! Domain-level error taxonomy for Quayside.

use std::path::PathBuf;

use quayside_state::StorageError;

use crate::domain::state::PublishState;

/// Coarse classification callers use to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; fix it and run again.
    Input,
    /// Network or storage hiccup; retried internally with backoff.
    TransientIo,
    /// Another deploy for the same site is in flight.
    StateConflict,
    /// The publish pipeline stopped part way.
    DeployFailed,
    /// Anything else.
    Internal,
}

/// Quayside domain errors.
#[derive(Debug, thiserror::Error)]
pub enum QuaysideError {
    #[error("build output not found: {}", path.display())]
    BuildOutputMissing { path: PathBuf },

    #[error("build output is empty: {}", path.display())]
    BuildOutputEmpty { path: PathBuf },

    #[error("invalid build output path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("invalid environment variable name '{0}'")]
    InvalidEnvName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("build command `{command}` failed: {status}")]
    BuildFailed { command: String, status: String },

    #[error("archive handles out of order: expected bundle {expected}, got {actual}")]
    BundleOrder { expected: usize, actual: usize },

    #[error("upload of bundle {bundle_index} failed after {attempts} attempt(s): {reason}")]
    UploadFailed {
        bundle_index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("staging '{key}' failed after {attempts} attempt(s): {reason}")]
    StagingFailed {
        key: String,
        attempts: u32,
        reason: String,
    },

    #[error("digest mismatch for {key}: expected {expected}, got {actual}")]
    DigestMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("state conflict for site '{site}': {reason}")]
    StateConflict { site: String, reason: String },

    #[error("deploy of site '{site}' failed in state {state}: {source}")]
    DeployFailed {
        site: String,
        state: PublishState,
        #[source]
        source: Box<QuaysideError>,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuaysideError {
    /// Classify this error per the deploy error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuaysideError::BuildOutputMissing { .. }
            | QuaysideError::BuildOutputEmpty { .. }
            | QuaysideError::InvalidPath { .. }
            | QuaysideError::InvalidGlob { .. }
            | QuaysideError::InvalidEnvName(_)
            | QuaysideError::InvalidConfig(_)
            | QuaysideError::BuildFailed { .. }
            | QuaysideError::BundleOrder { .. } => ErrorKind::Input,
            QuaysideError::UploadFailed { .. } | QuaysideError::StagingFailed { .. } => {
                ErrorKind::TransientIo
            }
            QuaysideError::StateConflict { .. } => ErrorKind::StateConflict,
            QuaysideError::DeployFailed { .. } => ErrorKind::DeployFailed,
            QuaysideError::Storage(e) if e.is_transient() => ErrorKind::TransientIo,
            QuaysideError::Storage(StorageError::PointerConflict { .. }) => {
                ErrorKind::StateConflict
            }
            _ => ErrorKind::Internal,
        }
    }

    /// The pipeline state carried by a `DeployFailed`, if any.
    pub fn failed_state(&self) -> Option<PublishState> {
        match self {
            QuaysideError::DeployFailed { state, .. } => Some(*state),
            _ => None,
        }
    }
}

/// Result type for Quayside domain operations.
pub type Result<T> = std::result::Result<T, QuaysideError>;
