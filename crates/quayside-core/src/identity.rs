//! Deployment Identity Resolver.
//!
//! Derives one stable identity from the ordered archive fingerprints, so
//! identical build outputs always map to the same destination namespace.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{ArchiveHandle, QuaysideError, Result};

/// Identity used by every development deployment.
pub const SENTINEL: &str = "deploy-live";

const PREFIX: &str = "deploy-";

/// Name of a deployment namespace inside the destination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentIdentity(String);

impl DeploymentIdentity {
    /// The fixed development identity.
    pub fn sentinel() -> Self {
        Self(SENTINEL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL
    }
}

impl fmt::Display for DeploymentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a namespace name has the shape of a deployment identity.
pub fn is_deployment_namespace(name: &str) -> bool {
    name.strip_prefix(PREFIX).map_or(false, |rest| !rest.is_empty())
}

/// Handles must be sorted by bundle index and contiguous from zero.
pub fn check_order(handles: &[ArchiveHandle]) -> Result<()> {
    for (expected, handle) in handles.iter().enumerate() {
        if handle.bundle_index != expected {
            return Err(QuaysideError::BundleOrder {
                expected,
                actual: handle.bundle_index,
            });
        }
    }
    Ok(())
}

/// Resolve the identity for a set of uploaded archives.
///
/// Handles must be sorted by bundle index and contiguous from zero. In dev
/// mode the sentinel is returned regardless of content.
pub fn resolve(handles: &[ArchiveHandle], dev_mode: bool) -> Result<DeploymentIdentity> {
    check_order(handles)?;
    if dev_mode {
        return Ok(DeploymentIdentity::sentinel());
    }
    if handles.is_empty() {
        return Err(QuaysideError::InvalidConfig(
            "cannot derive a deployment identity without archives".to_string(),
        ));
    }

    let mut hasher = Sha256::new();
    for handle in handles {
        hasher.update(handle.fingerprint.as_str().as_bytes());
    }
    Ok(DeploymentIdentity(format!(
        "{}{}",
        PREFIX,
        hex::encode(hasher.finalize())
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_state::ContentDigest;

    fn handle(index: usize, body: &str) -> ArchiveHandle {
        let fingerprint = ContentDigest::from_bytes(body.as_bytes());
        ArchiveHandle {
            bundle_index: index,
            storage_key: format!("artifacts/{}.tar.gz", fingerprint),
            fingerprint,
        }
    }

    #[test]
    fn same_fingerprints_resolve_to_same_identity() {
        let a = resolve(&[handle(0, "a"), handle(1, "b")], false).unwrap();
        let b = resolve(&[handle(0, "a"), handle(1, "b")], false).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("deploy-"));
        assert_eq!(a.as_str().len(), "deploy-".len() + 64);
        assert!(!a.is_sentinel());
    }

    #[test]
    fn any_fingerprint_change_changes_identity() {
        let a = resolve(&[handle(0, "a"), handle(1, "b")], false).unwrap();
        let b = resolve(&[handle(0, "a"), handle(1, "c")], false).unwrap();
        let c = resolve(&[handle(0, "b"), handle(1, "a")], false).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dev_mode_returns_sentinel() {
        let id = resolve(&[handle(0, "a")], true).unwrap();
        assert_eq!(id.as_str(), SENTINEL);
        assert!(id.is_sentinel());
    }

    #[test]
    fn out_of_order_handles_are_rejected() {
        let err = resolve(&[handle(1, "a"), handle(0, "b")], false).unwrap_err();
        assert!(matches!(
            err,
            QuaysideError::BundleOrder {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[test]
    fn namespace_shape() {
        assert!(is_deployment_namespace(SENTINEL));
        assert!(is_deployment_namespace("deploy-0a1b"));
        assert!(!is_deployment_namespace("deploy-"));
        assert!(!is_deployment_namespace("assets"));
    }

    #[test]
    fn empty_handles_are_rejected_outside_dev_mode() {
        assert!(resolve(&[], false).is_err());
        assert!(resolve(&[], true).unwrap().is_sentinel());
    }
}
