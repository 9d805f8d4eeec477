//! Staging markers.
//!
//! A marker at `<prefix>/.deployments/<identity>.json` is written once a
//! namespace is fully staged and substituted. Its presence, with matching
//! fingerprints and rules digest, means the namespace can be reused as-is.

use chrono::{DateTime, Utc};
use quayside_state::{object_key, ContentDigest};
use serde::{Deserialize, Serialize};

/// Directory, relative to the destination prefix, holding markers.
pub const MARKER_DIR: &str = ".deployments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingMarker {
    /// Site that staged the namespace. Only that site may reuse or remove it.
    #[serde(default)]
    pub site: String,
    pub deployment_id: String,
    pub fingerprints: Vec<ContentDigest>,
    pub rules_digest: String,
    pub objects: usize,
    pub staged_at: DateTime<Utc>,
}

impl StagingMarker {
    /// Whether `site` may reuse, restage or remove this namespace. Markers
    /// written without a site are unclaimed.
    pub fn owned_by(&self, site: &str) -> bool {
        self.site.is_empty() || self.site == site
    }

    /// Whether this marker describes the same content and substitutions.
    pub fn covers(&self, fingerprints: &[ContentDigest], rules_digest: &str) -> bool {
        self.fingerprints == fingerprints && self.rules_digest == rules_digest
    }
}

/// Key of the marker for `deployment_id` under `prefix`.
pub fn marker_key(prefix: &str, deployment_id: &str) -> String {
    object_key(prefix, &format!("{}/{}.json", MARKER_DIR, deployment_id))
}

/// Key prefix that selects exactly the objects of one namespace.
pub fn namespace_prefix(prefix: &str, deployment_id: &str) -> String {
    format!("{}/", object_key(prefix, deployment_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sit_beside_namespaces() {
        assert_eq!(
            marker_key("sites/www", "deploy-abc"),
            "sites/www/.deployments/deploy-abc.json"
        );
        assert_eq!(marker_key("", "deploy-live"), ".deployments/deploy-live.json");
        assert_eq!(namespace_prefix("sites/www/", "deploy-abc"), "sites/www/deploy-abc/");
    }

    #[test]
    fn covers_requires_same_fingerprints_and_rules() {
        let a = ContentDigest::from_bytes(b"a");
        let b = ContentDigest::from_bytes(b"b");
        let marker = StagingMarker {
            site: "www".to_string(),
            deployment_id: "deploy-x".to_string(),
            fingerprints: vec![a.clone(), b.clone()],
            rules_digest: "r1".to_string(),
            objects: 3,
            staged_at: Utc::now(),
        };
        assert!(marker.covers(&[a.clone(), b.clone()], "r1"));
        assert!(!marker.covers(&[b.clone(), a.clone()], "r1"));
        assert!(!marker.covers(&[a, b], "r2"));
    }

    #[test]
    fn ownership_follows_the_recorded_site() {
        let json = r#"{"deployment_id":"deploy-x","fingerprints":[],"rules_digest":"r",
            "objects":0,"staged_at":"2024-01-01T00:00:00Z"}"#;
        let unclaimed: StagingMarker = serde_json::from_str(json).unwrap();
        assert!(unclaimed.owned_by("www"));

        let claimed = StagingMarker {
            site: "docs".to_string(),
            ..unclaimed
        };
        assert!(claimed.owned_by("docs"));
        assert!(!claimed.owned_by("www"));
    }
}
