//! Artifact Store Client: uploads bundles as immutable, content-addressed
//! archives.
//!
//! The fingerprint is the SHA-256 of the serialized archive bytes. An archive
//! the store already holds is reused instead of written again. A failed upload
//! never yields a handle.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use quayside_state::{ArtifactStore, ContentDigest};
use tracing::debug;

use crate::archive;
use crate::domain::{ArchiveHandle, Bundle, QuaysideError, Result};
use crate::metrics::METRICS;
use crate::obs::emit_bundle_uploaded;
use crate::retry::{retry_transient, RetryPolicy};

/// Default number of bundles uploaded at once.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Uploads bundles with bounded concurrency and transient-failure retries.
pub struct ArtifactUploader {
    store: Arc<dyn ArtifactStore>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ArtifactStore>, policy: RetryPolicy, concurrency: usize) -> Self {
        Self {
            store,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Fingerprint a bundle without uploading it.
    pub fn fingerprint(bundle: &Bundle) -> Result<ContentDigest> {
        Ok(ContentDigest::from_bytes(&archive::encode(bundle)?))
    }

    /// Upload one bundle.
    pub async fn upload(&self, bundle: &Bundle) -> Result<ArchiveHandle> {
        let bytes = archive::encode(bundle)?;
        let fingerprint = ContentDigest::from_bytes(&bytes);
        let upload_failed = |attempts: u32, reason: String| QuaysideError::UploadFailed {
            bundle_index: bundle.index,
            attempts,
            reason,
        };

        let operation = format!("upload bundle {}", bundle.index);
        let present = retry_transient(&self.policy, &operation, || {
            self.store.contains(&fingerprint)
        })
        .await
        .map_err(|e| upload_failed(e.attempts, e.error.to_string()))?;

        if present {
            METRICS.inc_uploads_reused();
            debug!(bundle_index = bundle.index, fingerprint = %fingerprint.short(), "archive already stored");
        } else {
            let stored = retry_transient(&self.policy, &operation, || self.store.put(&bytes))
                .await
                .map_err(|e| upload_failed(e.attempts, e.error.to_string()))?;
            if stored != fingerprint {
                return Err(QuaysideError::DigestMismatch {
                    key: self.store.storage_key(&fingerprint),
                    expected: fingerprint.to_string(),
                    actual: stored.to_string(),
                });
            }
            METRICS.inc_bundles_uploaded();
        }

        emit_bundle_uploaded(bundle.index, fingerprint.as_str(), present);
        Ok(ArchiveHandle {
            bundle_index: bundle.index,
            storage_key: self.store.storage_key(&fingerprint),
            fingerprint,
        })
    }

    /// Upload every bundle, at most `concurrency` at a time.
    ///
    /// Returns only once all uploads finished, with handles sorted by bundle
    /// index. The first failure cancels the uploads still in flight.
    pub async fn upload_all(&self, bundles: &[Bundle]) -> Result<Vec<ArchiveHandle>> {
        let mut handles: Vec<ArchiveHandle> = stream::iter(bundles)
            .map(|bundle| self.upload(bundle))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        handles.sort_by_key(|h| h.bundle_index);
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BundleEntry;
    use quayside_state::fakes::MemoryArtifactStore;

    fn bundle(index: usize, body: &str) -> Bundle {
        Bundle {
            index,
            entries: vec![BundleEntry {
                path: format!("file{}.js", index),
                content: body.as_bytes().to_vec(),
            }],
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1,
            max_backoff_ms: 10,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn upload_is_idempotent() {
        let store = Arc::new(MemoryArtifactStore::new());
        let uploader = ArtifactUploader::new(store.clone(), policy(), 2);
        let b = bundle(0, "same");

        let h1 = uploader.upload(&b).await.unwrap();
        let h2 = uploader.upload(&b).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_calls(), 1);
        assert_eq!(h1.fingerprint, ArtifactUploader::fingerprint(&b).unwrap());
    }

    #[tokio::test]
    async fn upload_all_returns_handles_in_index_order() {
        let store = Arc::new(MemoryArtifactStore::new());
        let uploader = ArtifactUploader::new(store, policy(), 3);
        let bundles: Vec<Bundle> = (0..7).map(|i| bundle(i, &format!("body {i}"))).collect();

        let handles = uploader.upload_all(&bundles).await.unwrap();
        let indices: Vec<usize> = handles.iter().map(|h| h.bundle_index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.fail_puts(2);
        let uploader = ArtifactUploader::new(store.clone(), policy(), 1);

        uploader.upload(&bundle(0, "x")).await.unwrap();
        assert_eq!(store.put_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_without_a_handle() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.fail_puts(10);
        let uploader = ArtifactUploader::new(store.clone(), policy(), 1);

        let err = uploader.upload(&bundle(1, "x")).await.unwrap_err();
        match err {
            QuaysideError::UploadFailed {
                bundle_index,
                attempts,
                ..
            } => {
                assert_eq!(bundle_index, 1);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected UploadFailed, got {other:?}"),
        }
        assert!(store.is_empty());
    }
}
