//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore`, `MemoryDestinationStore`,
//! `MemoryPublishPointer` and `MemoryInvalidator` that satisfy the trait
//! contracts without any external dependencies. Each fake can be told to fail
//! its next N calls so callers can exercise retry and failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Consume one injected failure, if any remain.
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
    put_failures: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `put` fail with `StorageError::Unavailable`.
    pub fn fail_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Number of `put` calls observed, including failed ones.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct objects stored.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.put_failures) {
            return Err(StorageError::Unavailable(
                "injected artifact store failure".to_string(),
            ));
        }
        let digest = ContentDigest::from_bytes(data);
        let mut store = self.store.lock().unwrap();
        store.insert(digest.as_str().to_string(), data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let store = self.store.lock().unwrap();
        store
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let store = self.store.lock().unwrap();
        Ok(store.contains_key(digest.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryDestinationStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: ObjectMetadata,
}

/// In-memory destination store backed by a `BTreeMap<key, object>`.
#[derive(Debug, Default)]
pub struct MemoryDestinationStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    put_failures: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `put_object` fail with `StorageError::Unavailable`.
    pub fn fail_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Number of `put_object` calls observed, including failed ones.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every object as `key -> bytes`.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }
}

#[async_trait]
impl DestinationStore for MemoryDestinationStore {
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.put_failures) {
            return Err(StorageError::Unavailable(
                "injected destination store failure".to_string(),
            ));
        }
        let mut objects = self.objects.lock().unwrap();
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(key).map(|o| o.metadata.clone()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }
}

// ---------------------------------------------------------------------------
// MemoryPublishPointer
// ---------------------------------------------------------------------------

/// In-memory publish pointer backed by a `HashMap<site, PublishRecord>`.
///
/// Counts successful writes so tests can assert that an activation is a
/// single pointer update.
#[derive(Debug, Default)]
pub struct MemoryPublishPointer {
    records: Mutex<HashMap<String, PublishRecord>>,
    writes: AtomicUsize,
    swap_failures: AtomicUsize,
}

impl MemoryPublishPointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` swaps fail with `StorageError::Unavailable`.
    pub fn fail_swaps(&self, n: usize) {
        self.swap_failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful pointer writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishPointer for MemoryPublishPointer {
    async fn current(&self, site: &str) -> StorageResult<Option<PublishRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.get(site).cloned())
    }

    async fn compare_and_swap(
        &self,
        site: &str,
        expected: Option<&str>,
        record: PublishRecord,
    ) -> StorageResult<PublishRecord> {
        if take_failure(&self.swap_failures) {
            return Err(StorageError::Unavailable(
                "injected pointer failure".to_string(),
            ));
        }
        let mut records = self.records.lock().unwrap();
        let actual = records.get(site).map(|r| r.deployment_id.clone());
        if actual.as_deref() != expected {
            return Err(StorageError::PointerConflict {
                site: site.to_string(),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        records.insert(site.to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// MemoryInvalidator
// ---------------------------------------------------------------------------

/// Records every invalidation request it receives.
#[derive(Debug, Default)]
pub struct MemoryInvalidator {
    requests: Mutex<Vec<(String, InvalidationRequest)>>,
    failures: AtomicUsize,
}

impl MemoryInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` invalidations fail with `StorageError::Unavailable`.
    pub fn fail_invalidations(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// All accepted requests as `(site, request)`, oldest first.
    pub fn requests(&self) -> Vec<(String, InvalidationRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheInvalidator for MemoryInvalidator {
    async fn invalidate(
        &self,
        site: &str,
        request: &InvalidationRequest,
    ) -> StorageResult<InvalidationReceipt> {
        if take_failure(&self.failures) {
            return Err(StorageError::Unavailable(
                "injected invalidation failure".to_string(),
            ));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push((site.to_string(), request.clone()));
        Ok(InvalidationReceipt {
            id: format!("mem-{}", requests.len()),
            requested_at: Utc::now(),
        })
    }
}
