//! Filesystem-backed storage.
//!
//! Used by the CLI for local targets and by integration tests. Every write
//! goes through a temp file in the destination directory followed by a
//! rename, so a reader never observes a half-written object or pointer.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::storage_traits::*;

fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| StorageError::Rejected {
        key: path.display().to_string(),
        reason: "path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn not_found(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            key: key.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

/// Reject keys that would escape the store root.
fn checked_relative(key: &str) -> StorageResult<PathBuf> {
    let path = Path::new(key);
    let clean = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(StorageError::Rejected {
            key: key.to_string(),
            reason: "key must be a relative path without '..'".to_string(),
        });
    }
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// FsArtifactStore
// ---------------------------------------------------------------------------

/// Filesystem-backed content-addressed store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
pub struct FsArtifactStore {
    objects_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create a new `FsArtifactStore` rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            return Ok(digest);
        }

        write_atomic(&path, data)?;
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|e| not_found(digest.as_str(), e))
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        Ok(self.blob_path(digest).exists())
    }

    fn storage_key(&self, digest: &ContentDigest) -> String {
        self.blob_path(digest).display().to_string()
    }
}

// ---------------------------------------------------------------------------
// FsDestinationStore
// ---------------------------------------------------------------------------

/// Filesystem destination store.
///
/// Layout: `<root>/objects/<key>` holds the bytes and
/// `<root>/metadata/<key>.json` the [`ObjectMetadata`] sidecar.
pub struct FsDestinationStore {
    objects_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl FsDestinationStore {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        let metadata_dir = root.as_ref().join("metadata");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&metadata_dir)?;
        Ok(Self {
            objects_dir,
            metadata_dir,
        })
    }

    /// Path of the object file for `key` (readers serve from here).
    pub fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.objects_dir.join(checked_relative(key)?))
    }

    fn metadata_path(&self, key: &str) -> StorageResult<PathBuf> {
        let rel = checked_relative(key)?;
        let mut name = rel.into_os_string();
        name.push(".json");
        Ok(self.metadata_dir.join(name))
    }
}

#[async_trait]
impl DestinationStore for FsDestinationStore {
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        let meta = serde_json::to_vec(metadata)?;
        write_atomic(&self.metadata_path(key)?, &meta)?;
        write_atomic(&self.object_path(key)?, data)
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        fs::read(self.object_path(key)?).map_err(|e| not_found(key, e))
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        if !self.object_path(key)?.exists() {
            return Ok(None);
        }
        match fs::read(self.metadata_path(key)?) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Some(ObjectMetadata::default()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.objects_dir).follow_links(false) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.objects_dir) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            fs::remove_file(self.object_path(key)?)?;
            match fs::remove_file(self.metadata_path(key)?) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(keys.len())
    }
}

// ---------------------------------------------------------------------------
// FsPublishPointer
// ---------------------------------------------------------------------------

/// Publish pointer stored as `<root>/pointers/<site>.json`.
///
/// The compare-and-swap is serialized within this process; the swap itself
/// is a single rename.
pub struct FsPublishPointer {
    pointers_dir: PathBuf,
    guard: Mutex<()>,
}

impl FsPublishPointer {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let pointers_dir = root.as_ref().join("pointers");
        fs::create_dir_all(&pointers_dir)?;
        Ok(Self {
            pointers_dir,
            guard: Mutex::new(()),
        })
    }

    fn pointer_path(&self, site: &str) -> StorageResult<PathBuf> {
        if site.is_empty() || site.contains(['/', '\\']) || site.starts_with('.') {
            return Err(StorageError::Rejected {
                key: site.to_string(),
                reason: "site name must be a single path segment".to_string(),
            });
        }
        Ok(self.pointers_dir.join(format!("{}.json", site)))
    }

    fn read(&self, site: &str) -> StorageResult<Option<PublishRecord>> {
        match fs::read(self.pointer_path(site)?) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl PublishPointer for FsPublishPointer {
    async fn current(&self, site: &str) -> StorageResult<Option<PublishRecord>> {
        self.read(site)
    }

    async fn compare_and_swap(
        &self,
        site: &str,
        expected: Option<&str>,
        record: PublishRecord,
    ) -> StorageResult<PublishRecord> {
        let _held = self
            .guard
            .lock()
            .map_err(|_| StorageError::Unavailable("pointer lock poisoned".to_string()))?;
        let actual = self.read(site)?.map(|r| r.deployment_id);
        if actual.as_deref() != expected {
            return Err(StorageError::PointerConflict {
                site: site.to_string(),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        let bytes = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.pointer_path(site)?, &bytes)?;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// FsInvalidationLog
// ---------------------------------------------------------------------------

/// One line of the invalidation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationLogEntry {
    pub id: String,
    pub site: String,
    pub request: InvalidationRequest,
    pub requested_at: chrono::DateTime<Utc>,
}

/// Appends invalidation requests to `<root>/invalidations.jsonl`.
///
/// Stands in for a CDN when publishing to a local directory.
pub struct FsInvalidationLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FsInvalidationLog {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            path: root.as_ref().join("invalidations.jsonl"),
            guard: Mutex::new(()),
        })
    }

    /// Read back every logged entry, oldest first.
    pub fn entries(&self) -> StorageResult<Vec<InvalidationLogEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl CacheInvalidator for FsInvalidationLog {
    async fn invalidate(
        &self,
        site: &str,
        request: &InvalidationRequest,
    ) -> StorageResult<InvalidationReceipt> {
        let entry = InvalidationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            site: site.to_string(),
            request: request.clone(),
            requested_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _held = self
            .guard
            .lock()
            .map_err(|_| StorageError::Unavailable("log lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;

        Ok(InvalidationReceipt {
            id: entry.id,
            requested_at: entry.requested_at,
        })
    }
}
