//! Storage trait definitions for Quayside
//!
//! These traits define the storage seams a deploy touches:
//! - `ArtifactStore`: Content-addressed archive storage (put/get by digest)
//! - `DestinationStore`: The object store the CDN reads from
//! - `PublishPointer`: The single mutable "what is live" record per site
//! - `CacheInvalidator`: The edge cache in front of the destination store
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module, filesystem backends via `fs`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ArtifactStore: Content-Addressed Archive Storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed archive store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
/// - Storing identical bytes twice keeps a single object.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes and return their content digest.
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `StorageError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;

    /// Backend-specific address of the object holding `digest`.
    fn storage_key(&self, digest: &ContentDigest) -> String {
        format!("artifacts/{}.tar.gz", digest.as_str())
    }
}

// ---------------------------------------------------------------------------
// DestinationStore: CDN Origin Objects
// ---------------------------------------------------------------------------

/// Per-object HTTP metadata honoured by the origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// `Content-Type` header
    pub content_type: Option<String>,
    /// `Cache-Control` header
    pub cache_control: Option<String>,
}

/// Join key segments with `/`, ignoring empty segments.
///
/// `object_key("sites/www", "deploy-live/index.html")` is
/// `"sites/www/deploy-live/index.html"`; an empty prefix yields the rest as-is.
pub fn object_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let rest = rest.trim_start_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, rest)
    }
}

/// Flat key/value object store read by the CDN.
///
/// Keys are forward-slash separated. `list` returns keys in lexicographic
/// order so callers observe a deterministic sequence.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Write (or overwrite) an object.
    async fn put_object(&self, key: &str, data: &[u8], metadata: &ObjectMetadata)
        -> StorageResult<()>;

    /// Read an object. Returns `StorageError::NotFound` if absent.
    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Metadata of an object, `None` if absent.
    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;
}

// ---------------------------------------------------------------------------
// PublishPointer: Live Read Path
// ---------------------------------------------------------------------------

/// The live pointer for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Site this record belongs to
    pub site: String,
    /// Deployment identity currently served
    pub deployment_id: String,
    /// Destination prefix the identity namespace lives under
    pub destination_prefix: String,
    /// Identity that was live before this one, kept for rollback
    pub previous: Option<String>,
    /// When the pointer was switched
    pub activated_at: DateTime<Utc>,
}

impl PublishRecord {
    /// The origin path readers are served from: `<prefix>/<deployment_id>`.
    pub fn origin_path(&self) -> String {
        object_key(&self.destination_prefix, &self.deployment_id)
    }
}

/// Single mutable record per site naming the active deployment.
///
/// Semantics:
/// - `compare_and_swap` replaces the record only when the currently stored
///   deployment id equals `expected` (`None` meaning "no record yet").
/// - The write is one indivisible update; readers observe either the old or
///   the new record, never a mix.
#[async_trait]
pub trait PublishPointer: Send + Sync {
    /// Current record for a site, if any.
    async fn current(&self, site: &str) -> StorageResult<Option<PublishRecord>>;

    /// Atomically replace the record if it still names `expected`.
    ///
    /// Returns `StorageError::PointerConflict` when another writer got there
    /// first.
    async fn compare_and_swap(
        &self,
        site: &str,
        expected: Option<&str>,
        record: PublishRecord,
    ) -> StorageResult<PublishRecord>;
}

// ---------------------------------------------------------------------------
// CacheInvalidator: Edge Cache
// ---------------------------------------------------------------------------

/// Request to discard cached responses for a set of path patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    /// Path patterns, e.g. `/*`
    pub paths: BTreeSet<String>,
    /// Idempotency token for the CDN API
    pub caller_reference: String,
}

impl InvalidationRequest {
    /// Invalidate every path (`/*`).
    pub fn all_paths(caller_reference: impl Into<String>) -> Self {
        let mut paths = BTreeSet::new();
        paths.insert("/*".to_string());
        Self {
            paths,
            caller_reference: caller_reference.into(),
        }
    }
}

/// Acknowledgement returned by the CDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReceipt {
    /// CDN-assigned invalidation id
    pub id: String,
    /// When the request was accepted
    pub requested_at: DateTime<Utc>,
}

/// Edge cache invalidation.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Issue one invalidation for `site`.
    async fn invalidate(
        &self,
        site: &str,
        request: &InvalidationRequest,
    ) -> StorageResult<InvalidationReceipt>;
}
