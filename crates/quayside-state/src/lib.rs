//! Quayside-State: storage backends for Quayside
//!
//! This crate owns every piece of state a deploy reads or writes outside the
//! process: archived bundles, the objects a CDN serves, the pointer naming the
//! live deployment and the cache in front of it.
//!
//! ## Key Components
//!
//! - `ArtifactStore`: content-addressed archive storage
//! - `DestinationStore`: origin objects under `<prefix>/<deployment>/<path>`
//! - `PublishPointer`: compare-and-swap record of the live deployment
//! - `CacheInvalidator`: edge cache invalidation
//!
//! In-memory fakes live in [`fakes`], filesystem backends in [`fs`] and an
//! HTTP invalidation client in [`http`].

mod error;
pub mod fakes;
pub mod fs;
pub mod http;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::{FsArtifactStore, FsDestinationStore, FsInvalidationLog, FsPublishPointer};
pub use http::{HttpInvalidator, HttpInvalidatorConfig};
pub use storage_traits::{
    object_key, ArtifactStore, CacheInvalidator, ContentDigest, DestinationStore,
    InvalidationReceipt, InvalidationRequest, ObjectMetadata, PublishPointer, PublishRecord,
    StorageResult,
};
