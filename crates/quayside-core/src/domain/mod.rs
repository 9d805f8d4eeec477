//! Domain models for quayside.
//!
//! Canonical definitions for the core entities:
//! - `BuildOutput`: The static tree produced by the site build
//! - `Bundle`: One size-bounded slice of that tree
//! - `ArchiveHandle`: Reference to an uploaded, content-addressed archive
//! - `PublishState`: Lifecycle of a single publish

pub mod build_output;
pub mod bundle;
pub mod error;
pub mod state;

pub use build_output::{normalize_relative_path, BuildOutput};
pub use bundle::{framed_entry_size, ArchiveHandle, Bundle, BundleEntry, TAR_TRAILER};
pub use error::{ErrorKind, QuaysideError, Result};
pub use state::PublishState;
