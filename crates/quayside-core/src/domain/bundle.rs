//! Bundles and the handles produced by uploading them.

use quayside_state::ContentDigest;
use serde::{Deserialize, Serialize};

const BLOCK: u64 = 512;

/// Longest path a GNU header stores inline; longer ones get a long-name entry.
const GNU_NAME_LEN: usize = 100;

/// The two zero blocks closing every tar stream.
pub const TAR_TRAILER: u64 = 2 * BLOCK;

fn padded(len: u64) -> u64 {
    len.div_ceil(BLOCK) * BLOCK
}

/// Bytes a tar stream spends on one entry: a 512-byte header plus the content
/// rounded up to the next 512-byte block. Paths over 100 bytes are preceded
/// by a GNU long-name entry holding the NUL-terminated path.
pub fn framed_entry_size(path: &str, content_len: u64) -> u64 {
    let long_name = if path.len() > GNU_NAME_LEN {
        BLOCK + padded(path.len() as u64 + 1)
    } else {
        0
    };
    long_name + BLOCK + padded(content_len)
}

/// One file inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: String,
    pub content: Vec<u8>,
}

/// A numbered, size-bounded slice of the build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Position in the bundle sequence, starting at 0.
    pub index: usize,
    /// Files in lexicographic path order.
    pub entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Size of the uncompressed tar stream for this bundle, trailer included.
    pub fn framed_size(&self) -> u64 {
        TAR_TRAILER
            + self
                .entries
                .iter()
                .map(|e| framed_entry_size(&e.path, e.content.len() as u64))
                .sum::<u64>()
    }

    /// Paths in this bundle, in order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }
}

/// Result of uploading one bundle. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHandle {
    pub bundle_index: usize,
    pub storage_key: String,
    pub fingerprint: ContentDigest,
}
