//! The file tree produced by a site build.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::domain::error::{QuaysideError, Result};

/// Validate and normalize a build-output path.
///
/// Accepts `\` or `/` separators, strips a leading `./`, and rejects empty,
/// absolute and `..`-containing paths.
pub fn normalize_relative_path(raw: &str) -> Result<String> {
    let invalid = |reason: &str| QuaysideError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid("'..' segments are not allowed")),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(segments.join("/"))
}

/// An immutable `relative path → bytes` tree.
///
/// Entries are kept in lexicographic path order, which is the order the
/// bundler packs them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    entries: BTreeMap<String, Vec<u8>>,
}

impl BuildOutput {
    /// Build a tree from in-memory entries. Paths are normalized; a duplicate
    /// path after normalization keeps the last content.
    pub fn from_entries<I, P>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, Vec<u8>)>,
        P: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (path, content) in entries {
            map.insert(normalize_relative_path(path.as_ref())?, content);
        }
        Ok(Self { entries: map })
    }

    /// Read every regular file under `root`.
    ///
    /// Fails with `BuildOutputMissing` if `root` is not a directory and
    /// `BuildOutputEmpty` if it holds no files. Symlinks are not followed.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(QuaysideError::BuildOutputMissing {
                path: root.to_path_buf(),
            });
        }

        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| QuaysideError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_to(root, entry.path())?;
            let content = std::fs::read(entry.path())?;
            entries.insert(rel, content);
        }

        if entries.is_empty() {
            return Err(QuaysideError::BuildOutputEmpty {
                path: root.to_path_buf(),
            });
        }
        debug!(root = %root.display(), files = entries.len(), "loaded build output");
        Ok(Self { entries })
    }

    /// Entries in lexicographic path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all content lengths.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|c| c.len() as u64).sum()
    }
}

fn relative_to(root: &Path, path: &Path) -> Result<String> {
    let rel: PathBuf = path
        .strip_prefix(root)
        .map_err(|_| QuaysideError::InvalidPath {
            path: path.display().to_string(),
            reason: "outside build root".to_string(),
        })?
        .to_path_buf();
    let joined = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    normalize_relative_path(&joined)
}
