//! Deterministic gzip-compressed tar encoding for bundles.
//!
//! Headers carry fixed ownership, mode and mtime so that identical bundles
//! serialize to identical bytes on every machine, which is what makes the
//! archive fingerprint usable as a content address.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use tar::{Builder, EntryType, Header};

use crate::domain::bundle::Bundle;
use crate::domain::{normalize_relative_path, QuaysideError, Result};

fn archive_err(e: std::io::Error) -> QuaysideError {
    QuaysideError::Archive(e.to_string())
}

fn create_deterministic_tar<W: Write>(writer: W) -> Builder<GzEncoder<W>> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(writer, Compression::default());

    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);
    tar
}

fn write_entry<T: Write>(tar: &mut Builder<T>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_username("quayside").map_err(archive_err)?;
    header.set_groupname("quayside").map_err(archive_err)?;

    // append_data writes a long-name extension for paths over 100 bytes.
    tar.append_data(&mut header, path, data).map_err(archive_err)?;
    Ok(())
}

/// Serialize a bundle to `.tar.gz` bytes.
pub fn encode(bundle: &Bundle) -> Result<Vec<u8>> {
    let mut tar = create_deterministic_tar(Vec::new());
    for entry in &bundle.entries {
        write_entry(&mut tar, &entry.path, &entry.content)?;
    }
    let encoder = tar.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)
}

/// Decode `.tar.gz` bytes into `(path, content)` pairs in archive order.
///
/// Non-file entries are skipped; paths that would escape the destination
/// namespace are rejected.
pub fn unpack(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut files = Vec::new();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path().map_err(archive_err)?.to_string_lossy().into_owned();
        let path = normalize_relative_path(&raw)?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content).map_err(archive_err)?;
        files.push((path, content));
    }
    Ok(files)
}
