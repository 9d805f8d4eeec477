//! Splits a build output into size-bounded bundles.
//!
//! Entries are packed greedily in lexicographic path order: an entry joins the
//! open bundle unless that would push the bundle's framed size past the limit,
//! in which case the bundle is closed and a new one started. An entry larger
//! than the limit still gets a bundle of its own. Nothing here depends on
//! filesystem order, clocks or randomness, so the same tree and limit always
//! produce the same bundles.

use std::path::PathBuf;

use tracing::debug;

use crate::domain::bundle::{framed_entry_size, Bundle, BundleEntry, TAR_TRAILER};
use crate::domain::{BuildOutput, QuaysideError, Result};

/// Default bundle size limit (200 MiB).
pub const DEFAULT_BUNDLE_SIZE_LIMIT: u64 = 200 * 1024 * 1024;

/// Greedy packing plan over `(path, content length)` pairs.
///
/// Returns, per bundle, the indices into `entries` it holds. `entries` must
/// already be in packing order. Each bundle's budget starts with the tar
/// trailer, so the limit bounds the whole uncompressed stream.
pub fn plan_bundles(entries: &[(&str, u64)], size_limit: u64) -> Vec<Vec<usize>> {
    let mut plan: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = TAR_TRAILER;

    for (i, &(path, len)) in entries.iter().enumerate() {
        let framed = framed_entry_size(path, len);
        if !current.is_empty() && current_size.saturating_add(framed) > size_limit {
            plan.push(std::mem::take(&mut current));
            current_size = TAR_TRAILER;
        }
        current.push(i);
        current_size = current_size.saturating_add(framed);
    }
    if !current.is_empty() {
        plan.push(current);
    }
    plan
}

/// Split `tree` into bundles numbered `0..n`.
pub fn split(tree: &BuildOutput, size_limit: u64) -> Result<Vec<Bundle>> {
    if size_limit == 0 {
        return Err(QuaysideError::InvalidConfig(
            "bundle size limit must be greater than zero".to_string(),
        ));
    }
    if tree.is_empty() {
        return Err(QuaysideError::BuildOutputEmpty {
            path: PathBuf::new(),
        });
    }

    let files: Vec<(&str, &[u8])> = tree.iter().collect();
    let sizes: Vec<(&str, u64)> = files.iter().map(|(p, c)| (*p, c.len() as u64)).collect();

    let bundles: Vec<Bundle> = plan_bundles(&sizes, size_limit)
        .into_iter()
        .enumerate()
        .map(|(index, members)| Bundle {
            index,
            entries: members
                .into_iter()
                .map(|i| BundleEntry {
                    path: files[i].0.to_string(),
                    content: files[i].1.to_vec(),
                })
                .collect(),
        })
        .collect();

    debug!(
        files = files.len(),
        bundles = bundles.len(),
        size_limit,
        "split build output"
    );
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn tree(files: &[(&str, usize)]) -> BuildOutput {
        BuildOutput::from_entries(files.iter().map(|(p, n)| (*p, vec![b'x'; *n]))).unwrap()
    }

    #[test]
    fn greedy_plan_matches_published_scenario() {
        // a.js 50MB, b.js 180MB, index.html 1KB against a 200MB limit.
        let plan = plan_bundles(
            &[("a.js", 50 * MB), ("b.js", 180 * MB), ("index.html", 1024)],
            200 * MB,
        );
        assert_eq!(plan, vec![vec![0], vec![1, 2]]);
    }

    #[test]
    fn oversized_entry_gets_its_own_bundle() {
        let plan = plan_bundles(&[("a", 10), ("b", 5000), ("c", 10)], 3072);
        assert_eq!(plan, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn oversized_first_entry_closes_immediately() {
        let plan = plan_bundles(&[("a", 5000), ("b", 10), ("c", 10)], 3072);
        assert_eq!(plan, vec![vec![0], vec![1, 2]]);
    }

    #[test]
    fn everything_fits_in_one_bundle() {
        let plan = plan_bundles(&[("a", 1), ("b", 2), ("c", 3)], 10 * MB);
        assert_eq!(plan, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn long_paths_count_against_the_limit() {
        // Two short entries fit in 1024 + 2 * 1024; a 120-byte path adds 1024.
        let long = format!("{}.js", "d/".repeat(60));
        assert_eq!(plan_bundles(&[("a.js", 10), ("b.js", 10)], 3072), vec![vec![0, 1]]);
        assert_eq!(
            plan_bundles(&[("a.js", 10), (long.as_str(), 10)], 3072),
            vec![vec![0], vec![1]]
        );
    }

    #[test]
    fn split_numbers_bundles_contiguously() {
        let t = tree(&[("a.js", 600), ("b.js", 600), ("c.js", 600), ("d.js", 600)]);
        // Each framed entry is 1536 bytes; two fit beside the trailer in 4096.
        let bundles = split(&t, 4096).unwrap();
        assert_eq!(bundles.len(), 2);
        for (i, b) in bundles.iter().enumerate() {
            assert_eq!(b.index, i);
            assert!(b.framed_size() <= 4096);
        }
        assert_eq!(bundles[0].paths(), vec!["a.js", "b.js"]);
        assert_eq!(bundles[1].paths(), vec!["c.js", "d.js"]);
    }

    #[test]
    fn split_is_deterministic() {
        let t = tree(&[("z.css", 700), ("a/b.js", 3000), ("index.html", 10)]);
        assert_eq!(split(&t, 2048).unwrap(), split(&t, 2048).unwrap());
    }

    #[test]
    fn split_covers_every_entry_exactly_once() {
        let files: Vec<(String, usize)> =
            (0..37).map(|i| (format!("f{:02}.js", i), (i * 131) % 2000)).collect();
        let t = BuildOutput::from_entries(files.iter().map(|(p, n)| (p.as_str(), vec![1u8; *n])))
            .unwrap();
        for limit in [512u64, 2048, 8192, 1 << 20] {
            let bundles = split(&t, limit).unwrap();
            let mut seen: Vec<&str> = bundles
                .iter()
                .flat_map(|b| b.entries.iter().map(|e| e.path.as_str()))
                .collect();
            let expected: Vec<&str> = t.iter().map(|(p, _)| p).collect();
            assert_eq!(seen, expected, "order preserved at limit {limit}");
            seen.dedup();
            assert_eq!(seen.len(), t.len());
        }
    }

    #[test]
    fn split_rejects_empty_tree_and_zero_limit() {
        assert!(matches!(
            split(&BuildOutput::default(), 10),
            Err(QuaysideError::BuildOutputEmpty { .. })
        ));
        assert!(matches!(
            split(&tree(&[("a", 1)]), 0),
            Err(QuaysideError::InvalidConfig(_))
        ));
    }
}
