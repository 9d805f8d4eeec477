//! Global atomic counters for Quayside observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a deploy).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    bundles_uploaded: AtomicU64,
    uploads_reused: AtomicU64,
    retries: AtomicU64,
    objects_staged: AtomicU64,
    files_substituted: AtomicU64,
    publishes_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            bundles_uploaded: AtomicU64::new(0),
            uploads_reused: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            objects_staged: AtomicU64::new(0),
            files_substituted: AtomicU64::new(0),
            publishes_completed: AtomicU64::new(0),
        }
    }

    /// A bundle was written to the artifact store.
    pub fn inc_bundles_uploaded(&self) {
        self.bundles_uploaded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "bundles_uploaded", "counter incremented");
    }

    /// A bundle already present in the artifact store was reused.
    pub fn inc_uploads_reused(&self) {
        self.uploads_reused.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "uploads_reused", "counter incremented");
    }

    /// A transient failure triggered a retry.
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    /// Add `n` objects written into a deployment namespace.
    pub fn add_objects_staged(&self, n: u64) {
        self.objects_staged.fetch_add(n, Ordering::Relaxed);
    }

    /// A staged file had placeholders rewritten.
    pub fn inc_files_substituted(&self) {
        self.files_substituted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "files_substituted", "counter incremented");
    }

    /// A deploy reached the published state.
    pub fn inc_publishes(&self) {
        self.publishes_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "publishes_completed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a deploy) rather than on every
    /// increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            bundles_uploaded = self.bundles_uploaded(),
            uploads_reused = self.uploads_reused(),
            retries = self.retries(),
            objects_staged = self.objects_staged(),
            files_substituted = self.files_substituted(),
            publishes_completed = self.publishes_completed(),
        );
    }

    pub fn bundles_uploaded(&self) -> u64 {
        self.bundles_uploaded.load(Ordering::Relaxed)
    }

    pub fn uploads_reused(&self) -> u64 {
        self.uploads_reused.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn objects_staged(&self) -> u64 {
        self.objects_staged.load(Ordering::Relaxed)
    }

    pub fn files_substituted(&self) -> u64 {
        self.files_substituted.load(Ordering::Relaxed)
    }

    pub fn publishes_completed(&self) -> u64 {
        self.publishes_completed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.bundles_uploaded.store(0, Ordering::Relaxed);
        self.uploads_reused.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.objects_staged.store(0, Ordering::Relaxed);
        self.files_substituted.store(0, Ordering::Relaxed);
        self.publishes_completed.store(0, Ordering::Relaxed);
    }
}
