//! Process-wide counters for a vendoring run.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`] once the run is over.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters.
pub struct Metrics {
    modules_fetched: AtomicU64,
    versions_resolved: AtomicU64,
    archives_extracted: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            modules_fetched: AtomicU64::new(0),
            versions_resolved: AtomicU64::new(0),
            archives_extracted: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    pub fn inc_modules_fetched(&self) {
        self.modules_fetched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "modules_fetched", "counter incremented");
    }

    /// A version was chosen by matching against published versions.
    pub fn inc_versions_resolved(&self) {
        self.versions_resolved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "versions_resolved", "counter incremented");
    }

    pub fn inc_archives_extracted(&self) {
        self.archives_extracted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "archives_extracted", "counter incremented");
    }

    pub fn add_bytes_downloaded(&self, n: u64) {
        self.bytes_downloaded.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            modules_fetched = self.modules_fetched(),
            versions_resolved = self.versions_resolved(),
            archives_extracted = self.archives_extracted(),
            bytes_downloaded = self.bytes_downloaded(),
        );
    }

    pub fn modules_fetched(&self) -> u64 {
        self.modules_fetched.load(Ordering::Relaxed)
    }

    pub fn versions_resolved(&self) -> u64 {
        self.versions_resolved.load(Ordering::Relaxed)
    }

    pub fn archives_extracted(&self) -> u64 {
        self.archives_extracted.load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.modules_fetched.store(0, Ordering::Relaxed);
        self.versions_resolved.store(0, Ordering::Relaxed);
        self.archives_extracted.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
    }
}
