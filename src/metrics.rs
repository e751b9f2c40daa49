// Migration metrics module
//
// Lightweight counters for one process: how many mods, tools and files a run moved.

use crate::services::filesystem::MergeStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide migration metrics
///
/// Uses atomic operations so the worker thread can record while other threads read.
/// Logged once a run completes.
#[derive(Debug)]
pub struct Metrics {
    /// Mods installed into a destination
    pub mods_migrated: AtomicUsize,

    /// Mods recorded as failed
    pub mods_failed: AtomicUsize,

    /// Mods skipped because the destination already had them
    pub mods_skipped: AtomicUsize,

    pub tools_migrated: AtomicUsize,

    pub tools_failed: AtomicUsize,

    /// Files hardlinked into a destination
    pub files_linked: AtomicU64,

    /// Files copied into a destination
    pub files_copied: AtomicU64,

    /// Existing destination files left untouched
    pub files_kept: AtomicU64,

    pub bytes_transferred: AtomicU64,

    /// Time spent in the converting phase, in milliseconds
    pub total_migration_time_ms: AtomicU64,

    /// Number of completed runs
    pub runs: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            mods_migrated: AtomicUsize::new(0),
            mods_failed: AtomicUsize::new(0),
            mods_skipped: AtomicUsize::new(0),
            tools_migrated: AtomicUsize::new(0),
            tools_failed: AtomicUsize::new(0),
            files_linked: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            files_kept: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            total_migration_time_ms: AtomicU64::new(0),
            runs: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a successfully installed mod and its file counters
    pub fn record_mod_migrated(&self, stats: &MergeStats) {
        self.mods_migrated.fetch_add(1, Ordering::Relaxed);
        self.files_linked
            .fetch_add(stats.linked as u64, Ordering::Relaxed);
        self.files_copied
            .fetch_add(stats.copied as u64, Ordering::Relaxed);
        self.files_kept
            .fetch_add(stats.skipped_existing as u64, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(stats.bytes, Ordering::Relaxed);
    }

    pub fn record_mod_failed(&self) {
        self.mods_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mod_skipped(&self) {
        self.mods_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_migrated(&self) {
        self.tools_migrated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_failed(&self) {
        self.tools_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of a finished run
    pub fn record_run(&self, duration: Duration) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.total_migration_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per migrated mod in milliseconds
    pub fn avg_mod_time_ms(&self) -> f64 {
        let total = self.total_migration_time_ms.load(Ordering::Relaxed);
        let count = self.mods_migrated.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Share of transferred files that were hardlinked, between 0 and 1
    pub fn hardlink_ratio(&self) -> f64 {
        let linked = self.files_linked.load(Ordering::Relaxed);
        let total = linked + self.files_copied.load(Ordering::Relaxed);
        if total > 0 {
            linked as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Migration Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Mods: {} migrated, {} failed, {} already present",
            self.mods_migrated.load(Ordering::Relaxed),
            self.mods_failed.load(Ordering::Relaxed),
            self.mods_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Tools: {} migrated, {} failed",
            self.tools_migrated.load(Ordering::Relaxed),
            self.tools_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Files: {} linked, {} copied, {} kept ({:.1}% linked), {:.2} MiB written",
            self.files_linked.load(Ordering::Relaxed),
            self.files_copied.load(Ordering::Relaxed),
            self.files_kept.load(Ordering::Relaxed),
            self.hardlink_ratio() * 100.0,
            self.bytes_transferred.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0)
        );
        tracing::info!(
            "Migration time: {:.2}s over {} run(s) (avg: {:.2}ms per mod)",
            self.total_migration_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.runs.load(Ordering::Relaxed),
            self.avg_mod_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
