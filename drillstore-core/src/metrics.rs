//! # Metrics
//!
//! Counters for the chunk store, transactions and the growing-object sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write metrics
    rows_written: AtomicU64,
    chunks_written: AtomicU64,
    chunks_split: AtomicU64,
    chunks_deleted: AtomicU64,
    write_errors: AtomicU64,

    // Transaction metrics
    commits: AtomicU64,
    rollbacks: AtomicU64,

    // Lifecycle metrics
    objects_expired: AtomicU64,
    containers_deactivated: AtomicU64,
    sweeps: AtomicU64,

    // Concurrency
    races_detected: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rows_written(&self, rows: u64) {
        self.inner.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_chunk_written(&self) {
        self.inner.chunks_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_split(&self, pieces: u64) {
        self.inner.chunks_split.fetch_add(pieces, Ordering::Relaxed);
    }

    pub fn record_chunk_deleted(&self) {
        self.inner.chunks_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.inner.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_objects_expired(&self, count: u64) {
        self.inner.objects_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_containers_deactivated(&self, count: u64) {
        self.inner
            .containers_deactivated
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.inner.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_race(&self) {
        self.inner.races_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            rows_written: inner.rows_written.load(Ordering::Relaxed),
            chunks_written: inner.chunks_written.load(Ordering::Relaxed),
            chunks_split: inner.chunks_split.load(Ordering::Relaxed),
            chunks_deleted: inner.chunks_deleted.load(Ordering::Relaxed),
            write_errors: inner.write_errors.load(Ordering::Relaxed),
            commits: inner.commits.load(Ordering::Relaxed),
            rollbacks: inner.rollbacks.load(Ordering::Relaxed),
            objects_expired: inner.objects_expired.load(Ordering::Relaxed),
            containers_deactivated: inner.containers_deactivated.load(Ordering::Relaxed),
            sweeps: inner.sweeps.load(Ordering::Relaxed),
            races_detected: inner.races_detected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_written: u64,
    pub chunks_written: u64,
    pub chunks_split: u64,
    pub chunks_deleted: u64,
    pub write_errors: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub objects_expired: u64,
    pub containers_deactivated: u64,
    pub sweeps: u64,
    pub races_detected: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Start new timer
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) {
        let duration = self.elapsed();
        tracing::debug!(
            name = self.name,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_shared_across_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_chunk_written();
        clone.record_rows_written(5);
        metrics.record_rollback();

        let snap = metrics.snapshot();
        assert_eq!(snap.chunks_written, 1);
        assert_eq!(snap.rows_written, 5);
        assert_eq!(snap.rollbacks, 1);
        assert_eq!(snap.commits, 0);
    }
}
