//! Atomic counters for feed activity.

use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::MetricsSnapshot;

/// Lock-free counters shared by every feed component.
///
/// All updates use `Relaxed` ordering; the counters are advisory and never
/// drive control flow.
#[derive(Debug, Default)]
pub struct FeedMetrics {
    hydration_attempts: AtomicU64,
    hydration_successes: AtomicU64,
    hydration_failures: AtomicU64,
    retries_scheduled: AtomicU64,
    retries_fired: AtomicU64,
    retries_dropped: AtomicU64,
    permanent_failures: AtomicU64,
    catalog_evictions: AtomicU64,
    pool_evictions: AtomicU64,
    memory_pressure_events: AtomicU64,
    known_bad_skips: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_started(&self) {
        self.hydration_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_succeeded(&self) {
        self.hydration_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_failed(&self) {
        self.hydration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_fired(&self) {
        self.retries_fired.fetch_add(1, Ordering::Relaxed);
    }

    /// A due retry failed re-validation.
    pub fn retry_dropped(&self) {
        self.retries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn permanent_failure(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn catalog_evicted(&self, count: usize) {
        self.catalog_evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn pool_evicted(&self, count: usize) {
        self.pool_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn memory_pressure(&self) {
        self.memory_pressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn known_bad_skipped(&self) {
        self.known_bad_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of memory pressure events handled so far.
    pub fn memory_pressure_events(&self) -> u64 {
        self.memory_pressure_events.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hydration_attempts: self.hydration_attempts.load(Ordering::Relaxed),
            hydration_successes: self.hydration_successes.load(Ordering::Relaxed),
            hydration_failures: self.hydration_failures.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            retries_fired: self.retries_fired.load(Ordering::Relaxed),
            retries_dropped: self.retries_dropped.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            catalog_evictions: self.catalog_evictions.load(Ordering::Relaxed),
            pool_evictions: self.pool_evictions.load(Ordering::Relaxed),
            memory_pressure_events: self.memory_pressure_events.load(Ordering::Relaxed),
            known_bad_skips: self.known_bad_skips.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_start_at_zero() {
        assert_eq!(FeedMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = FeedMetrics::new();
        metrics.attempt_started();
        metrics.attempt_started();
        metrics.attempt_failed();
        metrics.retry_scheduled();
        metrics.catalog_evicted(3);
        metrics.pool_evicted(2);
        metrics.memory_pressure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hydration_attempts, 2);
        assert_eq!(snapshot.hydration_failures, 1);
        assert_eq!(snapshot.retries_scheduled, 1);
        assert_eq!(snapshot.catalog_evictions, 3);
        assert_eq!(snapshot.pool_evictions, 2);
        assert_eq!(metrics.memory_pressure_events(), 1);
    }
}
