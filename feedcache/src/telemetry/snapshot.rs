//! Point-in-time views of feed telemetry.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::model::LoadingState;

/// Copy of the [`FeedMetrics`](super::FeedMetrics) counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub hydration_attempts: u64,
    pub hydration_successes: u64,
    pub hydration_failures: u64,
    pub retries_scheduled: u64,
    pub retries_fired: u64,
    pub retries_dropped: u64,
    pub permanent_failures: u64,
    pub catalog_evictions: u64,
    pub pool_evictions: u64,
    pub memory_pressure_events: u64,
    pub known_bad_skips: u64,
}

/// Number of records in each loading state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub not_loaded: usize,
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
    pub permanently_failed: usize,
    pub disposed: usize,
}

impl StateCounts {
    pub fn get(&self, state: LoadingState) -> usize {
        match state {
            LoadingState::NotLoaded => self.not_loaded,
            LoadingState::Loading => self.loading,
            LoadingState::Ready => self.ready,
            LoadingState::Failed => self.failed,
            LoadingState::PermanentlyFailed => self.permanently_failed,
            LoadingState::Disposed => self.disposed,
        }
    }

    pub fn total(&self) -> usize {
        LoadingState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

impl From<HashMap<LoadingState, usize>> for StateCounts {
    fn from(counts: HashMap<LoadingState, usize>) -> Self {
        let count = |state| counts.get(&state).copied().unwrap_or(0);
        Self {
            not_loaded: count(LoadingState::NotLoaded),
            loading: count(LoadingState::Loading),
            ready: count(LoadingState::Ready),
            failed: count(LoadingState::Failed),
            permanently_failed: count(LoadingState::PermanentlyFailed),
            disposed: count(LoadingState::Disposed),
        }
    }
}

/// Full diagnostics snapshot of a feed manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedDiagnostics {
    pub catalog_len: usize,
    pub primary_len: usize,
    pub discovery_len: usize,
    pub states: StateCounts,
    pub open_resources: usize,
    pub opening_resources: usize,
    pub max_controllers: usize,
    pub estimated_memory_bytes: u64,
    pub known_bad_locators: usize,
    pub pending_retries: usize,
    pub viewport: Option<usize>,
    pub disposed: bool,
    pub metrics: MetricsSnapshot,
}

impl FeedDiagnostics {
    /// Estimated resource memory in MiB.
    pub fn estimated_memory_mib(&self) -> f64 {
        self.estimated_memory_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Fraction of hydration attempts that succeeded, 0.0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.metrics.hydration_attempts == 0 {
            return 0.0;
        }
        self.metrics.hydration_successes as f64 / self.metrics.hydration_attempts as f64
    }
}

impl fmt::Display for FeedDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Catalog:     {} videos ({} primary, {} discovery)",
            self.catalog_len, self.primary_len, self.discovery_len
        )?;
        writeln!(
            f,
            "States:      {} ready, {} loading, {} not loaded, {} failed, {} permanently failed, {} disposed",
            self.states.ready,
            self.states.loading,
            self.states.not_loaded,
            self.states.failed,
            self.states.permanently_failed,
            self.states.disposed
        )?;
        writeln!(
            f,
            "Resources:   {}/{} open, {} opening, ~{:.1} MiB",
            self.open_resources,
            self.max_controllers,
            self.opening_resources,
            self.estimated_memory_mib()
        )?;
        writeln!(
            f,
            "Hydration:   {} attempts, {} ok, {} failed ({:.0}% success)",
            self.metrics.hydration_attempts,
            self.metrics.hydration_successes,
            self.metrics.hydration_failures,
            self.success_rate() * 100.0
        )?;
        writeln!(
            f,
            "Retries:     {} scheduled, {} fired, {} dropped, {} pending",
            self.metrics.retries_scheduled,
            self.metrics.retries_fired,
            self.metrics.retries_dropped,
            self.pending_retries
        )?;
        writeln!(
            f,
            "Evictions:   {} catalog, {} pool",
            self.metrics.catalog_evictions, self.metrics.pool_evictions
        )?;
        write!(
            f,
            "Failures:    {} permanent, {} known-bad locators, {} skipped, {} pressure events",
            self.metrics.permanent_failures,
            self.known_bad_locators,
            self.metrics.known_bad_skips,
            self.metrics.memory_pressure_events
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_counts_from_histogram() {
        let mut histogram = HashMap::new();
        histogram.insert(LoadingState::Ready, 2);
        histogram.insert(LoadingState::Failed, 1);

        let counts = StateCounts::from(histogram);
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.loading, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_success_rate() {
        let mut diagnostics = FeedDiagnostics::default();
        assert_eq!(diagnostics.success_rate(), 0.0);

        diagnostics.metrics.hydration_attempts = 4;
        diagnostics.metrics.hydration_successes = 3;
        assert!((diagnostics.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_mentions_resources() {
        let diagnostics = FeedDiagnostics {
            open_resources: 3,
            max_controllers: 8,
            estimated_memory_bytes: 3 * 30 * 1024 * 1024,
            ..Default::default()
        };
        let text = diagnostics.to_string();
        assert!(text.contains("3/8 open"));
        assert!(text.contains("90.0 MiB"));
    }
}
