//! Feed telemetry for observability and diagnostics.
//!
//! Lock-free atomic counters record what the feed engine does; a snapshot
//! combines them with a point-in-time view of catalog and pool state.
//!
//! # Architecture
//!
//! ```text
//! Scheduler / Pool ─────► FeedMetrics ─────► MetricsSnapshot ─┐
//!                         (atomic counters)                    ├──► FeedDiagnostics ──► CLI
//! Catalog / State store ──────────────────► StateCounts ──────┘
//! ```
//!
//! # Example
//!
//! ```
//! use feedcache::telemetry::FeedMetrics;
//!
//! let metrics = FeedMetrics::new();
//! metrics.attempt_started();
//! metrics.attempt_succeeded();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.hydration_successes, 1);
//! ```

mod metrics;
mod snapshot;

pub use metrics::FeedMetrics;
pub use snapshot::{FeedDiagnostics, MetricsSnapshot, StateCounts};
