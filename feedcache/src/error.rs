//! Error types for the feed cache.
//!
//! [`FeedError`] is the single error type returned by the public surface.
//! It is `Clone` so that every caller coalesced onto one in-flight hydration
//! observes the same outcome.

use thiserror::Error;

use crate::model::{LoadingState, VideoId};
use crate::state::StateEvent;

/// Result type for feed cache operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Failure reported by a [`ResourceFactory`](crate::pool::ResourceFactory)
/// when opening a playback resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
    /// The open did not complete within the hydration timeout.
    #[error("hydration timed out")]
    Timeout,

    /// Transport-level failure (connection reset, DNS, temporary outage).
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The source locator does not resolve to playable media.
    #[error("source not found")]
    NotFound,

    /// Anything else the factory could not classify.
    #[error("hydration failed: {0}")]
    Other(String),
}

impl HydrationError {
    /// Whether the failure is typically transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, HydrationError::Timeout | HydrationError::NetworkFailure(_))
    }
}

/// Errors that can occur during feed cache operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    /// Identity rejected on insertion (empty id or locator).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation referenced an id the manager does not know.
    #[error("unknown video: {0}")]
    NotFound(VideoId),

    /// Opening the playback resource failed.
    #[error("hydration of {id} failed: {source}")]
    Hydration {
        id: VideoId,
        #[source]
        source: HydrationError,
    },

    /// The pool is at capacity and every open resource is pinned or still opening.
    #[error("resource pool exhausted ({max_controllers} controllers in use)")]
    ExhaustedResources { max_controllers: usize },

    /// A state transition was rejected by the state machine.
    #[error("illegal transition {event} for {id} in state {from:?}")]
    DisposedStateConflict {
        id: VideoId,
        from: Option<LoadingState>,
        event: StateEvent,
    },

    /// The video failed more often than the retry ceiling allows.
    #[error("retries exhausted for {id} after {attempts} attempts")]
    ExhaustedRetries { id: VideoId, attempts: u32 },

    /// The manager has been disposed.
    #[error("feed manager has been disposed")]
    ManagerDisposed,

    /// No tokio runtime was available when the manager was created.
    #[error("runtime unavailable: {0}")]
    Runtime(String),

    /// Invalid configuration value or unreadable configuration file.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Whether the error is the harmless disposal race that callers may ignore.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, FeedError::DisposedStateConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hydration_error_transient() {
        assert!(HydrationError::Timeout.is_transient());
        assert!(HydrationError::NetworkFailure("reset".into()).is_transient());
        assert!(!HydrationError::NotFound.is_transient());
        assert!(!HydrationError::Other("codec".into()).is_transient());
    }

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::Hydration {
            id: VideoId::from("v1"),
            source: HydrationError::Timeout,
        };
        assert!(err.to_string().contains("v1"));
        assert!(err.to_string().contains("timed out"));

        let err = FeedError::ExhaustedResources { max_controllers: 4 };
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_state_conflict_detection() {
        let err = FeedError::DisposedStateConflict {
            id: VideoId::from("v1"),
            from: Some(LoadingState::Disposed),
            event: StateEvent::BeginLoad,
        };
        assert!(err.is_state_conflict());
        assert!(!FeedError::ManagerDisposed.is_state_conflict());
    }
}
