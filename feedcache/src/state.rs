//! Per-video state records and the loading state machine.
//!
//! [`VideoStateStore`] is the only writer of [`VideoRecord`]s. Every change
//! goes through [`VideoStateStore::transition`], which rejects illegal moves
//! with [`FeedError::DisposedStateConflict`] instead of panicking: an
//! in-flight hydration finishing after its video was disposed is an expected
//! race, and callers are free to ignore the conflict.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{FeedError, FeedResult, HydrationError};
use crate::model::{LoadingState, ResourceHandle, VideoId, VideoIdentity, VideoRecord};

/// An input to the loading state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// Start a hydration attempt (`NotLoaded | Failed → Loading`).
    BeginLoad,
    /// Hydration succeeded (`Loading → Ready`).
    Succeed(ResourceHandle),
    /// Hydration failed (`Loading → Failed`), counts one retry.
    Fail(HydrationError),
    /// Retries exhausted (`Failed → PermanentlyFailed`).
    Exhaust,
    /// Resource taken back by the pool (`Ready → NotLoaded`).
    Release,
    /// Attempt abandoned before finishing (`Loading → NotLoaded`).
    Abort,
    /// Video removed from use (any non-terminal → `Disposed`).
    Dispose,
}

impl StateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::BeginLoad => "begin_load",
            StateEvent::Succeed(_) => "succeed",
            StateEvent::Fail(_) => "fail",
            StateEvent::Exhaust => "exhaust",
            StateEvent::Release => "release",
            StateEvent::Abort => "abort",
            StateEvent::Dispose => "dispose",
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State reached by applying `event` in state `from`, `None` if illegal.
fn next_state(from: LoadingState, event: &StateEvent) -> Option<LoadingState> {
    let to = match (from, event) {
        (LoadingState::NotLoaded | LoadingState::Failed, StateEvent::BeginLoad) => {
            LoadingState::Loading
        }
        (LoadingState::Loading, StateEvent::Succeed(_)) => LoadingState::Ready,
        (LoadingState::Loading, StateEvent::Fail(_)) => LoadingState::Failed,
        (LoadingState::Loading, StateEvent::Abort) => LoadingState::NotLoaded,
        (LoadingState::Failed, StateEvent::Exhaust) => LoadingState::PermanentlyFailed,
        (LoadingState::Ready, StateEvent::Release) => LoadingState::NotLoaded,
        (state, StateEvent::Dispose) if state.is_terminal() => state,
        (_, StateEvent::Dispose) => LoadingState::Disposed,
        _ => return None,
    };
    Some(to)
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LoadingState,
    pub to: LoadingState,
}

impl Transition {
    /// Whether the record actually changed state.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Owner of one record per video identity.
#[derive(Debug, Default)]
pub struct VideoStateStore {
    records: HashMap<VideoId, VideoRecord>,
}

impl VideoStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `NotLoaded` record. Returns `false` if one already exists.
    pub fn insert(&mut self, identity: Arc<VideoIdentity>) -> bool {
        if self.records.contains_key(&identity.id) {
            return false;
        }
        self.records
            .insert(identity.id.clone(), VideoRecord::new(identity));
        true
    }

    /// Drop a record entirely (catalog eviction, teardown).
    pub fn remove(&mut self, id: &str) -> Option<VideoRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&VideoRecord> {
        self.records.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<LoadingState> {
        self.records.get(id).map(|r| r.state)
    }

    /// Apply one event to a record.
    pub fn transition(&mut self, id: &str, event: StateEvent) -> FeedResult<Transition> {
        let Some(record) = self.records.get_mut(id) else {
            if event == StateEvent::Dispose {
                // Disposing an unknown record is a no-op.
                return Ok(Transition {
                    from: LoadingState::Disposed,
                    to: LoadingState::Disposed,
                });
            }
            return Err(FeedError::DisposedStateConflict {
                id: VideoId::new(id),
                from: None,
                event,
            });
        };

        let from = record.state;
        let Some(to) = next_state(from, &event) else {
            return Err(FeedError::DisposedStateConflict {
                id: record.identity.id.clone(),
                from: Some(from),
                event,
            });
        };

        match event {
            StateEvent::Succeed(handle) => record.resource = Some(handle),
            StateEvent::Fail(error) => {
                record.retry_count += 1;
                record.last_error = Some(error);
                record.resource = None;
            }
            _ => {
                if to != LoadingState::Ready {
                    record.resource = None;
                }
            }
        }
        record.state = to;

        Ok(Transition { from, to })
    }

    /// Dispose every record, returning the ids that changed state.
    pub fn dispose_all(&mut self) -> Vec<VideoId> {
        let mut changed = Vec::new();
        for (id, record) in self.records.iter_mut() {
            if !record.state.is_terminal() {
                record.state = LoadingState::Disposed;
                record.resource = None;
                changed.push(id.clone());
            }
        }
        changed
    }

    /// Ids of all records currently in `state`.
    pub fn ids_in_state(&self, state: LoadingState) -> Vec<VideoId> {
        self.records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.identity.id.clone())
            .collect()
    }

    /// Histogram of records by state.
    pub fn counts(&self) -> HashMap<LoadingState, usize> {
        let mut counts = HashMap::new();
        for record in self.records.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLE: ResourceHandle = ResourceHandle::Pooled { slot: 1 };

    fn store_with(id: &str) -> VideoStateStore {
        let mut store = VideoStateStore::new();
        store.insert(Arc::new(VideoIdentity::new(id, "https://cdn/x.mp4", "a", 0)));
        store
    }

    #[test]
    fn test_happy_path() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        let t = store.transition("v1", StateEvent::Succeed(HANDLE)).unwrap();
        assert_eq!(t.from, LoadingState::Loading);
        assert_eq!(t.to, LoadingState::Ready);
        assert_eq!(store.get("v1").unwrap().resource, Some(HANDLE));
    }

    #[test]
    fn test_insert_duplicate_keeps_existing_record() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        assert!(!store.insert(Arc::new(VideoIdentity::new("v1", "https://x", "a", 0))));
        assert_eq!(store.state_of("v1"), Some(LoadingState::Loading));
    }

    #[test]
    fn test_fail_counts_retries_and_clears_handle() {
        let mut store = store_with("v1");
        for expected in 1..=3 {
            store.transition("v1", StateEvent::BeginLoad).unwrap();
            store
                .transition("v1", StateEvent::Fail(HydrationError::Timeout))
                .unwrap();
            let record = store.get("v1").unwrap();
            assert_eq!(record.retry_count, expected);
            assert_eq!(record.state, LoadingState::Failed);
            assert!(record.resource.is_none());
        }
        store.transition("v1", StateEvent::Exhaust).unwrap();
        assert_eq!(store.state_of("v1"), Some(LoadingState::PermanentlyFailed));

        let err = store.transition("v1", StateEvent::BeginLoad).unwrap_err();
        assert!(err.is_state_conflict());
    }

    #[test]
    fn test_release_returns_to_not_loaded() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        store.transition("v1", StateEvent::Succeed(HANDLE)).unwrap();
        store.transition("v1", StateEvent::Release).unwrap();
        let record = store.get("v1").unwrap();
        assert_eq!(record.state, LoadingState::NotLoaded);
        assert!(record.resource.is_none());
    }

    #[test]
    fn test_abort_returns_to_not_loaded() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        store.transition("v1", StateEvent::Abort).unwrap();
        assert_eq!(store.state_of("v1"), Some(LoadingState::NotLoaded));
    }

    #[test]
    fn test_succeed_after_dispose_is_conflict() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        store.transition("v1", StateEvent::Dispose).unwrap();

        let err = store
            .transition("v1", StateEvent::Succeed(HANDLE))
            .unwrap_err();
        match err {
            FeedError::DisposedStateConflict { from, event, .. } => {
                assert_eq!(from, Some(LoadingState::Disposed));
                assert_eq!(event, StateEvent::Succeed(HANDLE));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.state_of("v1"), Some(LoadingState::Disposed));
        assert!(store.get("v1").unwrap().resource.is_none());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut store = store_with("v1");
        let first = store.transition("v1", StateEvent::Dispose).unwrap();
        assert!(first.changed());
        let second = store.transition("v1", StateEvent::Dispose).unwrap();
        assert!(!second.changed());
        assert!(store.transition("missing", StateEvent::Dispose).is_ok());
    }

    #[test]
    fn test_dispose_keeps_permanent_failure_for_diagnostics() {
        let mut store = store_with("v1");
        store.transition("v1", StateEvent::BeginLoad).unwrap();
        store
            .transition("v1", StateEvent::Fail(HydrationError::NotFound))
            .unwrap();
        store.transition("v1", StateEvent::Exhaust).unwrap();
        let t = store.transition("v1", StateEvent::Dispose).unwrap();
        assert!(!t.changed());
        assert_eq!(
            store.get("v1").unwrap().last_error,
            Some(HydrationError::NotFound)
        );
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut store = store_with("v1");
        for event in [
            StateEvent::Succeed(HANDLE),
            StateEvent::Fail(HydrationError::Timeout),
            StateEvent::Exhaust,
            StateEvent::Release,
            StateEvent::Abort,
        ] {
            assert!(store.transition("v1", event).is_err());
        }
        assert_eq!(store.state_of("v1"), Some(LoadingState::NotLoaded));
        assert!(store.transition("missing", StateEvent::BeginLoad).is_err());
    }

    #[test]
    fn test_dispose_all_and_counts() {
        let mut store = store_with("v1");
        store.insert(Arc::new(VideoIdentity::new("v2", "https://x", "a", 0)));
        store.transition("v2", StateEvent::BeginLoad).unwrap();

        let counts = store.counts();
        assert_eq!(counts.get(&LoadingState::NotLoaded), Some(&1));
        assert_eq!(counts.get(&LoadingState::Loading), Some(&1));

        let mut changed = store.dispose_all();
        changed.sort();
        assert_eq!(changed, vec![VideoId::from("v1"), VideoId::from("v2")]);
        assert_eq!(store.ids_in_state(LoadingState::Disposed).len(), 2);
    }
}
