//! Preload scheduling around the viewport.
//!
//! The scheduler is the only component that moves records into `Loading`.
//! It decides which videos to hydrate, coalesces concurrent requests for the
//! same video into one attempt, and hands failures to the retry coordinator.
//!
//! # Priority order
//!
//! For viewport index `i` the window `[i - behind, i + ahead]` is clamped to
//! the catalog and visited as `i, i+1, i-1, i+2, i-2, ...`, skipping sides
//! that ran out of range.
//!
//! # Attempt lifecycle
//!
//! ```text
//! begin (lock)                 open (no lock)               complete (lock)
//! ───────────────────────────  ───────────────────────────  ─────────────────────────
//! validate + cancel retry      factory.open() with timeout  commit → Ready
//! reserve pool slot (evict)                                 or Fail → retry / exhaust
//! NotLoaded|Failed → Loading                                publish outcome to joiners
//! register in-flight outcome
//! ```
//!
//! Dropping a caller's future mid-open aborts the attempt: the slot is
//! released and the record returns to `NotLoaded`.

use std::ops::Range;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PreloadRange;
use crate::error::{FeedError, FeedResult, HydrationError};
use crate::events::{FeedEvent, ReleaseReason};
use crate::manager::{AttemptOutcome, FeedCore, FeedState};
use crate::model::{LoadingState, ResourceHandle, VideoId};
use crate::pool::{OpenedResource, PendingOpen, PlaybackResource};
use crate::retry::{RetryDecision, RetryRequest};
use crate::state::StateEvent;

/// Flattened indices to preload around `index`, in priority order.
///
/// Negative or out-of-range indices are clamped to the catalog bounds.
pub fn preload_window(index: i64, len: usize, range: PreloadRange) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let center = clamp_index(index, len);
    let first = center.saturating_sub(range.behind);
    let last = center.saturating_add(range.ahead).min(len - 1);

    let mut order = Vec::with_capacity(last - first + 1);
    order.push(center);
    let mut step = 1;
    loop {
        let ahead = center.checked_add(step).filter(|i| *i <= last);
        let behind = center.checked_sub(step).filter(|i| *i >= first);
        if ahead.is_none() && behind.is_none() {
            break;
        }
        order.extend(ahead);
        order.extend(behind);
        step += 1;
    }
    order
}

/// Clamp a host-supplied viewport index into `0..len`.
pub fn clamp_index(index: i64, len: usize) -> usize {
    if len == 0 || index <= 0 {
        return 0;
    }
    usize::try_from(index).map_or(len - 1, |i| i.min(len - 1))
}

/// Indices kept on memory pressure: `keep` entries centred on `viewport`.
pub fn keep_range(viewport: usize, len: usize, keep: usize) -> Range<usize> {
    let keep = keep.min(len);
    let start = viewport.saturating_sub(keep / 2);
    let end = start.saturating_add(keep).min(len);
    end.saturating_sub(keep)..end
}

/// What the locked half of `preload` decided.
enum Begin {
    /// Nothing to do; the video is already in this state.
    Settled(LoadingState),
    /// Another caller's attempt is in flight.
    Join(AttemptOutcome),
    /// This caller owns a new attempt.
    Attempt(Attempt),
}

struct Attempt {
    pending: PendingOpen,
    outcome: watch::Sender<Option<FeedResult<LoadingState>>>,
}

/// Aborts an attempt whose future is dropped before the open finishes.
struct AttemptGuard<'a> {
    core: &'a FeedCore,
    id: VideoId,
    ticket: u64,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.core.abort_attempt(&self.id, self.ticket);
        }
    }
}

impl FeedCore {
    /// Hydrate one video. See [`VideoFeedManager::preload_video`](crate::VideoFeedManager::preload_video).
    pub(crate) async fn preload(&self, id: &str) -> FeedResult<LoadingState> {
        let attempt = match self.begin_preload(id)? {
            Begin::Settled(state) => return Ok(state),
            Begin::Join(outcome) => return self.join_attempt(id, outcome).await,
            Begin::Attempt(attempt) => attempt,
        };

        let Attempt { pending, outcome } = attempt;
        let mut guard = AttemptGuard {
            core: self,
            id: pending.id().clone(),
            ticket: pending.ticket(),
            armed: true,
        };
        let opened = pending.open().await;
        guard.armed = false;

        let (result, discard) = self.complete_attempt(opened);
        if let Some(resource) = discard {
            resource.dispose();
        }
        // Joiners may all be gone.
        let _ = outcome.send(Some(result.clone()));
        result
    }

    fn begin_preload(&self, id: &str) -> FeedResult<Begin> {
        let (begin, evicted) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(FeedError::ManagerDisposed);
            }
            if let Some(outcome) = state.in_flight.get(id) {
                debug!(id, "Joining in-flight hydration");
                return Ok(Begin::Join(outcome.clone()));
            }

            let record = state
                .store
                .get(id)
                .ok_or_else(|| FeedError::NotFound(VideoId::new(id)))?;
            let identity = Arc::clone(&record.identity);
            let current = record.state;
            let retry_count = record.retry_count;
            match current {
                LoadingState::NotLoaded | LoadingState::Failed => {}
                LoadingState::PermanentlyFailed => {
                    return Err(FeedError::ExhaustedRetries {
                        id: identity.id.clone(),
                        attempts: record.retry_count,
                    });
                }
                other => return Ok(Begin::Settled(other)),
            }

            if state.failures.is_known_bad(&identity.source_locator) {
                self.metrics.known_bad_skipped();
                if current == LoadingState::Failed {
                    // Already failing against a source that just went bad.
                    state.retries.cancel(id);
                    if let Err(conflict) = self.apply(state, id, StateEvent::Exhaust) {
                        debug!(id, error = %conflict, "Could not exhaust record");
                    }
                    self.metrics.permanent_failure();
                    info!(
                        id,
                        attempts = retry_count,
                        locator = %identity.source_locator,
                        "Source marked known-bad, giving up on failed video"
                    );
                    return Err(FeedError::ExhaustedRetries {
                        id: identity.id.clone(),
                        attempts: retry_count,
                    });
                }
                debug!(id, locator = %identity.source_locator, "Skipping known-bad source");
                return Ok(Begin::Settled(current));
            }

            state.retries.cancel(id);

            if identity.instantly_playable {
                self.apply(state, id, StateEvent::BeginLoad)?;
                self.metrics.attempt_started();
                self.apply(state, id, StateEvent::Succeed(ResourceHandle::Inline))?;
                self.metrics.attempt_succeeded();
                return Ok(Begin::Settled(LoadingState::Ready));
            }

            let reserved = state
                .pool
                .reserve(&identity.id, &identity.source_locator, |other| {
                    state.catalog.index_of(other)
                });
            let reservation = match reserved {
                Ok(reservation) => reservation,
                Err(error) => {
                    if current == LoadingState::Failed {
                        // Keep the failed video on its retry schedule.
                        let delay = state.retries.policy().backoff(retry_count);
                        state.retries.schedule(&identity.id, retry_count, delay);
                        self.metrics.retry_scheduled();
                        debug!(
                            id,
                            retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "No resource slot for failed video, retry rescheduled"
                        );
                    }
                    return Err(error);
                }
            };

            if !reservation.evicted.is_empty() {
                self.metrics.pool_evicted(reservation.evicted.len());
            }
            for eviction in &reservation.evicted {
                if let Err(error) = self.apply(state, eviction.id.as_str(), StateEvent::Release) {
                    debug!(id = %eviction.id, %error, "Evicted resource had no ready record");
                }
            }

            let begin = match self.apply(state, id, StateEvent::BeginLoad) {
                Ok(_) => {
                    self.metrics.attempt_started();
                    let (outcome, receiver) = watch::channel(None);
                    state.in_flight.insert(identity.id.clone(), receiver);
                    Begin::Attempt(Attempt {
                        pending: reservation.pending,
                        outcome,
                    })
                }
                Err(error) => {
                    state
                        .pool
                        .abort(reservation.pending.id(), reservation.pending.ticket());
                    debug!(id, %error, "Could not begin hydration");
                    Begin::Settled(current)
                }
            };
            (begin, reservation.evicted)
        };

        for eviction in evicted {
            eviction.dispose();
        }
        Ok(begin)
    }

    async fn join_attempt(&self, id: &str, mut outcome: AttemptOutcome) -> FeedResult<LoadingState> {
        if let Ok(settled) = outcome.wait_for(Option::is_some).await {
            if let Some(result) = &*settled {
                return result.clone();
            }
        }

        // The owning caller went away; report where the attempt left the video.
        let state = self.state.lock();
        if state.disposed {
            return Err(FeedError::ManagerDisposed);
        }
        state
            .store
            .state_of(id)
            .ok_or_else(|| FeedError::NotFound(VideoId::new(id)))
    }

    /// Settle a finished open. Returns a resource the caller must dispose.
    fn complete_attempt(
        &self,
        opened: OpenedResource,
    ) -> (FeedResult<LoadingState>, Option<Arc<dyn PlaybackResource>>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let OpenedResource { id, ticket, result } = opened;
        state.in_flight.remove(&id);

        if state.disposed {
            return (Err(FeedError::ManagerDisposed), result.ok());
        }

        match result {
            Ok(resource) => match state.pool.commit(&id, ticket, resource) {
                Ok(handle) => match self.apply(state, id.as_str(), StateEvent::Succeed(handle)) {
                    Ok(_) => {
                        self.metrics.attempt_succeeded();
                        (Ok(LoadingState::Ready), None)
                    }
                    Err(error) => {
                        debug!(id = %id, %error, "Discarding resource for video that left Loading");
                        let discard = state.pool.release(id.as_str());
                        (Ok(settled_state(state, id.as_str())), discard)
                    }
                },
                Err(resource) => {
                    debug!(id = %id, "Slot released during hydration, discarding resource");
                    (Ok(settled_state(state, id.as_str())), Some(resource))
                }
            },
            Err(error) => {
                state.pool.abort(&id, ticket);
                self.metrics.attempt_failed();
                (self.record_failure(state, &id, error), None)
            }
        }
    }

    /// Record a failed attempt and schedule a retry or give up.
    fn record_failure(
        &self,
        state: &mut FeedState,
        id: &VideoId,
        error: HydrationError,
    ) -> FeedResult<LoadingState> {
        if let Err(conflict) = self.apply(state, id.as_str(), StateEvent::Fail(error.clone())) {
            debug!(id = %id, error = %conflict, "Failure for video that left Loading");
            return Ok(settled_state(state, id.as_str()));
        }
        let Some(record) = state.store.get(id.as_str()) else {
            return Ok(LoadingState::Disposed);
        };
        let retry_count = record.retry_count;
        let locator = record.identity.source_locator.clone();

        match state.retries.policy().decide(retry_count) {
            RetryDecision::Retry { delay } => {
                state.retries.schedule(id, retry_count, delay);
                self.metrics.retry_scheduled();
                warn!(
                    id = %id,
                    %error,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Hydration failed, retry scheduled"
                );
                Err(FeedError::Hydration {
                    id: id.clone(),
                    source: error,
                })
            }
            RetryDecision::Exhaust => {
                if let Err(conflict) = self.apply(state, id.as_str(), StateEvent::Exhaust) {
                    debug!(id = %id, error = %conflict, "Could not exhaust record");
                }
                state.failures.record(&locator);
                self.metrics.permanent_failure();
                info!(
                    id = %id,
                    %error,
                    attempts = retry_count,
                    locator = %locator,
                    "Hydration permanently failed, source marked known-bad"
                );
                Err(FeedError::ExhaustedRetries {
                    id: id.clone(),
                    attempts: retry_count,
                })
            }
        }
    }

    /// Undo an attempt abandoned by its caller.
    fn abort_attempt(&self, id: &VideoId, ticket: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.in_flight.remove(id);
        state.pool.abort(id, ticket);
        if let Err(error) = self.apply(state, id.as_str(), StateEvent::Abort) {
            debug!(id = %id, %error, "Abandoned attempt already settled");
        } else {
            debug!(id = %id, ticket, "Abandoned hydration attempt");
        }
    }

    /// Re-validate a due retry. Returns `true` if it should run.
    pub(crate) fn accept_retry(&self, request: &RetryRequest) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return false;
        }
        let claimed = state.retries.claim(request);
        let still_wanted = claimed
            && state.store.get(request.id.as_str()).is_some_and(|record| {
                record.state == LoadingState::Failed
                    && record.retry_count == request.expected_retry_count
            });

        if still_wanted {
            self.metrics.retry_fired();
        } else {
            self.metrics.retry_dropped();
            debug!(id = %request.id, "Dropping stale retry");
        }
        still_wanted
    }

    pub(crate) async fn preload_around_index(&self, index: i64, range: PreloadRange) -> FeedResult<()> {
        let ids: Vec<VideoId> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(FeedError::ManagerDisposed);
            }
            let len = state.catalog.len();
            if len == 0 {
                return Ok(());
            }

            let viewport = clamp_index(index, len);
            state.pool.set_viewport(Some(viewport));
            state
                .pool
                .pin_only(state.catalog.at(viewport).map(|identity| identity.id.clone()));

            preload_window(index, len, range)
                .into_iter()
                .filter_map(|i| state.catalog.at(i).map(|identity| identity.id.clone()))
                .collect()
        };

        debug!(index, window = ids.len(), "Preloading around viewport");
        let results = join_all(ids.iter().map(|id| self.preload(id.as_str()))).await;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(_) => {}
                Err(FeedError::ManagerDisposed) => break,
                Err(error) => debug!(id = %id, %error, "Preload did not complete"),
            }
        }
        Ok(())
    }

    pub(crate) fn handle_memory_pressure(&self) -> FeedResult<()> {
        let released = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(FeedError::ManagerDisposed);
            }
            self.metrics.memory_pressure();

            if !self.config.enable_memory_management {
                info!(
                    events = self.metrics.memory_pressure_events(),
                    "Memory pressure noted, memory management disabled"
                );
                self.events.emit(FeedEvent::ResourcesReleased {
                    ids: Vec::new(),
                    reason: ReleaseReason::MemoryPressure,
                });
                return Ok(());
            }

            let keep = match state.pool.viewport() {
                Some(viewport) => keep_range(
                    viewport,
                    state.catalog.len(),
                    self.config.memory_pressure_keep_count(),
                ),
                None => 0..0,
            };
            let mut released = Vec::new();
            let mut ids = Vec::new();
            for id in state.pool.open_ids() {
                if state.pool.is_pinned(id.as_str()) {
                    continue;
                }
                let inside = state
                    .catalog
                    .index_of(id.as_str())
                    .is_some_and(|index| keep.contains(&index));
                if inside {
                    continue;
                }
                if let Some(resource) = state.pool.release(id.as_str()) {
                    released.push(resource);
                }
                if let Err(error) = self.apply(state, id.as_str(), StateEvent::Release) {
                    debug!(id = %id, %error, "Released resource had no ready record");
                }
                ids.push(id);
            }
            let forgotten = state.failures.clear();

            info!(
                released = ids.len(),
                keep_start = keep.start,
                keep_end = keep.end,
                known_bad_cleared = forgotten,
                estimated_memory_bytes = state.pool.estimated_memory_bytes(),
                "Handled memory pressure"
            );
            self.events.emit(FeedEvent::ResourcesReleased {
                ids,
                reason: ReleaseReason::MemoryPressure,
            });
            released
        };

        for resource in released {
            resource.dispose();
        }
        Ok(())
    }
}

/// State a record ended up in, `Disposed` once it is gone.
fn settled_state(state: &FeedState, id: &str) -> LoadingState {
    state.store.state_of(id).unwrap_or(LoadingState::Disposed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_priority_order() {
        assert_eq!(preload_window(5, 20, PreloadRange::new(3, 1)), vec![5, 6, 4, 7, 8]);
        assert_eq!(preload_window(5, 20, PreloadRange::new(1, 2)), vec![5, 6, 4, 3]);
    }

    #[test]
    fn test_window_clamped_at_edges() {
        assert_eq!(preload_window(0, 10, PreloadRange::new(2, 2)), vec![0, 1, 2]);
        assert_eq!(preload_window(9, 10, PreloadRange::new(2, 2)), vec![9, 8, 7]);
        assert_eq!(preload_window(-4, 10, PreloadRange::new(1, 1)), vec![0, 1]);
        assert_eq!(preload_window(50, 3, PreloadRange::new(1, 1)), vec![2, 1]);
        assert!(preload_window(0, 0, PreloadRange::new(3, 1)).is_empty());
    }

    #[test]
    fn test_window_zero_range_is_just_the_viewport() {
        assert_eq!(preload_window(4, 10, PreloadRange::new(0, 0)), vec![4]);
    }

    #[test]
    fn test_clamp_index() {
        assert_eq!(clamp_index(-1, 5), 0);
        assert_eq!(clamp_index(3, 5), 3);
        assert_eq!(clamp_index(i64::MAX, 5), 4);
        assert_eq!(clamp_index(2, 0), 0);
    }

    #[test]
    fn test_keep_range_centred_and_clamped() {
        assert_eq!(keep_range(50, 100, 70), 15..85);
        assert_eq!(keep_range(0, 100, 70), 0..70);
        assert_eq!(keep_range(99, 100, 70), 30..100);
        assert_eq!(keep_range(2, 5, 70), 0..5);
        assert_eq!(keep_range(3, 10, 0), 3..3);
    }

    mod window_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn window_is_distinct_and_in_bounds(
                index in -20i64..200,
                len in 1usize..100,
                ahead in 0usize..10,
                behind in 0usize..10,
            ) {
                let window = preload_window(index, len, PreloadRange::new(ahead, behind));
                let center = clamp_index(index, len);
                prop_assert_eq!(window[0], center);

                let mut seen = std::collections::HashSet::new();
                for i in &window {
                    prop_assert!(*i < len);
                    prop_assert!(*i + behind >= center && *i <= center + ahead);
                    prop_assert!(seen.insert(*i));
                }
            }
        }
    }
}
