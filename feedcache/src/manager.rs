//! Video feed manager facade.
//!
//! [`VideoFeedManager`] is the single entry point for hosts. It owns the
//! catalog, state store, resource pool, retry coordinator and failure tracker
//! behind one lock, and runs a retry driver task for its whole lifetime.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────── VideoFeedManager ─────────────────────┐
//!  add_video ───────►│ VideoCatalog ──► VideoStateStore ◄── PreloadScheduler     │
//!  preload_* ───────►│                        ▲                  │               │
//!  dispose_* ───────►│                        │                  ▼               │
//!                    │ FailurePatternTracker  RetryCoordinator   ResourcePool ───┼──► ResourceFactory
//!                    └───────────────────────────┬───────────────────────────────┘
//!                                                ▼
//!                                      broadcast<FeedEvent>
//! ```
//!
//! # Example
//!
//! ```ignore
//! use feedcache::{FeedConfig, VideoFeedManager, VideoIdentity};
//!
//! let manager = VideoFeedManager::new(FeedConfig::default(), factory)?;
//! manager.update_following_set(["alice"])?;
//! manager.add_video(VideoIdentity::new("v1", "https://cdn/v1.mp4", "alice", 1))?;
//! manager.preload_around_index(0, None).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::VideoCatalog;
use crate::config::{FeedConfig, PreloadRange};
use crate::error::{FeedError, FeedResult};
use crate::events::{EventChannel, FeedEvent, ReleaseReason};
use crate::failure::FailurePatternTracker;
use crate::model::{LoadingState, VideoId, VideoIdentity, VideoRecord};
use crate::pool::{PlaybackResource, ResourceFactory, ResourcePool};
use crate::retry::{RetryCoordinator, RetryRequest};
use crate::state::{StateEvent, Transition, VideoStateStore};
use crate::telemetry::{FeedDiagnostics, FeedMetrics, StateCounts};

/// Outcome shared by every caller coalesced onto one hydration attempt.
pub(crate) type AttemptOutcome = watch::Receiver<Option<FeedResult<LoadingState>>>;

/// Everything guarded by the feed lock.
pub(crate) struct FeedState {
    pub(crate) catalog: VideoCatalog,
    pub(crate) store: VideoStateStore,
    pub(crate) failures: FailurePatternTracker,
    pub(crate) pool: ResourcePool,
    pub(crate) retries: RetryCoordinator,
    pub(crate) in_flight: HashMap<VideoId, AttemptOutcome>,
    pub(crate) disposed: bool,
}

/// Shared core of a manager, also reachable from spawned retry tasks.
pub(crate) struct FeedCore {
    pub(crate) state: Mutex<FeedState>,
    pub(crate) events: EventChannel,
    pub(crate) metrics: FeedMetrics,
    pub(crate) config: FeedConfig,
    pub(crate) shutdown: CancellationToken,
}

impl FeedCore {
    /// Apply one state event and announce the new state if it changed.
    pub(crate) fn apply(
        &self,
        state: &mut FeedState,
        id: &str,
        event: StateEvent,
    ) -> FeedResult<Transition> {
        let name = event.name();
        let transition = state.store.transition(id, event)?;
        if transition.changed() {
            debug!(
                id,
                event = name,
                from = %transition.from,
                to = %transition.to,
                "State transition"
            );
            self.events.emit(FeedEvent::StateChanged {
                id: VideoId::new(id),
                state: transition.to,
            });
        }
        Ok(transition)
    }
}

/// Facade over the feed cache engine.
///
/// All methods take `&self`; wrap the manager in an `Arc` to share it across
/// tasks. Dropping the manager disposes it.
pub struct VideoFeedManager {
    core: Arc<FeedCore>,
}

impl std::fmt::Debug for VideoFeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFeedManager")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl VideoFeedManager {
    /// Create a manager and start its retry driver.
    ///
    /// Must be called from within a tokio runtime; fails with
    /// [`FeedError::Runtime`] otherwise.
    pub fn new(config: FeedConfig, factory: Arc<dyn ResourceFactory>) -> FeedResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| FeedError::Runtime(e.to_string()))?;

        let shutdown = CancellationToken::new();
        let (retries, retry_requests) =
            RetryCoordinator::new(config.retry_policy(), runtime.clone(), shutdown.child_token());
        let pool = ResourcePool::new(
            factory,
            config.max_controllers,
            config.memory_per_resource_bytes,
            config.hydration_timeout(),
        );

        let core = Arc::new(FeedCore {
            state: Mutex::new(FeedState {
                catalog: VideoCatalog::new(config.max_videos),
                store: VideoStateStore::new(),
                failures: FailurePatternTracker::new(),
                pool,
                retries,
                in_flight: HashMap::new(),
                disposed: false,
            }),
            events: EventChannel::new(config.event_channel_capacity),
            metrics: FeedMetrics::new(),
            config,
            shutdown: shutdown.clone(),
        });

        runtime.spawn(run_retry_driver(
            Arc::downgrade(&core),
            retry_requests,
            shutdown,
        ));

        info!(
            max_videos = core.config.max_videos,
            max_controllers = core.config.max_controllers,
            max_retries = core.config.max_retries,
            preload_ahead = core.config.preload_ahead,
            preload_behind = core.config.preload_behind,
            "Feed manager started"
        );

        Ok(Self { core })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.core.config
    }

    pub fn is_disposed(&self) -> bool {
        self.core.state.lock().disposed
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Primary segment followed by discovery segment.
    pub fn flattened_videos(&self) -> Vec<Arc<VideoIdentity>> {
        let state = self.core.state.lock();
        if state.disposed {
            return Vec::new();
        }
        state.catalog.flattened()
    }

    /// Flattened videos currently `Ready`, in order.
    pub fn ready_videos(&self) -> Vec<Arc<VideoIdentity>> {
        self.filtered_videos(|state| state == LoadingState::Ready)
    }

    /// Flattened videos minus permanently failed and disposed ones.
    pub fn playable_videos(&self) -> Vec<Arc<VideoIdentity>> {
        self.filtered_videos(|state| state.is_playable())
    }

    fn filtered_videos<F>(&self, keep: F) -> Vec<Arc<VideoIdentity>>
    where
        F: Fn(LoadingState) -> bool,
    {
        let state = self.core.state.lock();
        if state.disposed {
            return Vec::new();
        }
        state
            .catalog
            .iter()
            .filter(|identity| state.store.state_of(identity.id.as_str()).is_some_and(&keep))
            .cloned()
            .collect()
    }

    pub fn get_state(&self, id: &str) -> Option<LoadingState> {
        let state = self.core.state.lock();
        if state.disposed {
            return None;
        }
        state.store.state_of(id)
    }

    /// Copy of the record for `id`, kept queryable after permanent failure.
    pub fn get_record(&self, id: &str) -> Option<VideoRecord> {
        let state = self.core.state.lock();
        if state.disposed {
            return None;
        }
        state.store.get(id).cloned()
    }

    /// Open playback resource of a `Ready` video.
    ///
    /// Instantly playable videos are `Ready` without a resource.
    pub fn get_resource(&self, id: &str) -> Option<Arc<dyn PlaybackResource>> {
        let state = self.core.state.lock();
        if state.disposed {
            return None;
        }
        let handle = state.store.get(id)?.resource?;
        state.pool.resolve(id, handle)
    }

    /// Subscribe to change notifications.
    ///
    /// After disposal the returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.core.events.subscribe()
    }

    /// Point-in-time snapshot of counts, resources and counters.
    pub fn diagnostics(&self) -> FeedDiagnostics {
        let state = self.core.state.lock();
        FeedDiagnostics {
            catalog_len: state.catalog.len(),
            primary_len: state.catalog.primary_len(),
            discovery_len: state.catalog.discovery_len(),
            states: StateCounts::from(state.store.counts()),
            open_resources: state.pool.open_count(),
            opening_resources: state.pool.in_flight_count(),
            max_controllers: state.pool.max_controllers(),
            estimated_memory_bytes: state.pool.estimated_memory_bytes(),
            known_bad_locators: state.failures.len(),
            pending_retries: state.retries.pending_count(),
            viewport: state.pool.viewport(),
            disposed: state.disposed,
            metrics: self.core.metrics.snapshot(),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add an identity to the catalog.
    ///
    /// Returns `false` for a duplicate id, which changes nothing. Identities
    /// evicted to respect `max_videos` lose their resource and record.
    pub fn add_video(&self, identity: VideoIdentity) -> FeedResult<bool> {
        let mut released = Vec::new();
        let inserted = {
            let mut guard = self.core.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(FeedError::ManagerDisposed);
            }

            let id = identity.id.clone();
            let identity = Arc::new(identity);
            let insert = state.catalog.add(Arc::clone(&identity))?;
            let Some(segment) = insert.segment else {
                debug!(id = %id, "Duplicate video ignored");
                return Ok(false);
            };
            state.store.insert(identity);

            let mut evicted = Vec::with_capacity(insert.evicted.len());
            for old in &insert.evicted {
                state.retries.cancel(old.id.as_str());
                if let Some(resource) = state.pool.release(old.id.as_str()) {
                    released.push(resource);
                }
                state.store.remove(old.id.as_str());
                evicted.push(old.id.clone());
            }
            if !evicted.is_empty() {
                self.core.metrics.catalog_evicted(evicted.len());
                info!(
                    added = %id,
                    evicted = evicted.len(),
                    max_videos = state.catalog.max_videos(),
                    "Catalog full, evicted oldest videos"
                );
            }
            debug!(id = %id, segment = ?segment, len = state.catalog.len(), "Video added");

            self.core.events.emit(FeedEvent::CatalogChanged {
                added: Some(id),
                evicted,
                len: state.catalog.len(),
            });
            true
        };

        for resource in released {
            resource.dispose();
        }
        Ok(inserted)
    }

    /// Replace the following set; affects future insertions only.
    pub fn update_following_set<I, S>(&self, author_ids: I) -> FeedResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authors: Vec<String> = author_ids.into_iter().map(Into::into).collect();
        let mut state = self.core.state.lock();
        if state.disposed {
            return Err(FeedError::ManagerDisposed);
        }
        let count = authors.len();
        state.catalog.update_following_set(authors);
        debug!(authors = count, "Following set updated");
        self.core
            .events
            .emit(FeedEvent::FollowingChanged { authors: count });
        Ok(())
    }

    /// Hydrate one video, joining an attempt already in flight.
    ///
    /// Returns the state the video settled in. Errors report why this call
    /// could not make the video ready.
    pub async fn preload_video(&self, id: &str) -> FeedResult<LoadingState> {
        self.core.preload(id).await
    }

    /// Preload the window around `index`, nearest first.
    ///
    /// Uses the configured window when `range` is `None`. Hydration failures
    /// are recorded per video and never surfaced here.
    pub async fn preload_around_index(&self, index: i64, range: Option<PreloadRange>) -> FeedResult<()> {
        let range = range.unwrap_or_else(|| self.core.config.preload_range());
        self.core.preload_around_index(index, range).await
    }

    /// Dispose one video, releasing its resource and cancelling its retry.
    ///
    /// Unknown or already disposed ids are a no-op.
    pub fn dispose_video(&self, id: &str) -> FeedResult<()> {
        let released = {
            let mut guard = self.core.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Err(FeedError::ManagerDisposed);
            }
            state.retries.cancel(id);
            let released = state.pool.release(id);
            if let Err(error) = self.core.apply(state, id, StateEvent::Dispose) {
                debug!(id, %error, "Dispose ignored");
            }
            released
        };

        if let Some(resource) = released {
            resource.dispose();
        }
        Ok(())
    }

    /// Release resources away from the viewport and forget known-bad sources.
    ///
    /// Before any viewport is known, every unpinned resource is released.
    pub fn handle_memory_pressure(&self) -> FeedResult<()> {
        self.core.handle_memory_pressure()
    }

    /// Tear the manager down.
    ///
    /// Releases every resource, disposes every record, cancels all retries and
    /// closes the notification channel. Idempotent.
    pub fn dispose(&self) {
        let released = {
            let mut guard = self.core.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.retries.shutdown();
            state.in_flight.clear();
            let released = state.pool.release_all();
            let disposed = state.store.dispose_all();

            self.core.events.emit(FeedEvent::ResourcesReleased {
                ids: released.iter().map(|r| r.id.clone()).collect(),
                reason: ReleaseReason::Disposed,
            });
            self.core.events.close();
            info!(
                released = released.len(),
                disposed = disposed.len(),
                "Feed manager disposed"
            );
            released
        };

        self.core.shutdown.cancel();
        for eviction in released {
            eviction.dispose();
        }
    }
}

impl Drop for VideoFeedManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Deliver due retries to the scheduler until the manager goes away.
async fn run_retry_driver(
    core: Weak<FeedCore>,
    mut requests: mpsc::UnboundedReceiver<RetryRequest>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let Some(core) = core.upgrade() else {
            break;
        };
        if !core.accept_retry(&request) {
            continue;
        }
        tokio::spawn(async move {
            if let Err(error) = core.preload(request.id.as_str()).await {
                debug!(id = %request.id, %error, "Retry attempt failed");
            }
        });
    }
    debug!("Retry driver stopped");
}
