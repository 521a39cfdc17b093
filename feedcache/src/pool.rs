//! Bounded pool of hydrated playback resources.
//!
//! The pool is the only owner of playback resources (decoder / controller
//! instances). It enforces a hard ceiling of `max_controllers` concurrent
//! entries, counting resources that are still opening, and evicts the
//! resource farthest from the viewport when a new one is needed.
//!
//! # Acquisition
//!
//! Acquiring a resource happens in three steps so that no lock is held while
//! the factory is suspended:
//!
//! ```text
//! reserve()  ── capacity check + eviction, under the feed lock
//!    │
//!    ▼
//! PendingOpen::open().await  ── factory call bounded by the hydration timeout
//!    │
//!    ▼
//! commit()   ── store the resource if the reservation is still live
//! ```
//!
//! A reservation released in between (video disposed, manager torn down)
//! makes `commit` hand the fresh resource back for immediate disposal.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{FeedError, FeedResult, HydrationError};
use crate::model::{ResourceHandle, VideoId};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A heavyweight resource enabling playback of one video.
pub trait PlaybackResource: Send + Sync {
    /// Locator the resource was opened from.
    fn locator(&self) -> &str;

    /// Release whatever the resource holds.
    ///
    /// Called exactly once, when the pool drops the resource.
    fn dispose(&self) {}
}

/// Opens playback resources for source locators.
///
/// The returned future must not borrow the factory so it can be awaited
/// after the pool's lock has been released.
pub trait ResourceFactory: Send + Sync {
    fn open(
        &self,
        locator: &str,
    ) -> BoxFuture<'static, Result<Arc<dyn PlaybackResource>, HydrationError>>;
}

/// A resource removed from the pool, to be disposed by the caller.
pub struct Eviction {
    pub id: VideoId,
    pub resource: Arc<dyn PlaybackResource>,
}

impl Eviction {
    /// Dispose the evicted resource.
    pub fn dispose(self) {
        self.resource.dispose();
    }
}

impl fmt::Debug for Eviction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eviction")
            .field("id", &self.id)
            .field("locator", &self.resource.locator())
            .finish()
    }
}

enum Slot {
    Opening {
        ticket: u64,
    },
    Open {
        slot: u64,
        resource: Arc<dyn PlaybackResource>,
        opened_seq: u64,
    },
}

/// A reserved slot whose resource has not been opened yet.
pub struct PendingOpen {
    id: VideoId,
    ticket: u64,
    timeout: Duration,
    future: BoxFuture<'static, Result<Arc<dyn PlaybackResource>, HydrationError>>,
}

impl PendingOpen {
    pub fn id(&self) -> &VideoId {
        &self.id
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Run the factory call, bounded by the hydration timeout.
    pub async fn open(self) -> OpenedResource {
        let result = match tokio::time::timeout(self.timeout, self.future).await {
            Ok(result) => result,
            Err(_) => Err(HydrationError::Timeout),
        };
        OpenedResource {
            id: self.id,
            ticket: self.ticket,
            result,
        }
    }
}

impl fmt::Debug for PendingOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOpen")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of a finished factory call.
pub struct OpenedResource {
    pub id: VideoId,
    pub ticket: u64,
    pub result: Result<Arc<dyn PlaybackResource>, HydrationError>,
}

/// Successful reservation.
#[derive(Debug)]
pub struct Reservation {
    pub pending: PendingOpen,
    /// Resources evicted to make room, oldest decision first.
    pub evicted: Vec<Eviction>,
}

/// Pool of hydrated playback resources with a hard ceiling.
pub struct ResourcePool {
    factory: Arc<dyn ResourceFactory>,
    entries: HashMap<VideoId, Slot>,
    pinned: HashSet<VideoId>,
    max_controllers: usize,
    memory_per_resource: u64,
    hydration_timeout: Duration,
    viewport: Option<usize>,
    next_ticket: u64,
    next_open_seq: u64,
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("open", &self.open_count())
            .field("in_flight", &self.in_flight_count())
            .field("max_controllers", &self.max_controllers)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

impl ResourcePool {
    /// Create an empty pool.
    ///
    /// # Arguments
    ///
    /// * `factory` - Opens resources for source locators
    /// * `max_controllers` - Hard ceiling on open plus opening resources
    /// * `memory_per_resource` - Advisory cost of one open resource in bytes
    /// * `hydration_timeout` - Upper bound on a single factory call
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        max_controllers: usize,
        memory_per_resource: u64,
        hydration_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            entries: HashMap::new(),
            pinned: HashSet::new(),
            max_controllers: max_controllers.max(1),
            memory_per_resource,
            hydration_timeout,
            viewport: None,
            next_ticket: 1,
            next_open_seq: 0,
        }
    }

    /// Reserve a slot for `id` and start the factory call for `locator`.
    ///
    /// When the pool is full, the open, unpinned resource farthest from the
    /// viewport is evicted first; `position_of` maps an id to its flattened
    /// catalog index. With a known viewport the victim must be strictly
    /// farther from it than `id`, so a nearer video is never traded for a
    /// farther one. Fails with [`FeedError::ExhaustedResources`] when no
    /// entry can be evicted.
    pub fn reserve<P>(&mut self, id: &VideoId, locator: &str, position_of: P) -> FeedResult<Reservation>
    where
        P: Fn(&str) -> Option<usize>,
    {
        let mut evicted = Vec::new();

        // A stale entry for the same id never counts against the new reservation.
        if let Some(Slot::Open { resource, .. }) = self.entries.remove(id) {
            evicted.push(Eviction {
                id: id.clone(),
                resource,
            });
        }

        if self.entries.len() >= self.max_controllers {
            match self.select_victim(id, &position_of) {
                Some(victim) => {
                    if let Some(Slot::Open { resource, .. }) = self.entries.remove(&victim) {
                        info!(
                            evicted = %victim,
                            requested = %id,
                            viewport = ?self.viewport,
                            "Resource pool full, evicting farthest resource"
                        );
                        evicted.push(Eviction {
                            id: victim,
                            resource,
                        });
                    }
                }
                None => {
                    warn!(
                        requested = %id,
                        max_controllers = self.max_controllers,
                        pinned = self.pinned.len(),
                        "Resource pool exhausted, nothing evictable"
                    );
                    return Err(FeedError::ExhaustedResources {
                        max_controllers: self.max_controllers,
                    });
                }
            }
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.entries.insert(id.clone(), Slot::Opening { ticket });
        debug!(id = %id, ticket, "Reserved resource slot");

        Ok(Reservation {
            pending: PendingOpen {
                id: id.clone(),
                ticket,
                timeout: self.hydration_timeout,
                future: self.factory.open(locator),
            },
            evicted,
        })
    }

    /// Pick the open, unpinned entry farthest from the viewport.
    ///
    /// Entries no longer in the catalog rank farthest; ties go to the
    /// least recently opened. With a known viewport, only entries farther
    /// away than `requester` qualify.
    fn select_victim<P>(&self, requester: &VideoId, position_of: &P) -> Option<VideoId>
    where
        P: Fn(&str) -> Option<usize>,
    {
        let floor = self
            .viewport
            .map(|_| self.distance_from_viewport(position_of(requester.as_str())));

        self.entries
            .iter()
            .filter(|(id, _)| !self.pinned.contains(*id))
            .filter_map(|(id, slot)| match slot {
                Slot::Open { opened_seq, .. } => {
                    let distance = self.distance_from_viewport(position_of(id.as_str()));
                    Some((distance, Reverse(*opened_seq), id))
                }
                Slot::Opening { .. } => None,
            })
            .filter(|(distance, _, _)| floor.map_or(true, |floor| *distance > floor))
            .max_by_key(|(distance, seq, _)| (*distance, *seq))
            .map(|(_, _, id)| id.clone())
    }

    fn distance_from_viewport(&self, position: Option<usize>) -> usize {
        match (self.viewport, position) {
            (_, None) => usize::MAX,
            (Some(viewport), Some(position)) => viewport.abs_diff(position),
            (None, Some(_)) => 0,
        }
    }

    /// Store an opened resource if its reservation is still live.
    ///
    /// Returns the resource back as `Err` when the reservation was released
    /// meanwhile; the caller must dispose it.
    pub fn commit(
        &mut self,
        id: &VideoId,
        ticket: u64,
        resource: Arc<dyn PlaybackResource>,
    ) -> Result<ResourceHandle, Arc<dyn PlaybackResource>> {
        match self.entries.get(id) {
            Some(Slot::Opening { ticket: live }) if *live == ticket => {
                let opened_seq = self.next_open_seq;
                self.next_open_seq += 1;
                self.entries.insert(
                    id.clone(),
                    Slot::Open {
                        slot: ticket,
                        resource,
                        opened_seq,
                    },
                );
                Ok(ResourceHandle::Pooled { slot: ticket })
            }
            _ => {
                debug!(id = %id, ticket, "Reservation no longer live, discarding resource");
                Err(resource)
            }
        }
    }

    /// Drop a reservation whose open failed or was abandoned.
    pub fn abort(&mut self, id: &VideoId, ticket: u64) {
        if matches!(self.entries.get(id), Some(Slot::Opening { ticket: live }) if *live == ticket) {
            self.entries.remove(id);
        }
    }

    /// Remove the entry for `id`, returning its resource if one was open.
    ///
    /// Always safe to call on an id without a resource. Releasing a slot that
    /// is still opening cancels the reservation.
    pub fn release(&mut self, id: &str) -> Option<Arc<dyn PlaybackResource>> {
        self.pinned.remove(id);
        match self.entries.remove(id)? {
            Slot::Open { resource, .. } => Some(resource),
            Slot::Opening { .. } => None,
        }
    }

    /// Remove every entry, returning the open resources.
    pub fn release_all(&mut self) -> Vec<Eviction> {
        self.pinned.clear();
        self.entries
            .drain()
            .filter_map(|(id, slot)| match slot {
                Slot::Open { resource, .. } => Some(Eviction { id, resource }),
                Slot::Opening { .. } => None,
            })
            .collect()
    }

    /// Open resource for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<dyn PlaybackResource>> {
        match self.entries.get(id)? {
            Slot::Open { resource, .. } => Some(Arc::clone(resource)),
            Slot::Opening { .. } => None,
        }
    }

    /// Open resource behind a handle, if the handle is still current.
    pub fn resolve(&self, id: &str, handle: ResourceHandle) -> Option<Arc<dyn PlaybackResource>> {
        let ResourceHandle::Pooled { slot: wanted } = handle else {
            return None;
        };
        match self.entries.get(id)? {
            Slot::Open { slot, resource, .. } if *slot == wanted => Some(Arc::clone(resource)),
            _ => None,
        }
    }

    /// Ids with an open resource.
    pub fn open_ids(&self) -> Vec<VideoId> {
        self.entries
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Mark `id` as currently visible; pinned resources are never evicted.
    pub fn pin(&mut self, id: VideoId) {
        self.pinned.insert(id);
    }

    pub fn unpin(&mut self, id: &str) {
        self.pinned.remove(id);
    }

    /// Replace the pinned set with a single id.
    pub fn pin_only(&mut self, id: Option<VideoId>) {
        self.pinned.clear();
        if let Some(id) = id {
            self.pinned.insert(id);
        }
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pinned.contains(id)
    }

    pub fn set_viewport(&mut self, index: Option<usize>) {
        self.viewport = index;
    }

    pub fn viewport(&self) -> Option<usize> {
        self.viewport
    }

    pub fn open_count(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Open { .. }))
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.len() - self.open_count()
    }

    /// Open plus opening entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_controllers(&self) -> usize {
        self.max_controllers
    }

    /// Advisory memory held by open resources, in bytes.
    pub fn estimated_memory_bytes(&self) -> u64 {
        self.open_count() as u64 * self.memory_per_resource
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::InstantFactory;
    use super::*;

    fn pool(max: usize) -> ResourcePool {
        ResourcePool::new(
            Arc::new(InstantFactory),
            max,
            1_000,
            Duration::from_secs(1),
        )
    }

    async fn hydrate(pool: &mut ResourcePool, id: &str, positions: &HashMap<VideoId, usize>) -> Vec<Eviction> {
        let id = VideoId::from(id);
        let reservation = pool
            .reserve(&id, "https://cdn/x.mp4", |other| positions.get(other).copied())
            .unwrap();
        let opened = reservation.pending.open().await;
        let resource = opened.result.unwrap();
        pool.commit(&opened.id, opened.ticket, resource).ok().unwrap();
        reservation.evicted
    }

    fn positions(ids: &[&str]) -> HashMap<VideoId, usize> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (VideoId::from(*id), i))
            .collect()
    }

    #[tokio::test]
    async fn test_reserve_and_commit() {
        let mut pool = pool(2);
        let map = positions(&["a"]);
        let evicted = hydrate(&mut pool, "a", &map).await;
        assert!(evicted.is_empty());
        assert_eq!(pool.open_count(), 1);
        assert!(pool.get("a").is_some());
        assert_eq!(pool.estimated_memory_bytes(), 1_000);
    }

    #[tokio::test]
    async fn test_evicts_farthest_from_viewport() {
        let mut pool = pool(3);
        let map = positions(&["a", "b", "c", "d", "e"]);
        for id in ["a", "b", "c"] {
            hydrate(&mut pool, id, &map).await;
        }
        pool.set_viewport(Some(2));

        let evicted = hydrate(&mut pool, "d", &map).await;
        assert_eq!(evicted.len(), 1);
        // a (distance 2) is farther from index 2 than b or c
        assert_eq!(evicted[0].id.as_str(), "a");
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_never_evicts_nearer_than_requester() {
        let mut pool = pool(2);
        let map = positions(&["a", "b", "c", "d", "e"]);
        hydrate(&mut pool, "b", &map).await;
        hydrate(&mut pool, "d", &map).await;
        pool.set_viewport(Some(2));

        // e sits at distance 2; b and d are both at distance 1
        let err = pool
            .reserve(&VideoId::from("e"), "https://cdn/e.mp4", |id| map.get(id).copied())
            .unwrap_err();
        assert_eq!(err, FeedError::ExhaustedResources { max_controllers: 2 });
        assert!(pool.get("b").is_some());
        assert!(pool.get("d").is_some());

        // once the viewport moves, d (distance 2) is farther than a (distance 1)
        pool.set_viewport(Some(1));
        let evicted = hydrate(&mut pool, "a", &map).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id.as_str(), "d");
    }

    #[tokio::test]
    async fn test_without_viewport_evicts_least_recently_opened() {
        let mut pool = pool(2);
        let map = positions(&["a", "b", "c"]);
        hydrate(&mut pool, "a", &map).await;
        hydrate(&mut pool, "b", &map).await;

        let evicted = hydrate(&mut pool, "c", &map).await;
        assert_eq!(evicted[0].id.as_str(), "a");
    }

    #[tokio::test]
    async fn test_pinned_resources_are_never_evicted() {
        let mut pool = pool(1);
        let map = positions(&["a", "b"]);
        hydrate(&mut pool, "a", &map).await;
        pool.pin(VideoId::from("a"));

        let err = pool
            .reserve(&VideoId::from("b"), "https://cdn/b.mp4", |id| map.get(id).copied())
            .unwrap_err();
        assert_eq!(err, FeedError::ExhaustedResources { max_controllers: 1 });
        assert!(pool.get("a").is_some());
    }

    #[tokio::test]
    async fn test_opening_slots_count_against_ceiling() {
        let mut pool = pool(1);
        let _pending = pool
            .reserve(&VideoId::from("a"), "https://cdn/a.mp4", |_| None)
            .unwrap();
        let err = pool
            .reserve(&VideoId::from("b"), "https://cdn/b.mp4", |_| None)
            .unwrap_err();
        assert!(matches!(err, FeedError::ExhaustedResources { .. }));
        assert_eq!(pool.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_after_release_hands_resource_back() {
        let mut pool = pool(2);
        let id = VideoId::from("a");
        let reservation = pool.reserve(&id, "https://cdn/a.mp4", |_| None).unwrap();
        assert!(pool.release("a").is_none());

        let opened = reservation.pending.open().await;
        let resource = opened.result.unwrap();
        assert!(pool.commit(&id, opened.ticket, resource).is_err());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_checks_slot() {
        let mut pool = pool(2);
        let map = positions(&["a"]);
        hydrate(&mut pool, "a", &map).await;
        assert!(pool.resolve("a", ResourceHandle::Inline).is_none());
        assert!(pool.resolve("a", ResourceHandle::Pooled { slot: 999 }).is_none());
        assert!(pool.resolve("a", ResourceHandle::Pooled { slot: 1 }).is_some());
    }

    #[tokio::test]
    async fn test_release_all() {
        let mut pool = pool(3);
        let map = positions(&["a", "b"]);
        hydrate(&mut pool, "a", &map).await;
        hydrate(&mut pool, "b", &map).await;
        pool.pin(VideoId::from("a"));

        let released = pool.release_all();
        assert_eq!(released.len(), 2);
        assert!(pool.is_empty());
        assert!(!pool.is_pinned("a"));
        assert_eq!(pool.estimated_memory_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        struct NeverFactory;
        impl ResourceFactory for NeverFactory {
            fn open(
                &self,
                _locator: &str,
            ) -> BoxFuture<'static, Result<Arc<dyn PlaybackResource>, HydrationError>> {
                Box::pin(futures::future::pending())
            }
        }

        let mut pool = ResourcePool::new(Arc::new(NeverFactory), 1, 0, Duration::from_millis(50));
        let reservation = pool.reserve(&VideoId::from("a"), "x", |_| None).unwrap();
        let opened = reservation.pending.open().await;
        assert_eq!(opened.result.err(), Some(HydrationError::Timeout));
    }
}
