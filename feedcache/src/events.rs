//! Change notifications for feed consumers.
//!
//! Every public mutating call on the manager emits exactly one event, sent
//! synchronously in issue order on a `tokio::sync::broadcast` channel. The
//! channel is closed once, when the manager is disposed; later subscribers
//! receive an already-closed receiver.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{LoadingState, VideoId};

/// Default capacity of the notification channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why resources were released in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    MemoryPressure,
    Disposed,
}

/// A change observable by feed consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// The flattened catalog changed: insertion, evictions, or both.
    CatalogChanged {
        added: Option<VideoId>,
        evicted: Vec<VideoId>,
        len: usize,
    },
    /// The following set was replaced.
    FollowingChanged { authors: usize },
    /// A video reached a new loading state.
    StateChanged { id: VideoId, state: LoadingState },
    /// Several resources were released at once.
    ///
    /// Follows the per-video `StateChanged` events of a memory-pressure
    /// release. On disposal it is the only notice.
    ResourcesReleased {
        ids: Vec<VideoId>,
        reason: ReleaseReason,
    },
}

/// Broadcast sender that can be closed exactly once.
#[derive(Debug)]
pub struct EventChannel {
    sender: Mutex<Option<broadcast::Sender<FeedEvent>>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Send an event to current subscribers. No-op once closed.
    pub fn emit(&self, event: FeedEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // No subscribers is not an error.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (_, receiver) = broadcast::channel(1);
                receiver
            }
        }
    }

    /// Close the channel. Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}
