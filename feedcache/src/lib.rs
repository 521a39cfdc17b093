//! FeedCache - memory-bounded video feed cache and preload engine
//!
//! This library turns a continuously arriving stream of short-video
//! identities into a stable, playable feed. It keeps the canonical ordered
//! list of videos, drives every video through a loading state machine,
//! bounds how many heavyweight playback resources exist at once, and retries
//! unreliable sources with exponential backoff before giving up on them.
//!
//! Hosts talk to [`VideoFeedManager`] and plug in their media stack through
//! [`ResourceFactory`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod failure;
pub mod logging;
pub mod manager;
pub mod model;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod telemetry;

pub use config::{FeedConfig, PreloadRange};
pub use error::{FeedError, FeedResult, HydrationError};
pub use events::{FeedEvent, ReleaseReason};
pub use manager::VideoFeedManager;
pub use model::{LoadingState, ResourceHandle, VideoId, VideoIdentity, VideoRecord};
pub use pool::{BoxFuture, PlaybackResource, ResourceFactory};
pub use telemetry::FeedDiagnostics;
