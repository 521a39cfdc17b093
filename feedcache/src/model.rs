//! Core data types shared by every feed cache component.
//!
//! Identities are immutable and shared as `Arc<VideoIdentity>`; the mutable
//! per-video [`VideoRecord`] lives only inside the state store.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::HydrationError;

/// Unique identity of a video, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(Arc<str>);

impl VideoId {
    /// Create a new video id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (rejected on insertion).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for VideoId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VideoId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl std::borrow::Borrow<str> for VideoId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one video, as produced by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoIdentity {
    /// Unique id.
    pub id: VideoId,
    /// Source URL the playback resource is opened from.
    pub source_locator: String,
    /// Author id, matched against the following set on insertion.
    pub author_id: String,
    /// Logical creation timestamp.
    pub created_at: u64,
    /// Playable without hydration (e.g. an animated image).
    pub instantly_playable: bool,
}

impl VideoIdentity {
    /// Create an identity that requires hydration.
    pub fn new(
        id: impl Into<VideoId>,
        source_locator: impl Into<String>,
        author_id: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source_locator: source_locator.into(),
            author_id: author_id.into(),
            created_at,
            instantly_playable: false,
        }
    }

    /// Mark the identity as instantly playable.
    pub fn instantly_playable(mut self) -> Self {
        self.instantly_playable = true;
        self
    }
}

/// Loading state of one video.
///
/// ```text
/// NotLoaded --begin--> Loading --succeed--> Ready --release--> NotLoaded
///                      Loading --fail-----> Failed --begin--> Loading
///                      Loading --abort----> NotLoaded
///                                           Failed --exhaust--> PermanentlyFailed
/// any non-terminal --dispose--> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadingState {
    NotLoaded,
    Loading,
    Ready,
    Failed,
    PermanentlyFailed,
    Disposed,
}

impl LoadingState {
    /// All states, in display order.
    pub const ALL: [LoadingState; 6] = [
        LoadingState::NotLoaded,
        LoadingState::Loading,
        LoadingState::Ready,
        LoadingState::Failed,
        LoadingState::PermanentlyFailed,
        LoadingState::Disposed,
    ];

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadingState::Disposed | LoadingState::PermanentlyFailed)
    }

    /// Whether a video in this state belongs in the playable view.
    pub fn is_playable(&self) -> bool {
        !self.is_terminal()
    }

    /// Short label for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingState::NotLoaded => "not_loaded",
            LoadingState::Loading => "loading",
            LoadingState::Ready => "ready",
            LoadingState::Failed => "failed",
            LoadingState::PermanentlyFailed => "permanently_failed",
            LoadingState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Back-reference from a record to its playback resource.
///
/// Never owns the resource: `Pooled` is a slot in the resource pool's table,
/// `Inline` marks an instantly playable video that needs no resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Pooled { slot: u64 },
    Inline,
}

/// Mutable per-video state, owned exclusively by the state store.
#[derive(Debug, Clone)]
pub struct VideoRecord {
    pub identity: Arc<VideoIdentity>,
    pub state: LoadingState,
    /// Number of failed hydration attempts so far.
    pub retry_count: u32,
    pub last_error: Option<HydrationError>,
    /// Present if and only if `state == Ready`.
    pub resource: Option<ResourceHandle>,
}

impl VideoRecord {
    /// Create a fresh `NotLoaded` record.
    pub fn new(identity: Arc<VideoIdentity>) -> Self {
        Self {
            identity,
            state: LoadingState::NotLoaded,
            retry_count: 0,
            last_error: None,
            resource: None,
        }
    }

    pub fn id(&self) -> &VideoId {
        &self.identity.id
    }

    pub fn locator(&self) -> &str {
        &self.identity.source_locator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_borrow_and_display() {
        let id = VideoId::from("abc");
        assert_eq!(id.as_str(), "abc");
        assert_eq!(id.to_string(), "abc");
        assert!(!id.is_empty());
        assert!(VideoId::from("").is_empty());

        let mut set = std::collections::HashSet::new();
        set.insert(id.clone());
        assert!(set.contains("abc"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(LoadingState::Disposed.is_terminal());
        assert!(LoadingState::PermanentlyFailed.is_terminal());
        for state in [
            LoadingState::NotLoaded,
            LoadingState::Loading,
            LoadingState::Ready,
            LoadingState::Failed,
        ] {
            assert!(!state.is_terminal(), "{state} should not be terminal");
            assert!(state.is_playable());
        }
    }

    #[test]
    fn test_new_record_is_not_loaded() {
        let identity = Arc::new(VideoIdentity::new("v1", "https://cdn/v1.mp4", "alice", 1));
        let record = VideoRecord::new(identity);
        assert_eq!(record.state, LoadingState::NotLoaded);
        assert_eq!(record.retry_count, 0);
        assert!(record.resource.is_none());
        assert_eq!(record.locator(), "https://cdn/v1.mp4");
    }

    #[test]
    fn test_identity_serializes_id_transparently() {
        let identity = VideoIdentity::new("v1", "https://cdn/v1.mp4", "alice", 7).instantly_playable();
        let json = serde_json::to_string(&identity).unwrap();
        assert!(json.contains("\"id\":\"v1\""));
        assert!(identity.instantly_playable);
    }

    #[test]
    fn test_identity_deserializes_from_json() {
        let json = r#"{"id":"v9","source_locator":"https://cdn/v9.mp4","author_id":"bob","created_at":3,"instantly_playable":false}"#;
        let identity: VideoIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.id, VideoId::from("v9"));
        assert_eq!(identity.author_id, "bob");
    }
}
