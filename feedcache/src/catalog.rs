//! Canonical ordered list of videos.
//!
//! The catalog keeps two insertion-ordered segments: *primary* for authors in
//! the following set and *discovery* for everyone else. The flattened view
//! (primary, then discovery) is the index space every other component uses.
//!
//! Segment assignment is decided once, at insertion time. Replacing the
//! following set later never moves an entry that is already displayed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{FeedError, FeedResult};
use crate::model::{VideoId, VideoIdentity};

/// Which partition of the catalog an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Primary,
    Discovery,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    identity: Arc<VideoIdentity>,
    /// Global insertion sequence, used for oldest-first eviction.
    seq: u64,
}

/// Result of a catalog insertion.
#[derive(Debug, Clone, Default)]
pub struct CatalogInsert {
    /// Segment the identity was appended to, `None` for a duplicate.
    pub segment: Option<Segment>,
    /// Identities dropped to stay within the size limit, oldest first.
    pub evicted: Vec<Arc<VideoIdentity>>,
}

impl CatalogInsert {
    pub fn inserted(&self) -> bool {
        self.segment.is_some()
    }
}

/// Ordered, bounded catalog of video identities.
#[derive(Debug)]
pub struct VideoCatalog {
    primary: VecDeque<CatalogEntry>,
    discovery: VecDeque<CatalogEntry>,
    segments: HashMap<VideoId, Segment>,
    following: HashSet<String>,
    max_videos: usize,
    next_seq: u64,
}

impl VideoCatalog {
    /// Create an empty catalog retaining at most `max_videos` identities.
    pub fn new(max_videos: usize) -> Self {
        Self {
            primary: VecDeque::new(),
            discovery: VecDeque::new(),
            segments: HashMap::new(),
            following: HashSet::new(),
            max_videos: max_videos.max(1),
            next_seq: 0,
        }
    }

    /// Add an identity.
    ///
    /// Duplicates are a no-op. When the insertion pushes the catalog above
    /// its limit, the oldest entries by insertion order are evicted and
    /// returned so the caller can dispose their resources.
    pub fn add(&mut self, identity: Arc<VideoIdentity>) -> FeedResult<CatalogInsert> {
        if identity.id.is_empty() {
            return Err(FeedError::InvalidInput("video id is empty".to_string()));
        }
        if identity.source_locator.trim().is_empty() {
            return Err(FeedError::InvalidInput(format!(
                "source locator of {} is empty",
                identity.id
            )));
        }
        if self.segments.contains_key(&identity.id) {
            return Ok(CatalogInsert::default());
        }

        let segment = if self.following.contains(&identity.author_id) {
            Segment::Primary
        } else {
            Segment::Discovery
        };
        let entry = CatalogEntry {
            identity: Arc::clone(&identity),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.segments.insert(identity.id.clone(), segment);
        match segment {
            Segment::Primary => self.primary.push_back(entry),
            Segment::Discovery => self.discovery.push_back(entry),
        }

        let mut evicted = Vec::new();
        while self.len() > self.max_videos {
            match self.pop_oldest() {
                Some(identity) => evicted.push(identity),
                None => break,
            }
        }

        Ok(CatalogInsert {
            segment: Some(segment),
            evicted,
        })
    }

    /// Remove and return the oldest entry across both segments.
    fn pop_oldest(&mut self) -> Option<Arc<VideoIdentity>> {
        let take_primary = match (self.primary.front(), self.discovery.front()) {
            (Some(p), Some(d)) => p.seq < d.seq,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        let entry = if take_primary {
            self.primary.pop_front()
        } else {
            self.discovery.pop_front()
        }?;
        self.segments.remove(&entry.identity.id);
        Some(entry.identity)
    }

    /// Primary segment followed by discovery segment.
    pub fn flattened(&self) -> Vec<Arc<VideoIdentity>> {
        self.iter().cloned().collect()
    }

    /// Iterate in flattened order without allocating.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<VideoIdentity>> + '_ {
        self.primary
            .iter()
            .chain(self.discovery.iter())
            .map(|entry| &entry.identity)
    }

    /// Identity at a flattened index.
    pub fn at(&self, index: usize) -> Option<&Arc<VideoIdentity>> {
        if index < self.primary.len() {
            self.primary.get(index).map(|e| &e.identity)
        } else {
            self.discovery
                .get(index - self.primary.len())
                .map(|e| &e.identity)
        }
    }

    /// Flattened index of an id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        match self.segments.get(id)? {
            Segment::Primary => self.primary.iter().position(|e| e.identity.id.as_str() == id),
            Segment::Discovery => self
                .discovery
                .iter()
                .position(|e| e.identity.id.as_str() == id)
                .map(|pos| pos + self.primary.len()),
        }
    }

    /// Map of every id to its flattened index.
    pub fn positions(&self) -> HashMap<VideoId, usize> {
        self.iter()
            .enumerate()
            .map(|(index, identity)| (identity.id.clone(), index))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<VideoIdentity>> {
        self.index_of(id).and_then(|index| self.at(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.segments.contains_key(id)
    }

    pub fn segment_of(&self, id: &str) -> Option<Segment> {
        self.segments.get(id).copied()
    }

    /// Replace the following set used for future insertions.
    pub fn update_following_set<I, S>(&mut self, author_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.following = author_ids.into_iter().map(Into::into).collect();
    }

    pub fn is_following(&self, author_id: &str) -> bool {
        self.following.contains(author_id)
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.discovery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn primary_len(&self) -> usize {
        self.primary.len()
    }

    pub fn discovery_len(&self) -> usize {
        self.discovery.len()
    }

    pub fn max_videos(&self) -> usize {
        self.max_videos
    }

    /// Drop every entry, returning them in flattened order.
    pub fn clear(&mut self) -> Vec<Arc<VideoIdentity>> {
        let drained = self.flattened();
        self.primary.clear();
        self.discovery.clear();
        self.segments.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity(id: &str, author: &str) -> Arc<VideoIdentity> {
        Arc::new(VideoIdentity::new(id, format!("https://cdn/{id}.mp4"), author, 0))
    }

    fn ids(catalog: &VideoCatalog) -> Vec<String> {
        catalog.iter().map(|i| i.id.to_string()).collect()
    }

    #[test]
    fn test_add_rejects_empty_id_and_locator() {
        let mut catalog = VideoCatalog::new(10);

        let err = catalog.add(identity("", "alice")).unwrap_err();
        assert!(matches!(err, FeedError::InvalidInput(_)));

        let blank = Arc::new(VideoIdentity::new("v1", "  ", "alice", 0));
        let err = catalog.add(blank).unwrap_err();
        assert!(matches!(err, FeedError::InvalidInput(_)));

        assert!(catalog.is_empty());
    }

    #[test]
    fn test_followed_authors_go_to_primary() {
        let mut catalog = VideoCatalog::new(10);
        catalog.update_following_set(["alice"]);

        catalog.add(identity("d1", "bob")).unwrap();
        catalog.add(identity("p1", "alice")).unwrap();
        catalog.add(identity("d2", "carol")).unwrap();
        catalog.add(identity("p2", "alice")).unwrap();

        assert_eq!(ids(&catalog), vec!["p1", "p2", "d1", "d2"]);
        assert_eq!(catalog.primary_len(), 2);
        assert_eq!(catalog.discovery_len(), 2);
        assert_eq!(catalog.index_of("d1"), Some(2));
        assert_eq!(catalog.at(1).unwrap().id.as_str(), "p2");
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut catalog = VideoCatalog::new(10);
        assert!(catalog.add(identity("v1", "bob")).unwrap().inserted());
        let second = catalog.add(identity("v1", "bob")).unwrap();
        assert!(!second.inserted());
        assert!(second.evicted.is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_following_change_does_not_move_existing_entries() {
        let mut catalog = VideoCatalog::new(10);
        catalog.add(identity("v1", "alice")).unwrap();
        catalog.update_following_set(["alice"]);
        catalog.add(identity("v2", "alice")).unwrap();

        assert_eq!(catalog.segment_of("v1"), Some(Segment::Discovery));
        assert_eq!(catalog.segment_of("v2"), Some(Segment::Primary));
        assert_eq!(ids(&catalog), vec!["v2", "v1"]);
    }

    #[test]
    fn test_eviction_drops_oldest_insertion_first() {
        let mut catalog = VideoCatalog::new(3);
        catalog.update_following_set(["alice"]);

        catalog.add(identity("d1", "bob")).unwrap();
        catalog.add(identity("p1", "alice")).unwrap();
        catalog.add(identity("d2", "bob")).unwrap();
        let result = catalog.add(identity("p2", "alice")).unwrap();

        let evicted: Vec<_> = result.evicted.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(evicted, vec!["d1"]);
        assert_eq!(ids(&catalog), vec!["p1", "p2", "d2"]);
        assert!(!catalog.contains("d1"));
    }

    #[test]
    fn test_fifteen_into_ten() {
        let mut catalog = VideoCatalog::new(10);
        for i in 0..15 {
            catalog.add(identity(&format!("v{i}"), "bob")).unwrap();
        }
        assert_eq!(catalog.len(), 10);
        for i in 0..5 {
            assert!(!catalog.contains(&format!("v{i}")));
        }
        assert_eq!(catalog.at(0).unwrap().id.as_str(), "v5");
    }

    #[test]
    fn test_positions_match_index_of() {
        let mut catalog = VideoCatalog::new(10);
        catalog.update_following_set(["alice"]);
        for (id, author) in [("a", "bob"), ("b", "alice"), ("c", "bob")] {
            catalog.add(identity(id, author)).unwrap();
        }
        let positions = catalog.positions();
        for id in ["a", "b", "c"] {
            assert_eq!(positions.get(id).copied(), catalog.index_of(id));
        }
    }

    proptest! {
        #[test]
        fn prop_flattened_is_primary_then_discovery(
            followed in proptest::collection::vec(any::<bool>(), 0..60)
        ) {
            let mut catalog = VideoCatalog::new(1000);
            catalog.update_following_set(["alice"]);
            let mut expected_primary = Vec::new();
            let mut expected_discovery = Vec::new();

            for (i, is_followed) in followed.iter().enumerate() {
                let id = format!("v{i}");
                let author = if *is_followed { "alice" } else { "bob" };
                catalog.add(identity(&id, author)).unwrap();
                if *is_followed {
                    expected_primary.push(id);
                } else {
                    expected_discovery.push(id);
                }
            }

            expected_primary.extend(expected_discovery);
            prop_assert_eq!(ids(&catalog), expected_primary);
        }

        #[test]
        fn prop_catalog_is_bounded_and_keeps_newest(
            max in 1usize..20,
            extra in 1usize..20,
            followed in proptest::collection::vec(any::<bool>(), 40)
        ) {
            let mut catalog = VideoCatalog::new(max);
            catalog.update_following_set(["alice"]);
            let total = max + extra;

            for i in 0..total {
                let author = if followed[i % followed.len()] { "alice" } else { "bob" };
                catalog.add(identity(&format!("v{i}"), author)).unwrap();
            }

            prop_assert_eq!(catalog.len(), max);
            for i in 0..total {
                prop_assert_eq!(catalog.contains(&format!("v{i}")), i >= total - max);
            }
        }
    }
}
