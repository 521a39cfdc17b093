//! Memo of source locators that exhausted their retries.
//!
//! Once a locator has failed permanently, any other identity pointing at the
//! same source is skipped instead of spending a hydration attempt on it. The
//! memo is cleared on memory pressure so sources that failed because of a
//! transient outage get a fresh chance.

use std::collections::HashSet;

/// Known-bad source locators.
#[derive(Debug, Default)]
pub struct FailurePatternTracker {
    known_bad: HashSet<String>,
}

impl FailurePatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locator as known-bad. Returns `true` if it was new.
    pub fn record(&mut self, locator: &str) -> bool {
        self.known_bad.insert(locator.to_string())
    }

    pub fn is_known_bad(&self, locator: &str) -> bool {
        self.known_bad.contains(locator)
    }

    /// Forget every known-bad locator.
    pub fn clear(&mut self) -> usize {
        let cleared = self.known_bad.len();
        self.known_bad.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.known_bad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_bad.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut tracker = FailurePatternTracker::new();
        assert!(!tracker.is_known_bad("https://cdn/a.mp4"));

        assert!(tracker.record("https://cdn/a.mp4"));
        assert!(!tracker.record("https://cdn/a.mp4"));
        assert!(tracker.is_known_bad("https://cdn/a.mp4"));
        assert!(!tracker.is_known_bad("https://cdn/b.mp4"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_clear_gives_sources_a_fresh_chance() {
        let mut tracker = FailurePatternTracker::new();
        tracker.record("https://cdn/a.mp4");
        tracker.record("https://cdn/b.mp4");

        assert_eq!(tracker.clear(), 2);
        assert!(tracker.is_empty());
        assert!(!tracker.is_known_bad("https://cdn/a.mp4"));
    }
}
