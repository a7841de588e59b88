//! Change tracking for rolling segment files
//!
//! Two-phase detection: a cheap modification-time check decides whether a
//! segment is worth hashing, and the content hash decides whether it is
//! worth uploading. Bytes identical to the last confirmed version are never
//! queued again, even if the timestamp moved.
//!
//! The tracker is plain owned state. The scan loop is its only writer, so it
//! carries no lock.

use super::fingerprint::ContentHash;
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

/// Result of the timestamp pre-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Unchanged,
    /// New file, or its modification time differs from the last observation.
    TimestampChanged,
}

/// Per-file modification times, content hashes, and the set of segments
/// confirmed changed but not yet handed to the uploader.
///
/// Invariant: every name in `pending` has an entry in `hashes`.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    mod_times: HashMap<String, SystemTime>,
    hashes: HashMap<String, ContentHash>,
    pending: BTreeSet<String>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `mtime` for `name`, reporting whether it differs from before.
    pub fn observe(&mut self, name: &str, mtime: SystemTime) -> Observation {
        match self.mod_times.get_mut(name) {
            Some(known) if *known == mtime => Observation::Unchanged,
            Some(known) => {
                *known = mtime;
                Observation::TimestampChanged
            }
            None => {
                self.mod_times.insert(name.to_string(), mtime);
                Observation::TimestampChanged
            }
        }
    }

    /// Dedup gate. Returns `true` and queues `name` only when `hash` differs
    /// from the last confirmed hash (or none is known).
    pub fn confirm_content_change(&mut self, name: &str, hash: ContentHash) -> bool {
        if self.hashes.get(name) == Some(&hash) {
            return false;
        }
        self.hashes.insert(name.to_string(), hash);
        self.pending.insert(name.to_string());
        true
    }

    /// Forget the stored timestamp so the next observation re-hashes the file.
    /// Used when hashing failed after the timestamp was already recorded.
    pub fn invalidate_timestamp(&mut self, name: &str) {
        self.mod_times.remove(name);
    }

    /// Take every queued name, leaving the pending set empty.
    pub fn drain_pending(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.pending)
    }

    /// Drop all state for names not in `current`. Returns how many
    /// tracked files were forgotten.
    pub fn prune(&mut self, current: &BTreeSet<String>) -> usize {
        let before = self.tracked_len();
        self.mod_times.retain(|name, _| current.contains(name.as_str()));
        self.hashes.retain(|name, _| current.contains(name.as_str()));
        self.pending.retain(|name| current.contains(name.as_str()));
        before - self.tracked_len()
    }

    /// Forget everything (pipeline reset).
    pub fn clear(&mut self) {
        self.mod_times.clear();
        self.hashes.clear();
        self.pending.clear();
    }

    /// Forget timestamps and pending names but keep confirmed hashes, so
    /// files left in place are re-hashed without being queued again.
    pub fn forget_timestamps(&mut self) {
        self.mod_times.clear();
        self.pending.clear();
    }

    /// Number of distinct names with any recorded state.
    pub fn tracked_len(&self) -> usize {
        let hashed_only = self
            .hashes
            .keys()
            .filter(|name| !self.mod_times.contains_key(*name))
            .count();
        self.mod_times.len() + hashed_only
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn hash_of(&self, name: &str) -> Option<ContentHash> {
        self.hashes.get(name).copied()
    }

    pub fn mtime_of(&self, name: &str) -> Option<SystemTime> {
        self.mod_times.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_observe_new_then_unchanged() {
        let mut tracker = ChangeTracker::new();
        assert_eq!(tracker.observe("a.ts", at(10)), Observation::TimestampChanged);
        assert_eq!(tracker.observe("a.ts", at(10)), Observation::Unchanged);
        assert_eq!(tracker.observe("a.ts", at(11)), Observation::TimestampChanged);
        assert_eq!(tracker.mtime_of("a.ts"), Some(at(11)));
    }

    #[test]
    fn test_unchanged_content_confirmed_once() {
        let mut tracker = ChangeTracker::new();
        let hash = ContentHash::of_bytes(b"payload");

        assert!(tracker.confirm_content_change("a.ts", hash));
        for _ in 0..5 {
            assert!(!tracker.confirm_content_change("a.ts", hash));
        }
        assert_eq!(tracker.drain_pending(), names(&["a.ts"]));
    }

    #[test]
    fn test_touched_file_with_same_bytes_is_not_queued() {
        let mut tracker = ChangeTracker::new();
        let hash = ContentHash::of_bytes(b"payload");

        tracker.observe("a.ts", at(1));
        assert!(tracker.confirm_content_change("a.ts", hash));
        tracker.drain_pending();

        assert_eq!(tracker.observe("a.ts", at(2)), Observation::TimestampChanged);
        assert!(!tracker.confirm_content_change("a.ts", hash));
        assert!(tracker.drain_pending().is_empty());
    }

    #[test]
    fn test_rewritten_content_is_queued() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"v1")));
        tracker.drain_pending();
        assert!(tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"v2")));
        assert_eq!(tracker.hash_of("a.ts"), Some(ContentHash::of_bytes(b"v2")));
        assert_eq!(tracker.pending_len(), 1);
    }

    #[test]
    fn test_drain_empties_pending() {
        let mut tracker = ChangeTracker::new();
        tracker.confirm_content_change("b.ts", ContentHash::of_bytes(b"b"));
        tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"a"));

        let drained: Vec<String> = tracker.drain_pending().into_iter().collect();
        assert_eq!(drained, ["a.ts", "b.ts"]);
        assert!(tracker.drain_pending().is_empty());
        assert!(tracker.hash_of("a.ts").is_some());
    }

    #[test]
    fn test_prune_forgets_removed_files() {
        let mut tracker = ChangeTracker::new();
        for name in ["a.ts", "b.ts"] {
            tracker.observe(name, at(1));
            tracker.confirm_content_change(name, ContentHash::of_bytes(name.as_bytes()));
        }

        let removed = tracker.prune(&names(&["b.ts"]));
        assert_eq!(removed, 1);
        assert_eq!(tracker.mtime_of("a.ts"), None);
        assert_eq!(tracker.hash_of("a.ts"), None);
        assert_eq!(tracker.drain_pending(), names(&["b.ts"]));
        assert_eq!(tracker.tracked_len(), 1);
    }

    #[test]
    fn test_recreated_file_is_new_after_prune() {
        let mut tracker = ChangeTracker::new();
        let hash = ContentHash::of_bytes(b"same bytes");

        tracker.observe("a.ts", at(1));
        tracker.confirm_content_change("a.ts", hash);
        tracker.drain_pending();

        tracker.prune(&names(&[]));

        // Same name, same mtime, same bytes: still treated as brand new.
        assert_eq!(tracker.observe("a.ts", at(1)), Observation::TimestampChanged);
        assert!(tracker.confirm_content_change("a.ts", hash));
    }

    #[test]
    fn test_invalidate_forces_rehash() {
        let mut tracker = ChangeTracker::new();
        assert_eq!(tracker.observe("a.ts", at(5)), Observation::TimestampChanged);
        tracker.invalidate_timestamp("a.ts");
        assert_eq!(tracker.observe("a.ts", at(5)), Observation::TimestampChanged);
        assert_eq!(tracker.observe("a.ts", at(5)), Observation::Unchanged);
    }

    #[test]
    fn test_pending_names_always_have_hashes() {
        let mut tracker = ChangeTracker::new();
        tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"a"));
        tracker.confirm_content_change("b.ts", ContentHash::of_bytes(b"b"));
        tracker.prune(&names(&["a.ts"]));

        for name in tracker.drain_pending() {
            assert!(tracker.hash_of(&name).is_some(), "{name} pending without hash");
        }
    }

    #[test]
    fn test_forget_timestamps_keeps_hashes() {
        let mut tracker = ChangeTracker::new();
        tracker.observe("a.ts", at(1));
        tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"a"));

        tracker.forget_timestamps();
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(tracker.mtime_of("a.ts"), None);
        assert!(tracker.hash_of("a.ts").is_some());

        assert_eq!(tracker.observe("a.ts", at(1)), Observation::TimestampChanged);
        assert!(!tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"a")));
        assert!(tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"b")));
    }

    #[test]
    fn test_clear() {
        let mut tracker = ChangeTracker::new();
        tracker.observe("a.ts", at(1));
        tracker.confirm_content_change("a.ts", ContentHash::of_bytes(b"a"));
        tracker.clear();
        assert_eq!(tracker.tracked_len(), 0);
        assert_eq!(tracker.pending_len(), 0);
    }
}
