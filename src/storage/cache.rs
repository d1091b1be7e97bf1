//! Loaded-view cache and the uncommitted-view tracker. Identity is the
//! canonical path key; one entry per backing file at a time.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::storage::lock::FileHandler;
use crate::view::View;

/// A cached table: the working copy of its view plus the lock handler
/// held since load.
pub struct CachedView {
    pub view: View,
    pub handler: Option<FileHandler>,
}

#[derive(Default)]
pub struct ViewCache {
    entries: HashMap<String, CachedView>,
}

impl ViewCache {
    pub fn get(&self, key: &str) -> Option<&CachedView> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CachedView> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: String, view: View, handler: Option<FileHandler>) {
        self.entries.insert(key, CachedView { view, handler });
    }

    pub fn remove(&mut self, key: &str) -> Option<CachedView> {
        self.entries.remove(key)
    }

    pub fn take_handler(&mut self, key: &str) -> Option<FileHandler> {
        self.entries.get_mut(key).and_then(|entry| entry.handler.take())
    }

    pub fn set_handler(&mut self, key: &str, handler: FileHandler) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.handler = Some(handler);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys currently cached, taken before a statement runs so its
    /// fresh loads can be told apart afterwards.
    pub fn snapshot(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Mark-and-sweep for a failed statement: drops entries loaded since
    /// `snapshot` unless they went dirty, so the next read goes back to
    /// disk. Dropping an entry releases its file lock.
    pub fn evict_fresh_since(&mut self, snapshot: &HashSet<String>, uncommitted: &UncommittedViews) {
        let fresh: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !snapshot.contains(*key) && !uncommitted.is_dirty(key))
            .cloned()
            .collect();
        for key in fresh {
            self.entries.remove(&key);
        }
    }

    /// Drops every entry, releasing all file locks.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Which cached views diverge from disk, split by how they got dirty.
/// Sets are ordered so commit walks files deterministically.
#[derive(Default, Debug, Clone)]
pub struct UncommittedViews {
    created: BTreeSet<String>,
    updated: BTreeSet<String>,
    temp_dirty: BTreeSet<String>,
}

impl UncommittedViews {
    pub fn mark_created(&mut self, key: &str) {
        self.created.insert(key.to_string());
    }

    pub fn mark_updated(&mut self, key: &str) {
        // A freshly created file stays in the created set even after
        // further updates; it still does not exist on disk.
        if !self.created.contains(key) {
            self.updated.insert(key.to_string());
        }
    }

    pub fn mark_temp_dirty(&mut self, key: &str) {
        self.temp_dirty.insert(key.to_string());
    }

    pub fn is_created(&self, key: &str) -> bool {
        self.created.contains(key)
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.created.contains(key) || self.updated.contains(key) || self.temp_dirty.contains(key)
    }

    pub fn created_keys(&self) -> Vec<String> {
        self.created.iter().cloned().collect()
    }

    pub fn updated_keys(&self) -> Vec<String> {
        self.updated.iter().cloned().collect()
    }

    pub fn temp_dirty_keys(&self) -> Vec<String> {
        self.temp_dirty.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.created.len() + self.updated.len() + self.temp_dirty.len()
    }

    pub fn discard(&mut self, key: &str) {
        self.created.remove(key);
        self.updated.remove(key);
        self.temp_dirty.remove(key);
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.updated.clear();
        self.temp_dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Header;

    #[test]
    fn created_files_do_not_become_updated() {
        let mut uncommitted = UncommittedViews::default();
        uncommitted.mark_created("/tmp/a.csv");
        uncommitted.mark_updated("/tmp/a.csv");
        assert!(uncommitted.is_created("/tmp/a.csv"));
        assert!(uncommitted.updated_keys().is_empty());
    }

    #[test]
    fn dirty_union_tracks_every_kind() {
        let mut uncommitted = UncommittedViews::default();
        uncommitted.mark_updated("/tmp/a.csv");
        uncommitted.mark_temp_dirty("tmp_view");
        assert!(uncommitted.is_dirty("/tmp/a.csv"));
        assert!(uncommitted.is_dirty("tmp_view"));
        assert_eq!(uncommitted.count(), 2);
        uncommitted.discard("/tmp/a.csv");
        assert!(!uncommitted.is_dirty("/tmp/a.csv"));
    }

    #[test]
    fn commit_order_is_sorted() {
        let mut uncommitted = UncommittedViews::default();
        uncommitted.mark_updated("/tmp/b.csv");
        uncommitted.mark_updated("/tmp/a.csv");
        assert_eq!(uncommitted.updated_keys(), vec!["/tmp/a.csv", "/tmp/b.csv"]);
    }

    #[test]
    fn cache_insert_and_remove() {
        let mut cache = ViewCache::default();
        let view = View::new(Header::new("t", &["a".to_string()]));
        cache.insert("k".to_string(), view, None);
        assert!(cache.contains("k"));
        assert!(cache.remove("k").is_some());
        assert!(!cache.contains("k"));
    }

    #[test]
    fn evict_fresh_keeps_prior_and_dirty_entries() {
        let mut cache = ViewCache::default();
        let view = || View::new(Header::new("t", &["a".to_string()]));
        cache.insert("old".to_string(), view(), None);
        let snapshot = cache.snapshot();

        // Two loads after the snapshot; one goes dirty.
        cache.insert("fresh".to_string(), view(), None);
        cache.insert("written".to_string(), view(), None);
        let mut uncommitted = UncommittedViews::default();
        uncommitted.mark_updated("written");

        cache.evict_fresh_since(&snapshot, &uncommitted);
        assert!(cache.contains("old"));
        assert!(cache.contains("written"));
        assert!(!cache.contains("fresh"));
    }
}
