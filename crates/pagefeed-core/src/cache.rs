//! In-memory result cache.
//!
//! Holds the latest known result per query id. Entries are superseded,
//! never removed.

use pagefeed_protocol::QueryResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Latest known result per page path or static query hash.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    entries: HashMap<String, Arc<QueryResult>>,
}

impl ResultCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the result stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<QueryResult>> {
        self.entries.get(id).cloned()
    }

    /// Store a result under `id`, replacing whatever was there.
    ///
    /// Returns the replaced entry, if any. There is no ordering check: a
    /// stale result written last wins.
    pub fn set(
        &mut self,
        id: impl Into<String>,
        result: impl Into<Arc<QueryResult>>,
    ) -> Option<Arc<QueryResult>> {
        self.entries.insert(id.into(), result.into())
    }

    /// Check if a result is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Merge `other` into this cache. Entries already present here win.
    ///
    /// Returns the number of entries added.
    pub fn merge(&mut self, other: ResultCache) -> usize {
        let mut added = 0;
        for (id, result) in other.entries {
            if let std::collections::hash_map::Entry::Vacant(slot) = self.entries.entry(id) {
                slot.insert(result);
                added += 1;
            }
        }
        added
    }

    /// All stored results, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<QueryResult>> {
        self.entries.values().cloned().collect()
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get() {
        let mut cache = ResultCache::new();
        assert!(cache.get("/").is_none());

        assert!(cache
            .set("/", QueryResult::new("/", json!({"v": 1})))
            .is_none());
        assert_eq!(cache.get("/").unwrap().result, json!({"v": 1}));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_overwrites_without_merging() {
        let mut cache = ResultCache::new();
        cache.set("/a/", QueryResult::new("/a/", json!({"x": 1, "y": 2})));
        let previous = cache.set("/a/", QueryResult::new("/a/", json!({"x": 3})));

        assert_eq!(previous.unwrap().result, json!({"x": 1, "y": 2}));
        assert_eq!(cache.get("/a/").unwrap().result, json!({"x": 3}));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut known = ResultCache::new();
        known.set("h1", QueryResult::new("h1", json!("fresh")));

        let mut loaded = ResultCache::new();
        loaded.set("h1", QueryResult::new("h1", json!("stale")));
        loaded.set("h2", QueryResult::new("h2", json!("disk")));

        assert_eq!(known.merge(loaded), 1);
        assert_eq!(known.get("h1").unwrap().result, json!("fresh"));
        assert_eq!(known.get("h2").unwrap().result, json!("disk"));
    }

    #[test]
    fn test_snapshot() {
        let mut cache = ResultCache::new();
        cache.set("h1", QueryResult::new("h1", json!(1)));
        cache.set("h2", QueryResult::new("h2", json!(2)));

        let mut ids: Vec<String> = cache.snapshot().iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["h1", "h2"]);
    }
}
