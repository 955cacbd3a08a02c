//! Remembered live query orderings
//!
//! A live query started with a [`CacheKey`] stores its final ordering when
//! it stops. The next start under the same key reuses that ordering instead
//! of sorting again, provided the request is the same and the matching
//! records have not changed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::NotebookId;
use crate::storage::persistence::{CacheRow, CacheWrite};

/// Name of a cached ordering
///
/// Keys are derived from the identity of what the query filters on, so two
/// different filters never share a key by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for the list of all notebooks
    pub fn notebooks() -> Self {
        Self("notebooks".to_string())
    }

    /// Key for the notes of one notebook
    pub fn notes_in(notebook: NotebookId) -> Self {
        Self(format!("notes:{}", notebook))
    }

    /// Free-form key, namespaced away from the derived ones
    pub fn named(name: impl AsRef<str>) -> Self {
        Self(format!("named:{}", name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordering remembered under one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Identifies the request the ordering was computed for
    pub fingerprint: String,
    /// Record ids, in order
    pub ordering: Vec<String>,
}

/// In-memory cache with the writes still owed to storage
#[derive(Debug, Default)]
pub(crate) struct QueryCache {
    entries: HashMap<CacheKey, CacheEntry>,
    pending: Vec<CacheWrite>,
}

impl QueryCache {
    /// Rebuild from persisted rows, skipping any that no longer parse
    pub(crate) fn from_rows(rows: Vec<CacheRow>) -> Self {
        let mut entries = HashMap::new();
        for row in rows {
            match serde_json::from_str(&row.ordering) {
                Ok(ordering) => {
                    entries.insert(
                        CacheKey(row.name),
                        CacheEntry {
                            fingerprint: row.fingerprint,
                            ordering,
                        },
                    );
                }
                Err(e) => warn!(name = %row.name, error = %e, "Discarding unreadable query cache"),
            }
        }
        Self {
            entries,
            pending: Vec::new(),
        }
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        if self.entries.get(&key) == Some(&entry) {
            return;
        }
        match serde_json::to_string(&entry.ordering) {
            Ok(ordering) => self.pending.push(CacheWrite::Put {
                name: key.0.clone(),
                fingerprint: entry.fingerprint.clone(),
                ordering,
            }),
            Err(e) => warn!(key = %key, error = %e, "Query cache not persisted"),
        }
        self.entries.insert(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) {
        if self.entries.remove(key).is_some() {
            self.pending.push(CacheWrite::Delete(key.0.clone()));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.pending.push(CacheWrite::DeleteAll);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending(&self) -> &[CacheWrite] {
        &self.pending
    }

    pub(crate) fn mark_saved(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ids: &[&str]) -> CacheEntry {
        CacheEntry {
            fingerprint: "note|all|creation-asc".to_string(),
            ordering: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_keys_differ_per_notebook() {
        let a = NotebookId::from_uuid(uuid::Uuid::new_v4());
        let b = NotebookId::from_uuid(uuid::Uuid::new_v4());
        assert_ne!(CacheKey::notes_in(a), CacheKey::notes_in(b));
        assert_eq!(CacheKey::notes_in(a), CacheKey::notes_in(a));
    }

    #[test]
    fn test_named_keys_cannot_collide_with_derived() {
        assert_ne!(CacheKey::named("notebooks"), CacheKey::notebooks());
    }

    #[test]
    fn test_put_queues_one_write() {
        let mut cache = QueryCache::default();
        cache.put(CacheKey::notebooks(), entry(&["a", "b"]));
        cache.put(CacheKey::notebooks(), entry(&["a", "b"]));

        assert_eq!(cache.pending().len(), 1);
        assert_eq!(cache.get(&CacheKey::notebooks()), Some(&entry(&["a", "b"])));

        cache.mark_saved();
        assert!(!cache.has_pending());
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        let mut cache = QueryCache::default();
        cache.remove(&CacheKey::notebooks());
        assert!(!cache.has_pending());
    }

    #[test]
    fn test_clear_replaces_pending_with_delete_all() {
        let mut cache = QueryCache::default();
        cache.put(CacheKey::notebooks(), entry(&["a"]));
        cache.clear();

        assert_eq!(cache.pending(), &[CacheWrite::DeleteAll]);
        assert!(cache.get(&CacheKey::notebooks()).is_none());
    }

    #[test]
    fn test_from_rows_skips_unreadable() {
        let cache = QueryCache::from_rows(vec![
            CacheRow {
                name: "notebooks".to_string(),
                fingerprint: "fp".to_string(),
                ordering: r#"["a","b"]"#.to_string(),
            },
            CacheRow {
                name: "named:broken".to_string(),
                fingerprint: "fp".to_string(),
                ordering: "not json".to_string(),
            },
        ]);

        assert_eq!(
            cache.get(&CacheKey::notebooks()).map(|e| e.ordering.len()),
            Some(2)
        );
        assert!(cache.get(&CacheKey::named("broken")).is_none());
        assert!(!cache.has_pending());
    }
}
