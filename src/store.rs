//! Injected key-value collaborator for cross-step caching.
//!
//! Rather than an implicit global cache, runs receive an explicit store
//! through the [`ExecutionContext`](crate::ExecutionContext). Generate nodes
//! configured with a cache key consult it before invoking a provider.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A key-value store shared by the steps of a run.
///
/// Implementations must be safe to call from concurrent runs.
pub trait KeyValueStore: Send + Sync {
    /// Look up a value. Expired entries behave as absent.
    fn get(&self, key: &str) -> Option<Value>;

    /// Insert or replace a value.
    fn put(&self, key: &str, value: Value);

    /// Remove a value if present.
    fn remove(&self, key: &str);
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory [`KeyValueStore`] with optional time-to-live eviction.
///
/// Expired entries are dropped lazily on access and swept on insert.
///
/// # Example
///
/// ```rust
/// use graphflow::{KeyValueStore, MemoryStore};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// store.put("summary", json!("cached text"));
/// assert_eq!(store.get("summary"), Some(json!("cached text")));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl MemoryStore {
    /// Create a store whose entries never expire.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose entries expire `ttl` after insertion.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| !e.expired()).count()
    }

    /// Whether the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.expired() {
                entries.remove(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    fn put(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| !entry.expired());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put("k", json!({"n": 1}));
        assert_eq!(store.get("k"), Some(json!({"n": 1})));
        assert_eq!(store.len(), 1);

        store.put("k", json!(2));
        assert_eq!(store.get("k"), Some(json!(2)));

        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let store = MemoryStore::with_ttl(Duration::ZERO);
        store.put("k", json!("v"));
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn expired_entries_are_swept_on_insert() {
        let store = MemoryStore::with_ttl(Duration::ZERO);
        store.put("a", json!(1));
        store.put("b", json!(2));
        // The insert of "b" sweeps the already-expired "a".
        let entries = store.entries.lock().unwrap();
        assert!(!entries.contains_key("a"));
    }
}
