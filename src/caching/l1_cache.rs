use crate::model::Payload;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
struct L1Entry {
    value: Payload,
    expires_at: i64,
}

/// In-process bounded LRU tier. Expiry is honored on read; expired entries
/// are evicted lazily by the read that observes them.
#[derive(Debug)]
pub struct L1Cache {
    entries: Mutex<LruCache<(String, String), L1Entry>>,
}

impl L1Cache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        L1Cache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Payload> {
        let lookup = (namespace.to_string(), key.to_string());
        let mut entries = self.entries.lock();
        match entries.get(&lookup) {
            Some(entry) if entry.expires_at > Utc::now().timestamp() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(&lookup);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, namespace: &str, key: &str, value: Payload, expires_at: i64) {
        self.entries.lock().put(
            (namespace.to_string(), key.to_string()),
            L1Entry { value, expires_at },
        );
    }

    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .lock()
            .pop(&(namespace.to_string(), key.to_string()))
            .is_some()
    }

    /// Drops every entry belonging to `namespace`.
    pub fn remove_namespace(&self, namespace: &str) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<(String, String)> = entries
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn far_future() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = L1Cache::new(16);
        cache.put("hgnc", "PKD1", json!({"symbol": "PKD1"}), far_future());
        assert_eq!(cache.get("hgnc", "PKD1"), Some(json!({"symbol": "PKD1"})));
        assert_eq!(cache.get("hgnc", "PKD2"), None);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = L1Cache::new(16);
        cache.put("hgnc", "PKD1", json!(1), Utc::now().timestamp() - 1);
        assert_eq!(cache.get("hgnc", "PKD1"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = L1Cache::new(2);
        cache.put("ns", "a", json!(1), far_future());
        cache.put("ns", "b", json!(2), far_future());
        cache.put("ns", "c", json!(3), far_future());
        assert_eq!(cache.get("ns", "a"), None);
        assert_eq!(cache.get("ns", "c"), Some(json!(3)));
    }

    #[test]
    fn test_remove_namespace_leaves_others() {
        let cache = L1Cache::new(16);
        cache.put("panelapp", "PKD1", json!(1), far_future());
        cache.put("panelapp", "PKD2", json!(2), far_future());
        cache.put("hpo", "PKD1", json!(3), far_future());
        assert_eq!(cache.remove_namespace("panelapp"), 2);
        assert_eq!(cache.get("panelapp", "PKD1"), None);
        assert_eq!(cache.get("hpo", "PKD1"), Some(json!(3)));
    }
}
