//! L1: bounded in-process LRU with per-entry expiry

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct L1Entry {
    data: Arc<[u8]>,
    expires_at: Instant,
    tags: Vec<String>,
}

#[derive(Debug)]
pub struct L1Cache {
    entries: Mutex<LruCache<String, L1Entry>>,
    default_ttl: Duration,
}

impl L1Cache {
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    /// Fresh value for `key`; an expired entry is dropped and reported as a miss
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(key)
            .map(|entry| (entry.expires_at > Instant::now(), Arc::clone(&entry.data)));
        match fresh {
            Some((true, data)) => Some(data),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Insert with `min(ttl, default_ttl)`
    pub fn insert(&self, key: &str, data: Arc<[u8]>, ttl: Option<Duration>, tags: &[String]) {
        let ttl = ttl.map_or(self.default_ttl, |t| t.min(self.default_ttl));
        self.entries.lock().put(
            key.to_string(),
            L1Entry {
                data,
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        self.remove_where(|key, _| key.starts_with(prefix))
    }

    pub fn remove_tag(&self, tag: &str) -> usize {
        self.remove_where(|_, entry| entry.tags.iter().any(|t| t == tag))
    }

    /// Drop every expired entry
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        self.remove_where(|_, entry| entry.expires_at <= now)
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &L1Entry) -> bool,
    {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn evicts_least_recently_used() {
        let l1 = L1Cache::new(2, Duration::from_secs(60));
        l1.insert("a", bytes("1"), None, &[]);
        l1.insert("b", bytes("2"), None, &[]);
        assert!(l1.get("a").is_some());
        l1.insert("c", bytes("3"), None, &[]);
        assert!(l1.get("b").is_none());
        assert!(l1.get("a").is_some());
        assert_eq!(l1.len(), 2);
    }

    #[test]
    fn expired_entries_miss() {
        let l1 = L1Cache::new(8, Duration::from_secs(60));
        l1.insert("a", bytes("1"), Some(Duration::from_millis(10)), &[]);
        std::thread::sleep(Duration::from_millis(20));
        assert!(l1.get("a").is_none());
        assert!(l1.is_empty());
    }

    #[test]
    fn removes_by_tag_and_prefix() {
        let l1 = L1Cache::new(8, Duration::from_secs(60));
        l1.insert("scrape:user:1", bytes("1"), None, &["user:1".to_string()]);
        l1.insert("scrape:video:1", bytes("2"), None, &["user:1".to_string()]);
        l1.insert("scrape:video:2", bytes("3"), None, &[]);
        assert_eq!(l1.remove_tag("user:1"), 2);
        assert_eq!(l1.remove_prefix("scrape:video:"), 1);
        assert!(l1.is_empty());
    }
}
