//! L2: larger, longer-lived, shared cache tier
//!
//! [`RemoteCache`] is the seam to a distributed key/value store. Values arrive
//! already encoded (see `codec`). [`InMemoryRemoteCache`] implements the same
//! contract in-process, including tag sets and the optional fetch lock.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[String]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Keys currently associated with `tag`
    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>>;
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    /// Take a short-lived exclusive lock; `false` when someone else holds it
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<bool>;
    async fn unlock(&self, name: &str) -> Result<()>;
    async fn purge_expired(&self) -> Result<usize>;
}

struct L2Entry {
    data: Vec<u8>,
    expires_at: Instant,
    tags: Vec<String>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, L2Entry>,
    tags: HashMap<String, HashSet<String>>,
    locks: HashMap<String, Instant>,
}

impl State {
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for tag in entry.tags {
            if let Some(keys) = self.tags.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(&tag);
                }
            }
        }
        true
    }
}

#[derive(Default)]
pub struct InMemoryRemoteCache {
    state: Mutex<State>,
}

impl InMemoryRemoteCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored bytes, for inspecting the encoding
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().entries.get(key).map(|e| e.data.clone())
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            state.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        state.remove(key);
        for tag in tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        state.entries.insert(
            key.to_string(),
            L2Entry {
                data: value,
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().remove(key))
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        Ok(doomed.len())
    }

    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        let now = Instant::now();
        match state.locks.get(name) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                state.locks.insert(name.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        self.state.lock().locks.remove(name);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        state.locks.retain(|_, expires| *expires > now);
        Ok(doomed.len())
    }
}
