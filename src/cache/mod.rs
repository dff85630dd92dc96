//! Multi-tier cache with single-flight fetches
//!
//! Lookup order is L1 (bounded, in-process, short TTL) then L2 (shared, longer
//! TTL). An L2 hit is promoted into L1. On a full miss the caller's fetch
//! function runs at most once per key within the process; concurrent callers
//! for the same key wait for that fetch and read its result from the cache.
//! With `distributed_lock` enabled an L2 lock extends this across processes.
//!
//! The cache is never the system of record: L2 errors are logged, counted and
//! treated as misses.

pub mod codec;
pub mod key;
pub mod l1;
pub mod l2;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use key::{CacheKey, KeyPattern};
pub use l1::L1Cache;
pub use l2::{InMemoryRemoteCache, RemoteCache};

use crate::config::CacheSettings;
use crate::error::{ErrorKind, ScrapeError, ScrapeResult};
use crate::metrics::ScraperMetrics;

/// Longest a process holds the cross-process fetch lock
const FETCH_LOCK_TTL: Duration = Duration::from_secs(30);
const FETCH_LOCK_POLL: Duration = Duration::from_millis(50);

/// Clears the single-flight gate for `key` once no caller holds it, including
/// when the fetching future is dropped mid-flight
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    key: &'a str,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // Only the map's own reference left
        self.inflight
            .remove_if(self.key, |_, g| Arc::strong_count(g) == 1);
    }
}

/// Where a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    L1,
    L2,
    /// Produced by the caller's fetch function
    Fetched,
    /// Produced by a concurrent caller's fetch while this caller waited
    Coalesced,
}

impl CacheSource {
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::L1 | Self::L2)
    }
}

/// Per-tier statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub coalesced: u64,
    pub l1_entries: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.l1_hits + self.l2_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.l1_hits + self.l2_hits) as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
}

/// One pre-computed entry for [`MultiTierCache::warm_up`]
#[derive(Debug, Clone)]
pub struct WarmEntry {
    pub key: CacheKey,
    pub value: serde_json::Value,
    pub tags: Vec<String>,
}

pub struct MultiTierCache {
    settings: CacheSettings,
    l1: L1Cache,
    l2: Arc<dyn RemoteCache>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    counters: Counters,
    metrics: Arc<ScraperMetrics>,
}

impl MultiTierCache {
    #[must_use]
    pub fn new(settings: CacheSettings, l2: Arc<dyn RemoteCache>, metrics: Arc<ScraperMetrics>) -> Self {
        Self {
            l1: L1Cache::new(settings.l1_capacity, settings.l1_ttl()),
            settings,
            l2,
            inflight: DashMap::new(),
            counters: Counters::default(),
            metrics,
        }
    }

    /// Key in this cache's namespace
    #[must_use]
    pub fn key(&self, entity_type: &str, entity_id: &str) -> CacheKey {
        CacheKey::new(self.settings.namespace.clone(), entity_type, entity_id)
    }

    /// L1 then L2; an L2 hit is promoted into L1
    async fn lookup(&self, key: &str) -> Option<(Arc<[u8]>, CacheSource)> {
        if let Some(data) = self.l1.get(key) {
            return Some((data, CacheSource::L1));
        }

        match self.l2.get(key).await {
            Ok(Some(encoded)) => match codec::decode(&encoded) {
                Ok(raw) => {
                    let data: Arc<[u8]> = Arc::from(raw);
                    self.l1.insert(key, Arc::clone(&data), None, &[]);
                    Some((data, CacheSource::L2))
                }
                Err(e) => {
                    warn!(%key, "Dropping undecodable L2 value: {e:#}");
                    self.metrics.record_error(ErrorKind::Storage);
                    let _ = self.l2.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(%key, "L2 read failed, treating as miss: {e:#}");
                self.metrics.record_error(ErrorKind::Storage);
                None
            }
        }
    }

    fn count(&self, source: CacheSource) {
        match source {
            CacheSource::L1 => {
                self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment_cache_hit();
            }
            CacheSource::L2 => {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment_cache_hit();
            }
            CacheSource::Fetched | CacheSource::Coalesced => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment_cache_miss();
            }
        }
    }

    /// Cached value for `key`, if any
    ///
    /// # Errors
    ///
    /// `Internal` when the cached bytes do not deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> ScrapeResult<Option<T>> {
        let key = key.to_string();
        match self.lookup(&key).await {
            Some((data, source)) => {
                self.count(source);
                Ok(Some(deserialize(&key, &data)?))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment_cache_miss();
                Ok(None)
            }
        }
    }

    /// Write to both tiers; `ttl` defaults to the L2 TTL and is capped by the L1 TTL in L1
    ///
    /// # Errors
    ///
    /// `Internal` when `value` cannot be serialized. L2 write failures are
    /// logged and counted, not returned.
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> ScrapeResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| ScrapeError::Internal(format!("serialising cache value for {key}: {e}")))?;
        self.store(&key.to_string(), json, ttl, tags).await;
        Ok(())
    }

    async fn store(&self, key: &str, json: Vec<u8>, ttl: Option<Duration>, tags: &[String]) {
        let l2_ttl = ttl.unwrap_or_else(|| self.settings.l2_ttl());
        match codec::encode(&json, self.settings.compression_threshold_bytes) {
            Ok(encoded) => {
                if let Err(e) = self.l2.set(key, encoded, l2_ttl, tags).await {
                    warn!(%key, "L2 write failed: {e:#}");
                    self.metrics.record_error(ErrorKind::Storage);
                }
            }
            Err(e) => {
                warn!(%key, "Encoding for L2 failed: {e:#}");
                self.metrics.record_error(ErrorKind::Internal);
            }
        }
        self.l1.insert(key, Arc::from(json), ttl, tags);
    }

    /// Cached value, or the result of `fetch` stored under `key`
    ///
    /// At most one `fetch` runs per key at a time in this process. Fetch
    /// errors are returned to the caller that ran the fetch and are not cached.
    ///
    /// # Errors
    ///
    /// Whatever `fetch` returns, or `Internal` for (de)serialization failures.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        tags: &[String],
        fetch: F,
    ) -> ScrapeResult<(T, CacheSource)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        let key_str = key.to_string();
        if let Some((data, source)) = self.lookup(&key_str).await {
            self.count(source);
            return Ok((deserialize(&key_str, &data)?, source));
        }

        let slot = InflightSlot {
            inflight: &self.inflight,
            key: &key_str,
        };
        let gate = self
            .inflight
            .entry(key_str.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = gate.lock_owned().await;

        let result = self.fetch_once(key, &key_str, ttl, tags, fetch).await;

        drop(guard);
        drop(slot);

        let (value, source) = result?;
        self.count(source);
        Ok((value, source))
    }

    async fn fetch_once<T, F, Fut>(
        &self,
        key: &CacheKey,
        key_str: &str,
        ttl: Option<Duration>,
        tags: &[String],
        fetch: F,
    ) -> ScrapeResult<(T, CacheSource)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        // A concurrent caller may have filled the cache while we waited
        if let Some((data, _)) = self.lookup(key_str).await {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok((deserialize(key_str, &data)?, CacheSource::Coalesced));
        }

        let lock_name = format!("lock:{key_str}");
        if self.settings.distributed_lock {
            let deadline = Instant::now() + FETCH_LOCK_TTL;
            loop {
                match self.l2.try_lock(&lock_name, FETCH_LOCK_TTL).await {
                    Ok(true) => break,
                    Ok(false) if Instant::now() < deadline => {
                        tokio::time::sleep(FETCH_LOCK_POLL).await;
                        if let Some((data, _)) = self.lookup(key_str).await {
                            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                            return Ok((deserialize(key_str, &data)?, CacheSource::Coalesced));
                        }
                    }
                    Ok(false) => {
                        debug!(%key, "fetch lock still held elsewhere, fetching anyway");
                        break;
                    }
                    Err(e) => {
                        warn!(%key, "fetch lock unavailable: {e:#}");
                        self.metrics.record_error(ErrorKind::Storage);
                        break;
                    }
                }
            }
        }

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = fetch().await;

        if let Ok(value) = &fetched {
            self.set(key, value, ttl, tags).await?;
        }
        if self.settings.distributed_lock
            && let Err(e) = self.l2.unlock(&lock_name).await
        {
            warn!(%key, "releasing fetch lock failed: {e:#}");
        }
        fetched.map(|v| (v, CacheSource::Fetched))
    }

    /// Remove one key from both tiers
    pub async fn invalidate(&self, key: &CacheKey) {
        let key = key.to_string();
        self.l1.remove(&key);
        if let Err(e) = self.l2.delete(&key).await {
            warn!(%key, "L2 delete failed: {e:#}");
            self.metrics.record_error(ErrorKind::Storage);
        }
    }

    /// Remove every entry tagged with `tag`; returns the number of L2 keys removed
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let l1_removed = self.l1.remove_tag(tag);
        let keys = match self.l2.keys_for_tag(tag).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(%tag, "L2 tag lookup failed: {e:#}");
                self.metrics.record_error(ErrorKind::Storage);
                Vec::new()
            }
        };
        let mut removed = 0;
        for key in &keys {
            self.l1.remove(key);
            match self.l2.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%key, "L2 delete failed: {e:#}");
                    self.metrics.record_error(ErrorKind::Storage);
                }
            }
        }
        debug!(%tag, l1_removed, l2_removed = removed, "invalidated by tag");
        removed.max(l1_removed)
    }

    /// Remove every key matching a namespace or namespace+entity-type pattern
    pub async fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        let prefix = pattern.prefix();
        let l1_removed = self.l1.remove_prefix(&prefix);
        let l2_removed = match self.l2.delete_prefix(&prefix).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%prefix, "L2 prefix delete failed: {e:#}");
                self.metrics.record_error(ErrorKind::Storage);
                0
            }
        };
        debug!(%prefix, l1_removed, l2_removed, "invalidated by pattern");
        l1_removed.max(l2_removed)
    }

    /// Seed both tiers with pre-computed entries; returns how many were stored
    pub async fn warm_up(&self, entries: Vec<WarmEntry>) -> usize {
        let mut stored = 0;
        for entry in entries {
            match serde_json::to_vec(&entry.value) {
                Ok(json) => {
                    self.store(&entry.key.to_string(), json, None, &entry.tags)
                        .await;
                    stored += 1;
                }
                Err(e) => warn!(key = %entry.key, "skipping warm-up entry: {e}"),
            }
        }
        debug!(stored, "cache warm-up complete");
        stored
    }

    /// Pull the given keys from L2 into L1 ahead of demand
    pub async fn promote(&self, keys: &[CacheKey]) -> usize {
        let mut promoted = 0;
        for key in keys {
            let key = key.to_string();
            if self.l1.get(&key).is_some() {
                continue;
            }
            if let Some((_, CacheSource::L2)) = self.lookup(&key).await {
                promoted += 1;
            }
        }
        promoted
    }

    /// Drop expired entries from both tiers
    pub async fn sweep_expired(&self) -> usize {
        let l1 = self.l1.sweep_expired();
        let l2 = match self.l2.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!("L2 purge failed: {e:#}");
                self.metrics.record_error(ErrorKind::Storage);
                0
            }
        };
        if l1 + l2 > 0 {
            debug!(l1, l2, "swept expired cache entries");
        }
        l1 + l2
    }

    /// Start the background expiry sweeper; it exits when `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.settings.sweep_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep_expired().await;
                    }
                }
            }
            debug!("cache sweeper stopped");
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            l1_entries: self.l1.len(),
        }
    }

    #[must_use]
    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }
}

fn deserialize<T: DeserializeOwned>(key: &str, data: &[u8]) -> ScrapeResult<T> {
    serde_json::from_slice(data)
        .map_err(|e| ScrapeError::Internal(format!("cached value for {key} has unexpected shape: {e}")))
}
