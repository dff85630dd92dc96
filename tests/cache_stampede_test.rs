//! Single-flight behaviour of the multi-tier cache under concurrent misses

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use trendscrape::cache::{CacheSource, InMemoryRemoteCache, MultiTierCache};
use trendscrape::config::CacheSettings;
use trendscrape::metrics::ScraperMetrics;
use trendscrape::{ScrapeError, ScrapeResult};

fn cache() -> Arc<MultiTierCache> {
    Arc::new(MultiTierCache::new(
        CacheSettings::default(),
        Arc::new(InMemoryRemoteCache::new()),
        Arc::new(ScraperMetrics::new()),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_key_is_fetched_once_for_many_callers() {
    let cache = cache();
    let fetches = Arc::new(AtomicU32::new(0));
    let key = cache.key("user", "abc123");

    let callers: Vec<_> = (0..32)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, None, &["user:abc123".to_string()], || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ScrapeError>(serde_json::json!({ "id": "abc123", "followers": 42 }))
                    })
                    .await
            })
        })
        .collect();

    let mut fetched = 0;
    for caller in callers {
        let (value, source) = caller.await.unwrap().unwrap();
        assert_eq!(value["followers"], 42);
        if source == CacheSource::Fetched {
            fetched += 1;
        }
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(fetched, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_fetch_lets_next_caller_try_again() {
    let cache = cache();
    let key = cache.key("video", "v1");
    let attempts = AtomicU32::new(0);

    let first: ScrapeResult<(u64, CacheSource)> = cache
        .get_or_fetch(&key, None, &[], || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::FetchFailed {
                attempts: 3,
                message: "HTTP 503".into(),
            })
        })
        .await;
    assert!(first.is_err());

    let (value, source) = cache
        .get_or_fetch(&key, None, &[], || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ScrapeError>(7_u64)
        })
        .await
        .unwrap();
    assert_eq!((value, source), (7, CacheSource::Fetched));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tag_invalidation_forces_refetch() {
    let cache = cache();
    let key = cache.key("hashtag", "dance");
    let tags = vec!["hashtag:dance".to_string()];

    cache.set(&key, &serde_json::json!({ "views": 1 }), None, &tags).await.unwrap();
    assert!(cache.get::<serde_json::Value>(&key).await.unwrap().is_some());

    assert!(cache.invalidate_by_tag("hashtag:dance").await >= 1);
    assert!(cache.get::<serde_json::Value>(&key).await.unwrap().is_none());
}
