//! Circuit breaker behaviour as seen through the fetch pipeline

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trendscrape::config::{BreakerSettings, FetchSettings, RetrySettings};
use trendscrape::fetch::{AttemptError, CircuitState, FetchPipeline, TargetClass};
use trendscrape::metrics::ScraperMetrics;
use trendscrape::{ErrorKind, ScrapeResult};

fn settings() -> FetchSettings {
    FetchSettings {
        retry: RetrySettings {
            max_attempts: 1,
            ..RetrySettings::default()
        },
        breaker: BreakerSettings {
            failure_threshold: 3,
            minimum_calls: 1_000,
            cooldown_secs: 1,
            ..BreakerSettings::default()
        },
        ..common::fast_fetch_settings()
    }
}

async fn failing_call(pipeline: &FetchPipeline, calls: &AtomicU32) -> ScrapeResult<String> {
    pipeline
        .execute(TargetClass::Navigation, "test", &CancellationToken::new(), |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(AttemptError::transient("navigation timed out"))
        })
        .await
}

#[tokio::test]
async fn opens_after_threshold_then_admits_one_probe() {
    let pipeline = Arc::new(FetchPipeline::new(&settings(), Arc::new(ScraperMetrics::new())));
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let err = failing_call(&pipeline, &calls).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
    }
    assert_eq!(pipeline.breaker().state(TargetClass::Navigation), CircuitState::Open);

    // short-circuited without reaching the remote
    let err = failing_call(&pipeline, &calls).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // the API class is unaffected
    let ok = pipeline
        .execute(TargetClass::Api, "api", &CancellationToken::new(), |_| async {
            Ok::<_, AttemptError>("fine".to_string())
        })
        .await
        .unwrap();
    assert_eq!(ok, "fine");

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // two concurrent callers after the cool-down: one probe, one rejection
    let probes = Arc::new(AtomicU32::new(0));
    let callers: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let probes = Arc::clone(&probes);
            tokio::spawn(async move {
                pipeline
                    .execute(TargetClass::Navigation, "probe", &CancellationToken::new(), |_| {
                        let probes = Arc::clone(&probes);
                        async move {
                            probes.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok::<_, AttemptError>("<html></html>".to_string())
                        }
                    })
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for caller in callers {
        match caller.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::CircuitOpen);
                rejected += 1;
            }
        }
    }
    assert_eq!((succeeded, rejected), (1, 1));
    assert_eq!(probes.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.breaker().state(TargetClass::Navigation), CircuitState::Closed);
}
