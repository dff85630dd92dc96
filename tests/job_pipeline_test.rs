//! End-to-end job runs through the supervisor with a scripted fetcher

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedFetcher, VIDEO_V1, fast_fetch_settings, supervisor_deps, video_body, wait_for_job};
use trendscrape::config::BucketSettings;
use trendscrape::fetch::AttemptError;
use trendscrape::{ErrorKind, HealthStatus, JobRequest, JobStatus, ScrapeEvent, Supervisor, TargetType};

const PROXY: &str = "http://10.0.0.1:8080";

#[tokio::test]
async fn video_job_survives_two_transient_failures() {
    let fetcher = Arc::new(ScriptedFetcher::new().route(
        "itemId=v1",
        vec![
            AttemptError::transient("connection reset by peer"),
            AttemptError::transient("https://platform.test returned 502 Bad Gateway"),
        ],
        VIDEO_V1,
    ));
    let (deps, _jobs, entities) = supervisor_deps(fetcher.clone(), fast_fetch_settings(), &[PROXY]);
    let supervisor = Supervisor::start(deps).await.unwrap();
    let mut events = supervisor.subscribe();
    let before = supervisor.metrics().snapshot();

    let id = supervisor
        .enqueue(JobRequest::new(TargetType::Video, "v1"))
        .await
        .unwrap();

    match wait_for_job(&mut events, id).await {
        ScrapeEvent::JobCompleted { result, .. } => assert_eq!(result["id"], "v1"),
        other => panic!("expected completion, got {other:?}"),
    }

    let job = supervisor.status(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    // the pipeline absorbed both failures; no job-level retry was needed
    assert_eq!(job.retry_count, 0);

    let key = supervisor.cache().key("video", "v1");
    assert_eq!(key.to_string(), "scrape:video:v1");
    assert!(
        supervisor
            .cache()
            .get::<serde_json::Value>(&key)
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(entities.len(), 1);

    let after = supervisor.metrics().snapshot();
    assert_eq!(after.requests_failed - before.requests_failed, 2);
    assert_eq!(after.requests_success - before.requests_success, 1);

    let seen = fetcher.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|r| r.proxy.as_deref() == Some(PROXY)));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn shared_bucket_delays_second_fetch_instead_of_rejecting() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .route("itemId=a1", vec![], video_body("a1"))
            .route("itemId=a2", vec![], video_body("a2")),
    );
    let mut fetch = fast_fetch_settings();
    fetch.api_bucket = BucketSettings::new(1, 1.0);
    let (deps, _, _) = supervisor_deps(fetcher.clone(), fetch, &[]);
    let supervisor = Supervisor::start(deps).await.unwrap();
    let mut events = supervisor.subscribe();

    let first = supervisor.enqueue(JobRequest::new(TargetType::Video, "a1")).await.unwrap();
    let second = supervisor.enqueue(JobRequest::new(TargetType::Video, "a2")).await.unwrap();

    for id in [first, second] {
        let event = wait_for_job(&mut events, id).await;
        assert!(matches!(event, ScrapeEvent::JobCompleted { .. }), "{event:?}");
    }

    let mut times: Vec<_> = fetcher.seen().into_iter().map(|r| r.at).collect();
    times.sort();
    assert_eq!(times.len(), 2);
    let gap = times[1].duration_since(times[0]);
    assert!(gap >= Duration::from_millis(950), "second fetch only {gap:?} after the first");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn running_job_can_be_cancelled() {
    // a long Retry-After keeps the job parked inside the pipeline
    let fetcher = Arc::new(ScriptedFetcher::new().route(
        "itemId=slow",
        vec![AttemptError::rate_limited(Some(Duration::from_secs(30)))],
        video_body("slow"),
    ));
    let (deps, _, entities) = supervisor_deps(fetcher.clone(), fast_fetch_settings(), &[]);
    let supervisor = Supervisor::start(deps).await.unwrap();
    let mut events = supervisor.subscribe();

    let id = supervisor.enqueue(JobRequest::new(TargetType::Video, "slow")).await.unwrap();
    for _ in 0..100 {
        if !fetcher.seen().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(supervisor.cancel(id).await.unwrap());

    match wait_for_job(&mut events, id).await {
        ScrapeEvent::JobFailed { error, .. } => assert_eq!(error.kind, ErrorKind::Cancelled),
        other => panic!("expected failure, got {other:?}"),
    }
    let job = supervisor.status(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(entities.is_empty());
    // terminal jobs cannot be cancelled again
    assert!(!supervisor.cancel(id).await.unwrap());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn not_found_fails_without_job_retries() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (deps, _, _) = supervisor_deps(fetcher.clone(), fast_fetch_settings(), &[]);
    let supervisor = Supervisor::start(deps).await.unwrap();
    let mut events = supervisor.subscribe();

    let id = supervisor.enqueue(JobRequest::new(TargetType::Video, "gone")).await.unwrap();
    match wait_for_job(&mut events, id).await {
        ScrapeEvent::JobFailed { error, .. } => {
            // a 4xx is FetchFailed on the first attempt; the job retries it
            // until the budget is spent
            assert_eq!(error.kind, ErrorKind::JobRetryExhausted);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let job = supervisor.status(id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, job.max_retries);
    assert_eq!(fetcher.seen().len() as u32, job.max_retries + 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn health_reflects_proxy_registry() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (deps, _, _) = supervisor_deps(fetcher, fast_fetch_settings(), &[PROXY]);
    let supervisor = Supervisor::start(deps).await.unwrap();

    assert_eq!(supervisor.health().status, HealthStatus::Healthy);

    // let the first health-check pass land so it cannot undo the mark below
    for _ in 0..100 {
        if supervisor.proxies().snapshot()[0].last_checked_at.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    supervisor.proxies().mark_unhealthy(PROXY);
    let report = supervisor.health();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.proxies_healthy, 0);
    assert_eq!(report.proxies_total, 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn finished_jobs_are_pruned_in_the_background() {
    let fetcher = Arc::new(ScriptedFetcher::new().route("itemId=p1", vec![], video_body("p1")));
    let (mut deps, jobs, _) = supervisor_deps(fetcher, fast_fetch_settings(), &[]);
    deps.config.jobs.retention_secs = 0;
    deps.config.jobs.prune_interval_secs = 1;
    let supervisor = Supervisor::start(deps).await.unwrap();
    let mut events = supervisor.subscribe();

    let id = supervisor.enqueue(JobRequest::new(TargetType::Video, "p1")).await.unwrap();
    let event = wait_for_job(&mut events, id).await;
    assert!(matches!(event, ScrapeEvent::JobCompleted { .. }), "{event:?}");

    for _ in 0..300 {
        if supervisor.status(id).await.unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(supervisor.status(id).await.unwrap().is_none());
    assert!(jobs.is_empty());

    supervisor.shutdown().await;
}
