//! trendscrape: run the scraper until Ctrl-C
//!
//! Usage: `trendscrape [type:key[@priority] ...]`, e.g.
//! `trendscrape user:somecreator video:7301234567890 hashtag:dance@5`.
//! Configuration comes from `$TRENDSCRAPE_CONFIG` and `TRENDSCRAPE_*`
//! environment variables.

use anyhow::{Context, Result, anyhow};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trendscrape::{JobRequest, ScrapeEvent, ScraperConfig, Supervisor, SupervisorDeps, TargetType};

fn parse_target(arg: &str) -> Result<JobRequest> {
    let (target, priority) = match arg.rsplit_once('@') {
        Some((target, priority)) => (
            target,
            priority
                .parse::<i32>()
                .with_context(|| format!("invalid priority in {arg:?}"))?,
        ),
        None => (arg, 0),
    };
    let (kind, key) = target
        .split_once(':')
        .ok_or_else(|| anyhow!("expected type:key, got {arg:?}"))?;
    let target_type: TargetType = kind.parse()?;
    Ok(JobRequest::new(target_type, key).with_priority(priority))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let requests = std::env::args()
        .skip(1)
        .map(|arg| parse_target(&arg))
        .collect::<Result<Vec<_>>>()?;

    let config = ScraperConfig::load()?;
    let deps = SupervisorDeps::from_config(config).await?;
    let supervisor = Supervisor::start(deps).await?;

    let mut events = supervisor.subscribe();
    for request in requests {
        let label = format!("{}:{}", request.target_type, request.target_key);
        let id = supervisor.enqueue(request).await?;
        info!(job_id = %id, target = %label, "queued");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(ScrapeEvent::JobCompleted { job_id, target_key, duration_ms, .. }) => {
                    info!(%job_id, %target_key, duration_ms, "job completed");
                }
                Ok(ScrapeEvent::JobFailed { job_id, target_key, error, .. }) => {
                    warn!(%job_id, %target_key, kind = %error.kind, "job failed: {}", error.message);
                }
                Err(RecvError::Lagged(skipped)) => warn!("{skipped} event(s) not shown"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let health = supervisor.health();
    info!(status = ?health.status, issues = ?health.issues, "final health");
    supervisor.shutdown().await;
    Ok(())
}
