//! pulsed: keeps a snapshot cache warm against a configured HTTP source and
//! reports scheduler status.
//!
//! Configuration is read from `pulse.toml` (override with `PULSE_CONFIG`);
//! log filtering follows `RUST_LOG`.

use anyhow::{Context, bail};
use pulse::cache::{RefreshOutcome, refresh_with};
use pulse::fetch::HttpFetcher;
use pulse::sink::ChannelSink;
use pulse::{PulseConfig, SnapshotCache, Task, TaskInterval, TaskRunner};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How often the cache health line is emitted.
const HEALTH_INTERVAL_SECS: u64 = 86_400;

/// How often the scheduler status report is logged.
const STATUS_REPORT_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pulse=info,pulsed=info")),
        )
        .init();

    let config_path = std::env::var("PULSE_CONFIG").unwrap_or_else(|_| "pulse.toml".to_owned());
    let config = PulseConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading {config_path}"))?;
    if config.source.url.is_empty() {
        bail!("no source URL configured; set [source] url in {config_path}");
    }

    let cache = Arc::new(SnapshotCache::<serde_json::Value>::from_config(
        &config.cache,
    ));
    let fetcher = Arc::new(HttpFetcher::from_config(&config.source)?);

    let (tx, mut updates) = mpsc::unbounded_channel();
    let runner = TaskRunner::new()
        .with_idle_wait(config.scheduler.idle_wait())
        .with_sink(Arc::new(ChannelSink::new(tx)));

    let refresh_cache = cache.clone();
    let refresh_fetcher = fetcher.clone();
    runner.register(
        Task::new(
            "refresh_cache",
            TaskInterval::Every {
                secs: config.scheduler.refresh_interval_secs,
            },
            move || {
                let cache = refresh_cache.clone();
                let fetcher = refresh_fetcher.clone();
                async move {
                    match refresh_with(cache.as_ref(), fetcher.as_ref()).await? {
                        RefreshOutcome::Refreshed => Ok(cache.lock().snapshot()),
                        RefreshOutcome::AwaitedOther => Ok(None),
                    }
                }
            },
        )
        .with_priority(1),
    );

    let health_cache = cache.clone();
    runner.register(
        Task::new(
            "log_cache_age",
            TaskInterval::Every {
                secs: HEALTH_INTERVAL_SECS,
            },
            move || {
                let cache = health_cache.clone();
                async move {
                    let (age_secs, in_flight) = {
                        let guard = cache.lock();
                        (guard.age().as_secs(), guard.refresh_in_flight())
                    };
                    info!(age_secs, in_flight, "cache health");
                    Ok(None)
                }
            },
        )
        .with_priority(2)
        .with_initial_delay(Duration::from_secs(HEALTH_INTERVAL_SECS)),
    );

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            info!("task '{}' published a new snapshot", update.task);
        }
    });

    let status_runner = runner.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(STATUS_REPORT_SECS));
        // The first tick fires immediately; skip it so reports start one
        // interval in.
        tick.tick().await;
        loop {
            tick.tick().await;
            match serde_json::to_string(&status_runner.status()) {
                Ok(report) => info!("scheduler status: {report}"),
                Err(e) => error!("failed to serialize scheduler status: {e}"),
            }
        }
    });

    let handle = runner.spawn();
    info!(
        "pulsed running against {}; press ctrl-c to stop",
        config.source.url
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    runner.shutdown(handle).await;
    Ok(())
}
