use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Local, NaiveTime};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use harvester::config::Config;
use harvester::metrics;
use harvester::scheduler::{CrawlScheduler, TaskFamily};

use super::connect;

/// Parameters for the cron driver
pub struct CronParams {
    /// Overrides `metrics.addr` from the configuration
    pub metrics_addr: Option<String>,
}

/// Run every periodic job until Ctrl+C
pub async fn cron(config: Config, params: CronParams) -> Result<()> {
    let scheduler = Arc::new(connect(&config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_addr = params.metrics_addr.or_else(|| config.metrics.addr.clone());
    let metrics_handle = match metrics_addr {
        Some(addr) => {
            metrics::init_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;
            Some(spawn_metrics_server(addr, shutdown_rx.clone()).await?)
        }
        None => None,
    };

    let seed_time = config.scheduler.seed_time()?;
    let handles = vec![
        spawn_tick_task(scheduler.clone(), shutdown_rx.clone()),
        spawn_session_check(scheduler.clone(), shutdown_rx.clone()),
        spawn_seed_task(scheduler, seed_time, shutdown_rx),
    ];

    tracing::info!(
        tick_secs = config.scheduler.tick_interval_secs,
        session_check_secs = config.scheduler.session_check_interval_secs,
        seed_time = %seed_time,
        "Cron started, press Ctrl+C to stop"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!("Failed to wait for Ctrl+C: {}", e),
    }
    let _ = shutdown_tx.send(true);

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::warn!("Cron task ended abnormally: {}", e);
        }
    }
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    tracing::info!("Cron stopped");
    Ok(())
}

/// One round of every family, flush before process
async fn run_families(scheduler: &CrawlScheduler) {
    let passes = [
        (TaskFamily::POSTS, true),
        (TaskFamily::REPLIES, true),
        (TaskFamily::USER_TIMELINE, false),
    ];

    for (family, with_flush) in passes {
        let limits = scheduler.limits(&family);
        if with_flush {
            if let Err(e) = scheduler.flush(&family, limits.flush_limit).await {
                tracing::warn!(family = family.name, error = %e, "Flush tick failed");
            }
        }
        match scheduler.process(&family, limits.process_limit).await {
            Ok(report) => tracing::debug!(
                family = family.name,
                candidates = report.candidates,
                advanced = report.advanced,
                stalled = report.stalled,
                exhausted = report.exhausted,
                aborted = report.aborted,
                "Process tick finished"
            ),
            Err(e) => tracing::warn!(family = family.name, error = %e, "Process tick failed"),
        }
    }
}

fn spawn_tick_task(
    scheduler: Arc<CrawlScheduler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(scheduler.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => run_families(&scheduler).await,
                _ = shutdown_rx.changed() => {
                    tracing::info!("Tick task shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_session_check(
    scheduler: Arc<CrawlScheduler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(scheduler.config().session_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match scheduler.sessions().health_check().await {
                        Ok(health) if health.is_healthy() => tracing::debug!(
                            current = health.current,
                            special = health.special,
                            blocked = health.blocked,
                            "Session pool healthy"
                        ),
                        Ok(health) => tracing::warn!(
                            current = health.current,
                            special = health.special,
                            blocked = health.blocked,
                            revoked = health.revoked,
                            "No usable session in the default pool"
                        ),
                        Err(e) => tracing::warn!("Session check failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Session check shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_seed_task(
    scheduler: Arc<CrawlScheduler>,
    at: NaiveTime,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next(at, Local::now());
            tracing::debug!("Next replies seeding in {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let limit = scheduler.config().seed_limit;
                    if let Err(e) = scheduler.seed_replies(limit).await {
                        tracing::warn!("Replies seeding failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Seed task shutting down");
                    break;
                }
            }
        }
    })
}

/// Time until the next local occurrence of `at`
fn until_next(at: NaiveTime, now: DateTime<Local>) -> Duration {
    let now = now.naive_local();
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

async fn spawn_metrics_server(
    addr: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {addr}"))?;
    tracing::info!("Metrics listening on http://{addr}");

    Ok(tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("Metrics server error: {}", e);
        }
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
