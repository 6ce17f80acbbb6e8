//! Service entry point: wires storage, worker, scheduler, and HTTP server
//! together and owns graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clusterwatch::executor::ExecutorRegistry;
use clusterwatch::queue::JobQueue;
use clusterwatch::store::ReportStore;
use clusterwatch::worker::{Worker, WorkerConfig};
use clusterwatch_sqlite::SqliteStore;

mod agent;
mod config;
mod http;
mod report;
mod schedule;
mod slack;

use agent::CommandGenerator;
use config::Config;
use http::AppState;
use report::GenerateReport;
use schedule::ScheduleRunner;
use slack::SlackSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("clusterwatch=info,clusterwatch_sqlite=info,clusterwatch_server=info")
        }))
        .init();

    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster = %config.cluster_name,
        "clusterwatch starting"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;

    // Storage must come up or the process must not.
    let store = SqliteStore::connect(config.db_path(), &config.cluster_name)
        .await
        .context("failed to open database")?;
    store
        .initialize()
        .await
        .context("failed to initialize database schema")?;

    let cutoff = Utc::now() - TimeDelta::weeks(config.retention_weeks);
    let deleted = store
        .cleanup_old_reports(cutoff)
        .await
        .context("startup retention sweep failed")?;
    info!(deleted, retention_weeks = config.retention_weeks, "retention sweep done");

    let queue = Arc::new(JobQueue::new(store.clone()));

    let sink = SlackSink::new(
        config.slack_webhook_url.clone(),
        config.slack_bot_token.clone(),
        config.slack_channel.clone(),
    )?;
    let generator = CommandGenerator::new(config.agent_command.clone());
    let registry = ExecutorRegistry::new().register(Arc::new(GenerateReport::new(
        generator,
        sink,
        store.clone(),
        config.cluster_name.clone(),
        config.client_name.clone(),
        config.generation_timeout,
    )));

    let shutdown = CancellationToken::new();
    let worker_handle = Worker::new(
        Arc::clone(&queue),
        registry,
        WorkerConfig {
            poll_interval: config.poll_interval,
            max_retries: config.max_retries,
            error_backoff: Duration::from_secs(5),
        },
    )
    .spawn(shutdown.clone());
    let schedule_handle =
        ScheduleRunner::new(Arc::clone(&queue), config.report_schedule.clone())
            .spawn(shutdown.clone());

    let app = http::router(AppState {
        queue,
        store: store.clone(),
        cluster_name: config.cluster_name.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await
        .context("server error")?;

    // The worker finishes any in-flight job before exiting.
    shutdown.cancel();
    let _ = worker_handle.await;
    let _ = schedule_handle.await;
    info!("shutdown complete");
    Ok(())
}
