//! Render worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ugc_firestore::{CreditLedger, FirestoreClient, FirestoreLedgerStore, FirestoreVideoStore};
use ugc_queue::{JobQueue, ProgressStore};
use ugc_worker::{JobExecutor, RenderPipeline, StaleAttemptSweeper, WorkerConfig};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ugc=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!(?config, "Worker config");

    if config.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!(%addr, "Metrics exporter listening");
    }

    let queue = Arc::new(JobQueue::from_env().context("failed to create job queue")?);
    let progress = Arc::new(
        ProgressStore::new(&queue.config().redis_url).context("failed to create progress store")?,
    );

    let firestore = FirestoreClient::from_env()
        .await
        .context("failed to create Firestore client")?;
    let videos = Arc::new(FirestoreVideoStore::new(firestore.clone()));
    let ledger = CreditLedger::new(Arc::new(FirestoreLedgerStore::new(firestore)));

    let pipeline = Arc::new(
        RenderPipeline::from_env(&config, videos.clone(), ledger, progress)
            .context("failed to build render pipeline")?,
    );

    let executor = Arc::new(JobExecutor::new(config.clone(), queue, Arc::clone(&pipeline)));
    let sweeper = StaleAttemptSweeper::new(videos, pipeline, config);

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    let sweeper_shutdown = executor.shutdown_receiver();
    let sweeper_task = tokio::spawn(async move { sweeper.run(sweeper_shutdown).await });

    executor.run().await.context("executor failed")?;
    sweeper_task.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();
    info!("Starting ugc-worker");

    if let Err(e) = run().await {
        error!(error = %format!("{:#}", e), "Worker exited with error");
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
