//! Derived-asset worker binary.
//!
//! `mflow-worker` runs the worker pools until interrupted.
//! `mflow-worker submit <file_id> <storage_key> <mime_type> [size_bytes]`
//! starts processing an uploaded file, and `mflow-worker cancel <file_id>`
//! stops all work on one.

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mflow_models::{FileId, SourceFile};
use mflow_queue::RedisJobQueue;
use mflow_storage::{LocalObjectStore, ObjectStore, RedisFileRecords, S3Store};
use mflow_worker::metrics::init_metrics;
use mflow_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        bail!("failed to install rustls crypto provider");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    let queue = RedisJobQueue::from_env().context("create job queue")?;
    queue.init().await.context("initialize job queue")?;
    let records = RedisFileRecords::from_env().context("create file record store")?;
    let store = object_store().await?;

    let executor = Arc::new(JobExecutor::new(
        config,
        Arc::new(queue),
        Arc::new(records),
        store,
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("submit") => submit(&executor, &args[1..]).await,
        Some("cancel") => {
            let Some(file_id) = args.get(1) else {
                bail!("usage: mflow-worker cancel <file_id>");
            };
            let stopped = executor
                .orchestrator()
                .cancel_file(&FileId::from(file_id.as_str()))
                .await?;
            info!(file_id = %file_id, stopped, "Cancelled");
            Ok(())
        }
        Some(other) => bail!("unknown command: {}", other),
        None => run(executor).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("mflow=info".parse()?)
        .add_directive("aws_config=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Object store selected by `STORAGE_BACKEND` (`s3` or `local`).
async fn object_store() -> anyhow::Result<Arc<dyn ObjectStore>> {
    let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string());
    match backend.as_str() {
        "s3" => Ok(Arc::new(S3Store::from_env().context("create S3 store")?)),
        "local" => {
            let root = std::env::var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage"));
            Ok(Arc::new(LocalObjectStore::new(root).await.context("create local store")?))
        }
        other => bail!("unknown STORAGE_BACKEND: {}", other),
    }
}

async fn submit(executor: &JobExecutor, args: &[String]) -> anyhow::Result<()> {
    let (file_id, storage_key, mime_type) = match args {
        [file_id, storage_key, mime_type, ..] => (file_id, storage_key, mime_type),
        _ => bail!("usage: mflow-worker submit <file_id> <storage_key> <mime_type> [size_bytes]"),
    };
    let size_bytes = match args.get(3) {
        Some(size) => size.parse().context("size_bytes must be an integer")?,
        None => 0,
    };

    let file = SourceFile::new(file_id.as_str(), storage_key.as_str(), mime_type.as_str(), size_bytes);
    match executor.orchestrator().on_upload_complete(&file).await? {
        Some(job_id) => info!(file_id = %file.file_id, job_id = %job_id, "Metadata job enqueued"),
        None => info!(file_id = %file.file_id, "Nothing to derive; file is ready"),
    }
    Ok(())
}

async fn run(executor: Arc<JobExecutor>) -> anyhow::Result<()> {
    info!("Starting mflow-worker");

    // Setup signal handler
    let signal_target = Arc::clone(&executor);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_target.shutdown();
    });

    executor.run().await?;

    info!("Worker shutdown complete");
    Ok(())
}
