//! Start-up wiring shared by the API server and the standalone worker.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::{self, PgStore};
use crate::services::jobs::JobQueue;
use crate::services::pipeline::Pipeline;
use crate::services::progress::ProgressHub;
use crate::services::providers::{OpenAiImageClient, OpenAiTextClient, ProviderError};
use crate::services::queue::{QueueError, RedisBroker};
use crate::services::site_analysis::HttpSiteFetcher;
use crate::services::storage::{AssetStore, LocalAssetStore, S3AssetStore, StorageError};

/// Connected infrastructure for one process.
pub struct Services {
    pub store: Arc<PgStore>,
    pub broker: Arc<RedisBroker>,
    pub queue: Arc<JobQueue>,
    pub assets: Arc<dyn AssetStore>,
}

/// Initialize structured JSON logging.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Route panics through tracing so they land in the JSON log.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(panic = %info, location = %location, "Panic");
        default_hook(info);
    }));
}

pub fn describe_metrics() {
    metrics::describe_counter!("creative_jobs_total", "Total generation jobs enqueued");
    metrics::describe_counter!("creative_jobs_completed", "Total jobs completed");
    metrics::describe_counter!("creative_jobs_failed", "Total jobs that failed");
    metrics::describe_counter!("creative_jobs_cancelled", "Total jobs cancelled");
    metrics::describe_histogram!(
        "creative_stage_seconds",
        "Time spent in each pipeline stage"
    );
    metrics::describe_gauge!(
        "creative_queue_depth",
        "Current number of pending jobs in the broker"
    );
}

/// Connect to PostgreSQL (running migrations), Redis and asset storage.
pub async fn connect(config: &AppConfig) -> Result<Services, BootstrapError> {
    tracing::info!("Connecting to PostgreSQL database");
    let pool = db::init_pool(&config.database_url).await?;

    tracing::info!("Running database migrations");
    db::run_migrations(&pool).await?;
    let store = Arc::new(PgStore::new(pool));

    tracing::info!("Connecting to Redis job broker");
    let broker = Arc::new(RedisBroker::new(&config.redis_url)?);

    let assets = asset_store(config)?;

    let queue = Arc::new(JobQueue::new(
        store.clone(),
        store.clone(),
        broker.clone(),
        Arc::new(ProgressHub::new()),
    ));

    Ok(Services {
        store,
        broker,
        queue,
        assets,
    })
}

/// S3 when configured, otherwise the local asset directory.
pub fn asset_store(config: &AppConfig) -> Result<Arc<dyn AssetStore>, BootstrapError> {
    match config.s3() {
        Some(s3) => {
            tracing::info!(bucket = %s3.bucket, "Using S3 asset storage");
            Ok(Arc::new(S3AssetStore::new(
                &s3.bucket,
                &s3.endpoint,
                &s3.access_key,
                &s3.secret_key,
                &config.asset_base_url,
                s3.path_style,
            )?))
        }
        None => {
            tracing::info!(dir = %config.asset_dir, "Using local asset storage");
            Ok(Arc::new(LocalAssetStore::new(
                &config.asset_dir,
                &config.asset_base_url,
            )))
        }
    }
}

/// Pipeline backed by the configured HTTP providers.
pub fn build_pipeline(config: &AppConfig, services: &Services) -> Result<Pipeline, BootstrapError> {
    let timeout = config.provider_timeout();
    let text = OpenAiTextClient::new(
        &config.text_api_base,
        &config.text_api_key,
        &config.text_model,
        timeout,
    )?;
    let images = OpenAiImageClient::new(
        &config.image_api_base,
        &config.image_api_key,
        &config.image_model,
        timeout,
    )?;
    let site = HttpSiteFetcher::new(timeout)?;

    Ok(Pipeline::new(
        services.store.clone(),
        Arc::new(site),
        Arc::new(text),
        Arc::new(images),
        services.assets.clone(),
        timeout,
    ))
}

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received CTRL+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
