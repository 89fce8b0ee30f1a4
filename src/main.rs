use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use creative_engine::app_state::AppState;
use creative_engine::bootstrap;
use creative_engine::config::AppConfig;
use creative_engine::routes::{self, metrics::MetricsState};
use creative_engine::services::relay::ProgressRelay;
use creative_engine::services::worker::WorkerPool;

/// Pending rows pushed back onto the broker at start-up.
const RECOVERY_LIMIT: usize = 1000;

#[tokio::main]
async fn main() {
    bootstrap::init_tracing();
    bootstrap::install_panic_hook();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(env = %config.app_env, "Initializing creative-engine server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    bootstrap::describe_metrics();

    let services = bootstrap::connect(&config)
        .await
        .expect("Failed to initialize services");

    let shutdown = CancellationToken::new();
    let hub = services.queue.progress().clone();

    // Progress relay: events from worker processes in, our own events out.
    let origin = format!("api-{}", uuid::Uuid::new_v4());
    let relay = Arc::new(ProgressRelay::new(
        services.broker.client().clone(),
        &config.progress_channel,
        &origin,
    ));
    let ingest_task = tokio::spawn({
        let relay = relay.clone();
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        async move { relay.ingest_into(hub, shutdown).await }
    });
    let relay_stop = CancellationToken::new();
    let publish_task = tokio::spawn({
        let relay = relay.clone();
        let tap = hub.subscribe_all();
        let stop = relay_stop.clone();
        async move { relay.publish_from(tap, stop).await }
    });

    // Optional in-process worker pool
    let pool_task = if config.embedded_worker {
        match services.queue.recover_pending(RECOVERY_LIMIT).await {
            Ok(n) if n > 0 => tracing::info!(recovered = n, "Re-queued pending jobs"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to recover pending jobs"),
        }
        let pipeline =
            bootstrap::build_pipeline(&config, &services).expect("Failed to initialize pipeline");
        let pool = WorkerPool::new(
            services.queue.clone(),
            Arc::new(pipeline),
            config.worker_config("api"),
        );
        let pool_shutdown = shutdown.clone();
        Some(tokio::spawn(async move { pool.run(pool_shutdown).await }))
    } else {
        None
    };

    let state = AppState::new(
        services.queue.clone(),
        services.store.clone(),
        services.assets.clone(),
    )
    .with_internal_errors(!config.is_production());
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: services.queue.clone(),
    };

    let mut app = routes::api_router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(metrics_state),
    );
    if config.s3().is_none() {
        app = app.nest_service("/assets", ServeDir::new(&config.asset_dir));
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            bootstrap::shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Some(task) = pool_task {
        match task.await {
            Ok(report) => tracing::info!(?report, "Embedded worker pool stopped"),
            Err(e) => tracing::error!(error = %e, "Embedded worker pool task failed"),
        }
    }
    relay_stop.cancel();
    let _ = tokio::join!(ingest_task, publish_task);

    tracing::info!("creative-engine stopped");
}
