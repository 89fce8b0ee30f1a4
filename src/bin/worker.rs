use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use creative_engine::bootstrap;
use creative_engine::config::AppConfig;
use creative_engine::services::relay::ProgressRelay;
use creative_engine::services::worker::WorkerPool;

/// Pending rows pushed back onto the broker at start-up.
const RECOVERY_LIMIT: usize = 1000;

#[tokio::main]
async fn main() {
    bootstrap::init_tracing();
    bootstrap::install_panic_hook();

    tracing::info!("Starting creative generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let worker_config = config.worker_config("worker");

    let services = bootstrap::connect(&config)
        .await
        .expect("Failed to initialize services");
    let pipeline = bootstrap::build_pipeline(&config, &services).expect("Failed to initialize pipeline");

    match services.queue.recover_pending(RECOVERY_LIMIT).await {
        Ok(n) if n > 0 => tracing::info!(recovered = n, "Re-queued pending jobs"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to recover pending jobs"),
    }

    // Everything this process publishes goes to the API processes over Redis.
    let relay = ProgressRelay::new(
        services.broker.client().clone(),
        &config.progress_channel,
        &worker_config.worker_id,
    );
    let tap = services.queue.progress().subscribe_all();
    let relay_stop = CancellationToken::new();
    let publish_task = tokio::spawn({
        let stop = relay_stop.clone();
        async move { relay.publish_from(tap, stop).await }
    });

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            bootstrap::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    tracing::info!(
        worker_id = %worker_config.worker_id,
        concurrency = worker_config.concurrency,
        "Worker ready, starting job processing loop"
    );

    let pool = WorkerPool::new(services.queue.clone(), Arc::new(pipeline), worker_config);
    let report = pool.run(shutdown).await;

    relay_stop.cancel();
    if let Err(e) = publish_task.await {
        tracing::error!(error = %e, "Progress relay task failed");
    }

    tracing::info!(?report, "Worker stopped");
}
