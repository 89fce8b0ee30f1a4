use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::jobs::JobQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<JobQueue>,
}

/// Prometheus scrape endpoint. Refreshes the queue depth gauge first.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Err(e) = state.queue.queue_depth().await {
        tracing::debug!(error = %e, "Queue depth unavailable for scrape");
    }
    state.handle.render()
}
