pub mod brands;
pub mod creatives;
pub mod generator;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod templates;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;
use crate::error::reveal_internal_errors;

/// Health, WebSocket and `/api/v1` routes.
pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/creatives", post(creatives::create_creative))
        .route(
            "/creatives/{id}",
            get(creatives::get_creative).delete(creatives::delete_creative),
        )
        .route("/creatives/{id}/duplicate", post(creatives::duplicate_creative))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route(
            "/creative-generator/generate-campaign",
            post(generator::generate_campaign),
        )
        .route("/creative-generator/job/{id}", get(jobs::get_job))
        .route("/brands", post(brands::create_brand))
        .route("/brands/{id}", get(brands::get_brand))
        .route("/brands/{id}/sync", post(brands::sync_brand))
        .route("/templates", get(templates::list_templates));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ws", get(ws::ws_handler))
        .nest("/api/v1", api)
        .layer(middleware::map_response_with_state(
            state.clone(),
            reveal_internal_errors,
        ))
        .with_state(state)
}
