use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppResult;
use crate::models::requests::JobStatusResponse;

/// GET /api/v1/jobs/{id}: poll a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = state.queue.get_status(id).await?;
    Ok(Json(job.into()))
}

/// POST /api/v1/jobs/{id}/cancel: cancel a job.
///
/// A job that already finished is returned unchanged with 200.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let cancelled = state.queue.cancel(id).await?;
    if !cancelled.changed {
        tracing::debug!(job_id = %id, status = %cancelled.job.status, "Cancel on finished job");
    }
    Ok(Json(cancelled.job.into()))
}
