use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::AppResult;
use crate::models::job::JobKind;
use crate::models::requests::{channel_name, EnqueueResponse, GenerateCampaignRequest};

/// POST /api/v1/creative-generator/generate-campaign: one creative per template.
pub async fn generate_campaign(
    State(state): State<AppState>,
    Json(request): Json<GenerateCampaignRequest>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    request.validate()?;

    let job = state
        .queue
        .enqueue(JobKind::FullCampaign, request.payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
            channel: channel_name(job.id),
        }),
    ))
}
