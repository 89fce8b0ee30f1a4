use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::brand::Brand;
use crate::models::job::{JobKind, JobPayload};
use crate::models::requests::{channel_name, CreateBrandRequest, EnqueueResponse};

/// POST /api/v1/brands: manual brand entry.
pub async fn create_brand(
    State(state): State<AppState>,
    Json(request): Json<CreateBrandRequest>,
) -> AppResult<(StatusCode, Json<Brand>)> {
    request.validate()?;

    let now = Utc::now();
    let brand = Brand {
        id: Uuid::new_v4(),
        name: request.name.trim().to_string(),
        website: request.website,
        identity: request.identity,
        created_at: now,
        updated_at: now,
    };
    state.catalog.insert_brand(&brand).await?;

    tracing::info!(brand_id = %brand.id, name = %brand.name, "Brand created");
    Ok((StatusCode::CREATED, Json(brand)))
}

/// GET /api/v1/brands/{id}
pub async fn get_brand(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Brand>> {
    let brand = state
        .catalog
        .get_brand(id)
        .await?
        .ok_or_else(|| AppError::not_found("brand", id))?;
    Ok(Json(brand))
}

/// POST /api/v1/brands/{id}/sync: re-analyse the brand website.
pub async fn sync_brand(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    let brand = state
        .catalog
        .get_brand(id)
        .await?
        .ok_or_else(|| AppError::not_found("brand", id))?;
    if brand.website.is_none() {
        return Err(AppError::Validation("brand has no website to sync".to_string()));
    }

    let payload = JobPayload {
        brand_id: Some(id),
        ..Default::default()
    };
    let job = state.queue.enqueue(JobKind::DataSync, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
            channel: channel_name(job.id),
        }),
    ))
}
