use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::creative::{Creative, CreativeStatus};
use crate::models::job::JobKind;
use crate::models::requests::{channel_name, CreateCreativeRequest, EnqueueResponse};
use crate::services::storage::asset_key;

/// POST /api/v1/creatives: queue a single- or multi-creative job.
pub async fn create_creative(
    State(state): State<AppState>,
    Json(request): Json<CreateCreativeRequest>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    request.validate()?;

    let kind = request.kind.unwrap_or(JobKind::SingleCreative);
    if !matches!(kind, JobKind::SingleCreative | JobKind::MultiCreative) {
        return Err(AppError::Validation(format!(
            "kind must be single-creative or multi-creative, got {kind}"
        )));
    }

    let job = state.queue.enqueue(kind, request.payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
            channel: channel_name(job.id),
        }),
    ))
}

/// GET /api/v1/creatives/{id}
pub async fn get_creative(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Creative>> {
    let creative = state
        .catalog
        .get_creative(id)
        .await?
        .ok_or_else(|| AppError::not_found("creative", id))?;
    Ok(Json(creative))
}

/// DELETE /api/v1/creatives/{id}: remove the row and its stored files.
pub async fn delete_creative(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let creative = state
        .catalog
        .get_creative(id)
        .await?
        .ok_or_else(|| AppError::not_found("creative", id))?;

    state.catalog.delete_creative(id).await?;

    let mut keys: Vec<String> = creative
        .assets
        .formats()
        .into_iter()
        .filter_map(|f| creative.assets.get(f).map(|a| a.key.clone()))
        .collect();
    keys.push(asset_key(id, "layout.json"));
    for key in keys {
        // The row is gone already; orphaned files are only logged.
        if let Err(e) = state.assets.delete(&key).await {
            tracing::warn!(creative_id = %id, key = %key, error = %e, "Failed to delete asset");
        }
    }

    tracing::info!(creative_id = %id, "Creative deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/creatives/{id}/duplicate: copy a creative and its files.
pub async fn duplicate_creative(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Creative>)> {
    let original = state
        .catalog
        .get_creative(id)
        .await?
        .ok_or_else(|| AppError::not_found("creative", id))?;

    let copy_id = Uuid::new_v4();
    let mut copied = Vec::new();
    let duplicate = match copy_creative(&state, &original, copy_id, &mut copied).await {
        Ok(duplicate) => duplicate,
        Err(e) => {
            // Nothing points at a half-made copy; drop its files.
            for key in &copied {
                if let Err(e) = state.assets.delete(key).await {
                    tracing::warn!(creative_id = %copy_id, key = %key, error = %e, "Failed to delete copied asset");
                }
            }
            return Err(e);
        }
    };

    tracing::info!(creative_id = %copy_id, source_id = %id, "Creative duplicated");
    Ok((StatusCode::CREATED, Json(duplicate)))
}

/// Copy every asset of `original` under `copy_id` and insert the new row.
/// Keys written so far are pushed to `copied`.
async fn copy_creative(
    state: &AppState,
    original: &Creative,
    copy_id: Uuid,
    copied: &mut Vec<String>,
) -> AppResult<Creative> {
    let mut assets = original.assets.clone();
    for format in original.assets.formats() {
        let Some(source) = original.assets.get(format) else {
            continue;
        };
        let bytes = state.assets.get(&source.key).await?;
        let key = asset_key(copy_id, &format!("{format}.png"));
        let url = state.assets.put(&key, &bytes, &source.content_type).await?;
        copied.push(key.clone());
        let mut asset = source.clone();
        asset.key = key;
        asset.url = url;
        assets.set(format, asset);
    }
    match state.assets.get(&asset_key(original.id, "layout.json")).await {
        Ok(manifest) => {
            let key = asset_key(copy_id, "layout.json");
            state.assets.put(&key, &manifest, "application/json").await?;
            copied.push(key);
        }
        Err(e) => tracing::debug!(creative_id = %original.id, error = %e, "No layout manifest to copy"),
    }

    let duplicate = Creative {
        id: copy_id,
        job_id: None,
        assets,
        status: CreativeStatus::Ready,
        created_at: chrono::Utc::now(),
        ..original.clone()
    };
    state.catalog.insert_creative(&duplicate).await?;
    Ok(duplicate)
}
