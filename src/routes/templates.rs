use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::error::AppResult;
use crate::models::template::Template;

/// GET /api/v1/templates
pub async fn list_templates(State(state): State<AppState>) -> AppResult<Json<Vec<Template>>> {
    Ok(Json(state.catalog.list_templates().await?))
}
