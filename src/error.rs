use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::app_state::AppState;

use crate::db::StoreError;
use crate::services::jobs::JobError;
use crate::services::storage::StorageError;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Text of a redacted 500, kept on the response for [`reveal_internal_errors`].
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

/// Application-level error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) | AppError::Job(JobError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::NotFound { .. }
            | AppError::Job(JobError::NotFound { .. })
            | AppError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_)
            | AppError::Store(StoreError::Constraint(_))
            | AppError::Job(JobError::Store(StoreError::Constraint(_))) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            let mut response = error_body(status, INTERNAL_MESSAGE, code);
            response
                .extensions_mut()
                .insert(InternalErrorDetail(self.to_string()));
            return response;
        }

        error_body(status, &self.to_string(), code)
    }
}

fn error_body(status: StatusCode, message: &str, code: &str) -> Response {
    let body = json!({
        "error": message,
        "code": code,
    });
    (status, axum::Json(body)).into_response()
}

/// Response middleware putting the real error text back into 500 bodies
/// when the deployment allows it (never in production).
pub async fn reveal_internal_errors(State(state): State<AppState>, response: Response) -> Response {
    reveal(state.expose_internal_errors, response)
}

fn reveal(expose: bool, response: Response) -> Response {
    if !expose {
        return response;
    }
    match response.extensions().get::<InternalErrorDetail>() {
        Some(InternalErrorDetail(detail)) => {
            error_body(response.status(), detail, "INTERNAL_ERROR")
        }
        None => response,
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}
