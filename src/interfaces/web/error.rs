//! Maps the typed pipeline errors onto HTTP status codes. Handlers return
//! `ApiResult<T>`; the `?` operator carries a `PipelineError` straight to a
//! JSON error response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::core::error::PipelineError;

pub struct ApiError(pub PipelineError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::RunNotFound(_)
            | PipelineError::UnknownStage(_)
            | PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Conflict(_) | PipelineError::RerunRequired { .. } => {
                StatusCode::CONFLICT
            }
            PipelineError::Validation { .. }
            | PipelineError::Dependency { .. }
            | PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Scheduler(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Template(_)
            | PipelineError::Config(_)
            | PipelineError::Cleanup { .. }
            | PipelineError::StateCorrupt { .. }
            | PipelineError::Io(_)
            | PipelineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{}", self.0);
        }

        let body = match &self.0 {
            PipelineError::Validation {
                errors, warnings, ..
            } => json!({
                "error": self.0.to_string(),
                "errors": errors,
                "warnings": warnings,
            }),
            _ => json!({ "error": self.0.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
