use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diarization_domain::DomainError;
use serde_json::json;

/// Maps the core's semantic error taxonomy (spec.md §7) onto HTTP status
/// codes. Validation/configuration errors never retry and surface as 4xx;
/// everything else that escapes the orchestrator is a 5xx.
#[derive(Debug)]
pub enum HttpError {
    Validation { message: String },
    Internal { message: String },
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::Validation { message } => (StatusCode::BAD_REQUEST, message),
            HttpError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn map_domain_error(error: DomainError) -> HttpError {
    match error {
        DomainError::Validation(message) | DomainError::Configuration(message) => HttpError::Validation { message },
        other => HttpError::Internal { message: other.to_string() },
    }
}
