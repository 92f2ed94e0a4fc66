use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::generation::GenerationError;
use crate::llm_client::BackendError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Generation(e) => {
                tracing::error!("Generation error: {e}");
                generation_error_parts(e)
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

fn generation_error_parts(e: &GenerationError) -> (StatusCode, &'static str, String) {
    match e {
        GenerationError::Backend(BackendError::Quota(_)) => (
            StatusCode::TOO_MANY_REQUESTS,
            "LLM_QUOTA",
            "The generation backend is rate limiting requests. Try again shortly.".to_string(),
        ),
        GenerationError::Backend(BackendError::Auth(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "LLM_NOT_CONFIGURED",
            "The generation backend is not configured or rejected its credentials".to_string(),
        ),
        e if e.is_transport() => (
            StatusCode::BAD_GATEWAY,
            "LLM_ERROR",
            "The generation backend could not be reached or returned nothing".to_string(),
        ),
        _ => (
            StatusCode::BAD_GATEWAY,
            "GENERATION_PARSE_ERROR",
            e.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(e: GenerationError) -> (StatusCode, &'static str) {
        let (status, code, _) = generation_error_parts(&e);
        (status, code)
    }

    #[test]
    fn test_generation_errors_map_to_codes() {
        assert_eq!(
            parts(BackendError::Quota("429".into()).into()),
            (StatusCode::TOO_MANY_REQUESTS, "LLM_QUOTA")
        );
        assert_eq!(
            parts(BackendError::Auth("missing".into()).into()),
            (StatusCode::SERVICE_UNAVAILABLE, "LLM_NOT_CONFIGURED")
        );
        assert_eq!(
            parts(BackendError::Transport("reset".into()).into()),
            (StatusCode::BAD_GATEWAY, "LLM_ERROR")
        );
        assert_eq!(
            parts(GenerationError::EmptyResponse),
            (StatusCode::BAD_GATEWAY, "LLM_ERROR")
        );
        assert_eq!(
            parts(GenerationError::MissingField("body".into())),
            (StatusCode::BAD_GATEWAY, "GENERATION_PARSE_ERROR")
        );
        assert_eq!(
            parts(GenerationError::NoCompleteElements("matches".into())),
            (StatusCode::BAD_GATEWAY, "GENERATION_PARSE_ERROR")
        );
    }

    #[test]
    fn test_validation_is_bad_request() {
        let response = AppError::Validation("prompt cannot be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
