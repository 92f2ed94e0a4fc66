//! Axum route handlers for the Classification API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::errors::AppError;
use crate::state::AppState;

/// Upper bound on message size accepted for classification.
const MAX_MESSAGE_CHARS: usize = 8_000;

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub result: ClassificationResult,
    /// Whether the caller should act on `result` at the configured threshold.
    pub proceed: bool,
}

/// POST /api/v1/classify
///
/// Never fails because of the model: backend problems degrade to the
/// heuristic result.
pub async fn handle_classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message cannot be empty".to_string()));
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "message exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }

    let result = state
        .classifier
        .classify(&request.message, request.context.as_deref())
        .await;
    let proceed = state.classifier.should_proceed(&result);

    Ok(Json(ClassifyResponse { result, proceed }))
}
