//! Axum route handlers for the Generation API.

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::errors::AppError;
use crate::generation::{GeneratedRecord, GenerationRequest, RecordKind};
use crate::llm_client::SamplingParams;
use crate::references::ReferenceCandidate;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub kind: RecordKind,
    pub prompt: String,
    /// What makes two requests "the same" for caching. Defaults to the prompt.
    #[serde(default)]
    pub key_inputs: Vec<String>,
    #[serde(default)]
    pub references: Option<Vec<ReferenceCandidate>>,
    #[serde(default)]
    pub sampling: Option<SamplingParams>,
}

impl GenerateBody {
    fn into_request(self) -> Result<GenerationRequest, AppError> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt cannot be empty".to_string()));
        }
        if let Some(references) = &self.references {
            if references.iter().any(|r| r.id.trim().is_empty()) {
                return Err(AppError::Validation(
                    "every reference needs a non-empty id".to_string(),
                ));
            }
        }

        let mut request =
            GenerationRequest::new(self.kind, self.prompt).with_key_inputs(self.key_inputs);
        if let Some(references) = self.references {
            request = request.with_references(references);
        }
        if let Some(sampling) = self.sampling {
            request = request.with_sampling(sampling);
        }
        Ok(request)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/generate
///
/// Returns the cached record when one is still fresh.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GeneratedRecord>, AppError> {
    let request = body.into_request()?;
    let record = state.orchestrator.generate(request).await?;
    Ok(Json(record))
}

/// POST /api/v1/generate/regenerate
///
/// Always calls the backend, then replaces the cached record.
pub async fn handle_regenerate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GeneratedRecord>, AppError> {
    let request = body.into_request()?;
    let record = state.orchestrator.regenerate(request).await?;
    Ok(Json(record))
}
