use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "coach-api",
        "cache_namespace": state.config.cache_namespace,
        "llm_configured": state.config.anthropic_api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }))
}
