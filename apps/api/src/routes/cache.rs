use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::{CacheKey, ClearReport};
use crate::classifier::CLASSIFICATION_CATEGORY;
use crate::errors::AppError;
use crate::generation::RecordKind;
use crate::state::AppState;

/// DELETE /api/v1/cache
/// Drops every cached result in this service's namespace.
pub async fn handle_clear_cache(State(state): State<AppState>) -> Json<ClearReport> {
    let report = state.cache.clear();
    tracing::info!(
        "Cleared cache namespace {}: {} in memory, {} persistent",
        state.cache.namespace(),
        report.memory,
        report.persistent
    );
    Json(report)
}

fn known_category(category: &str) -> Result<(), AppError> {
    if category == CLASSIFICATION_CATEGORY || RecordKind::parse(category).is_some() {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Unknown cache category '{category}'")))
    }
}

/// DELETE /api/v1/cache/:category
pub async fn handle_clear_cache_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<ClearReport>, AppError> {
    known_category(&category)?;
    let report = state.cache.clear_category(&category);
    tracing::info!(
        "Cleared cache category {category}: {} in memory, {} persistent",
        report.memory,
        report.persistent
    );
    Ok(Json(report))
}

/// DELETE /api/v1/cache/:category/:hash
/// Evicts one entry, addressed by the `cache_key` a record was returned with.
pub async fn handle_remove_cache_entry(
    State(state): State<AppState>,
    Path((category, hash)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let key = CacheKey::from_parts(&category, &hash)
        .ok_or_else(|| AppError::Validation(format!("'{hash}' is not a cache key hash")))?;
    known_category(key.category())?;
    state.cache.remove(&key);
    tracing::info!("Evicted cache entry {key}");
    Ok(StatusCode::NO_CONTENT)
}
