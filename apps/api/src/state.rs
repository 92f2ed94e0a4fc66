use std::sync::Arc;

use crate::cache::TwoTierCache;
use crate::classifier::IntentClassifier;
use crate::config::Config;
use crate::generation::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub classifier: Arc<IntentClassifier>,
    /// Same instance the orchestrator and classifier write to.
    pub cache: Arc<TwoTierCache>,
    pub config: Config,
}
