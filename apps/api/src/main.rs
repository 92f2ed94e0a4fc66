mod cache;
mod classifier;
mod config;
mod errors;
mod generation;
mod llm_client;
mod references;
mod routes;
mod salvage;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{FileStore, MemoryStore, PersistentStore, RedisStore, SystemClock, TwoTierCache};
use crate::classifier::{ClassifierSettings, IntentClassifier};
use crate::config::{CacheStoreKind, Config};
use crate::generation::{Orchestrator, TtlClass};
use crate::llm_client::{GenerationBackend, LlmClient};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Coach API v{}", env!("CARGO_PKG_VERSION"));

    // Result cache: one instance, shared by the classifier and the orchestrator
    let store = build_store(&config.cache_store)?;
    let cache = Arc::new(TwoTierCache::new(
        config.cache_namespace.clone(),
        store,
        Arc::new(SystemClock),
    ));
    info!("Result cache initialized (namespace: {})", cache.namespace());

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    if llm.is_configured() {
        info!("LLM client initialized (model: {})", llm_client::MODEL);
    } else {
        tracing::warn!("ANTHROPIC_API_KEY not set: classification uses heuristics, generation will fail");
    }
    let configured = llm.is_configured();
    let backend: Arc<dyn GenerationBackend> = Arc::new(llm);

    let classifier = IntentClassifier::new(
        configured.then(|| backend.clone()),
        cache.clone(),
        config.cache_ttls.for_class(TtlClass::Classification),
        ClassifierSettings {
            min_confidence: config.classifier_min_confidence,
            short_message_chars: config.classifier_short_message_chars,
        },
    );

    let mut orchestrator = Orchestrator::new(
        backend,
        cache.clone(),
        config.cache_ttls.clone(),
        config.reference_cap,
    );
    if !config.single_flight {
        orchestrator = orchestrator.without_single_flight();
    }

    // Build app state
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        classifier: Arc::new(classifier),
        cache,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Opens the configured persistent tier.
fn build_store(kind: &CacheStoreKind) -> Result<Option<Arc<dyn PersistentStore>>> {
    let store: Arc<dyn PersistentStore> = match kind {
        CacheStoreKind::Disabled => {
            info!("Cache store: in-process map only");
            return Ok(None);
        }
        CacheStoreKind::Memory { quota_bytes } => {
            info!("Cache store: memory (quota: {quota_bytes:?} bytes)");
            Arc::new(match quota_bytes {
                Some(quota) => MemoryStore::with_quota(*quota),
                None => MemoryStore::new(),
            })
        }
        CacheStoreKind::Redis(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Cache store: redis");
            Arc::new(RedisStore::new(client))
        }
        CacheStoreKind::File(path) => {
            let store = FileStore::open(path.clone())?;
            info!("Cache store: file at {}", store.path().display());
            Arc::new(store)
        }
    };
    Ok(Some(store))
}
