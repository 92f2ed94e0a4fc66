pub mod cache;
pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::classifier::handlers as classifier_handlers;
use crate::generation::handlers as generation_handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Classification API
        .route(
            "/api/v1/classify",
            post(classifier_handlers::handle_classify),
        )
        // Generation API
        .route(
            "/api/v1/generate",
            post(generation_handlers::handle_generate),
        )
        .route(
            "/api/v1/generate/regenerate",
            post(generation_handlers::handle_regenerate),
        )
        // Cache administration
        .route("/api/v1/cache", delete(cache::handle_clear_cache))
        .route(
            "/api/v1/cache/:category",
            delete(cache::handle_clear_cache_category),
        )
        .route(
            "/api/v1/cache/:category/:hash",
            delete(cache::handle_remove_cache_entry),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::cache::TwoTierCache;
    use crate::classifier::{ClassifierSettings, IntentClassifier};
    use crate::config::{CacheTtls, Config};
    use crate::generation::Orchestrator;
    use crate::llm_client::{BackendError, BackendResponse, MockGenerationBackend};
    use crate::references::DEFAULT_REFERENCE_CAP;

    fn app(backend: MockGenerationBackend) -> Router {
        let cache = Arc::new(TwoTierCache::in_memory("coach"));
        let orchestrator = Orchestrator::new(
            Arc::new(backend),
            cache.clone(),
            CacheTtls::default(),
            DEFAULT_REFERENCE_CAP,
        );
        let classifier = IntentClassifier::new(
            None,
            cache.clone(),
            Duration::from_secs(60),
            ClassifierSettings::default(),
        );
        build_router(AppState {
            orchestrator: Arc::new(orchestrator),
            classifier: Arc::new(classifier),
            cache,
            config: Config::default(),
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn replies(text: &'static str) -> MockGenerationBackend {
        let mut backend = MockGenerationBackend::new();
        backend.expect_generate().times(1).returning(move |_| {
            Ok(BackendResponse {
                text: text.to_string(),
                truncated: false,
            })
        });
        backend
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(MockGenerationBackend::new());
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["service"], json!("coach-api"));
    }

    #[tokio::test]
    async fn test_generate_then_cached() {
        let app = app(replies(r#"{"answer": "Because I like Rust", "story_indices": [0]}"#));
        let body = json!({
            "kind": "answer",
            "prompt": "Why do you want this job?",
            "key_inputs": ["why-job", "acme"],
            "references": [{"id": "story-a", "content": {"title": "Migration"}}]
        });

        let (status, first) = send(&app, Method::POST, "/api/v1/generate", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["kind"], json!("answer"));
        assert_eq!(first["data"]["story_ids"], json!(["story-a"]));
        assert_eq!(first["from_cache"], json!(false));

        let (status, second) = send(&app, Method::POST, "/api/v1/generate", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["from_cache"], json!(true));
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_prompt() {
        let app = app(MockGenerationBackend::new());
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/generate",
            Some(json!({"kind": "analysis", "prompt": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_generate_quota_maps_to_429() {
        let mut backend = MockGenerationBackend::new();
        backend
            .expect_generate()
            .returning(|_| Err(BackendError::Quota("status 429: slow down".into())));
        let app = app(backend);
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/generate/regenerate",
            Some(json!({"kind": "research", "prompt": "Research Acme"})),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], json!("LLM_QUOTA"));
    }

    #[tokio::test]
    async fn test_generate_parse_failure_maps_to_502() {
        let app = app(replies(r#"{"questions": [{"quest"#));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/generate",
            Some(json!({"kind": "analysis", "prompt": "Predict questions"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], json!("GENERATION_PARSE_ERROR"));
    }

    #[tokio::test]
    async fn test_classify_reports_proceed() {
        let app = app(MockGenerationBackend::new());
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/classify",
            Some(json!({"message": "Help me prepare for my interview at Figma"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["category"], json!("interview_prep"));
        assert_eq!(body["proceed"], json!(true));

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/classify",
            Some(json!({"message": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear_cache_by_category() {
        let app = app(replies(r#"{"body": "Dear Acme..."}"#));
        send(
            &app,
            Method::POST,
            "/api/v1/generate",
            Some(json!({"kind": "cover_letter", "prompt": "Write to Acme"})),
        )
        .await;

        let (status, report) = send(&app, Method::DELETE, "/api/v1/cache/cover_letter", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["memory"], json!(1));

        let (status, _) = send(&app, Method::DELETE, "/api/v1/cache/bogus", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, report) = send(&app, Method::DELETE, "/api/v1/cache", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["memory"], json!(0));
    }

    #[tokio::test]
    async fn test_evict_single_entry_forces_regeneration() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_generate().times(2).returning(|_| {
            Ok(BackendResponse {
                text: r#"{"body": "Dear Acme..."}"#.to_string(),
                truncated: false,
            })
        });
        let app = app(backend);
        let body = json!({"kind": "cover_letter", "prompt": "Write to Acme"});

        let (_, record) = send(&app, Method::POST, "/api/v1/generate", Some(body.clone())).await;
        let cache_key = record["cache_key"].as_str().unwrap().replacen(':', "/", 1);

        let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/cache/{cache_key}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, again) = send(&app, Method::POST, "/api/v1/generate", Some(body)).await;
        assert_eq!(again["from_cache"], json!(false));

        let (status, _) = send(&app, Method::DELETE, "/api/v1/cache/answer/xyz", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
