/// LLM Client — the single point of entry for all generation backend calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// Everything else depends on the `GenerationBackend` trait, never on the
/// HTTP shape below.
///
/// No retries here: a failed call is terminal and the caller decides.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

use prompts::{JSON_ONLY_SYSTEM, OUTPUT_SHAPE_INSTRUCTION};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all generation calls.
pub const MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Generation backend unreachable: {0}")]
    Transport(String),

    #[error("Generation backend rate limited: {0}")]
    Quota(String),

    #[error("Generation backend rejected credentials: {0}")]
    Auth(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// What the orchestrator and classifier hand to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub prompt: String,
    pub system: String,
    /// JSON schema the output should follow. A bias, not a guarantee.
    pub output_schema: Option<Value>,
    pub sampling: SamplingParams,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: system.into(),
            output_schema: None,
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub text: String,
    /// The backend stopped because it hit its token budget.
    pub truncated: bool,
}

/// A black box that turns a prompt (plus optional output shape) into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic wire format
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Anthropic Messages API backend.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
}

impl LlmClient {
    /// A client without an API key is valid; every call fails with `Auth`.
    pub fn new(api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl GenerationBackend for LlmClient {
    async fn generate(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Auth("ANTHROPIC_API_KEY is not configured".to_string()))?;

        let system = build_system_prompt(&request.system, request.output_schema.as_ref());
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: request.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: &system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.sampling.temperature,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, body);
            return Err(error_for_status(status, &body));
        }

        let llm_response: LlmResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("undecodable response: {e}")))?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}, stop_reason={:?}",
            llm_response.usage.input_tokens,
            llm_response.usage.output_tokens,
            llm_response.stop_reason
        );

        let truncated = llm_response.stop_reason.as_deref() == Some("max_tokens");
        if truncated {
            warn!("LLM output hit the token budget and is truncated");
        }

        Ok(BackendResponse {
            text: llm_response.text().unwrap_or_default().to_string(),
            truncated,
        })
    }
}

/// Appends the JSON-only rule and, when present, the schema to the system prompt.
fn build_system_prompt(system: &str, schema: Option<&Value>) -> String {
    match schema {
        Some(schema) => format!(
            "{system}\n\n{JSON_ONLY_SYSTEM}\n\n{}",
            OUTPUT_SHAPE_INSTRUCTION.replace("{schema}", &schema.to_string())
        ),
        None => system.to_string(),
    }
}

fn error_for_status(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<AnthropicError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("status {}: {}", status.as_u16(), message);
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::Quota(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(message),
        _ => BackendError::Transport(message),
    }
}
