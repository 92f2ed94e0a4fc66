//! Intent Classifier — decides whether a free-text message asks for one of
//! the coaching actions, and which.
//!
//! Cheap deterministic pre-filters run first and absorb most traffic. Only
//! ambiguous messages reach the model. Classification never fails outward:
//! any model problem degrades to the pre-filter's heuristic guess at
//! [`FALLBACK_CONFIDENCE`].

pub mod handlers;
pub mod patterns;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, TwoTierCache};
use crate::llm_client::{BackendError, BackendRequest, GenerationBackend, SamplingParams};
use crate::salvage;

use patterns::{default_chain, PreFilter, Verdict};
use prompts::{build_classification_prompt, classification_schema, CLASSIFIER_SYSTEM};

/// Cache category for model-assisted classifications.
pub const CLASSIFICATION_CATEGORY: &str = "classification";

/// Confidence reported when the model path fails and the heuristic is used.
pub const FALLBACK_CONFIDENCE: u8 = 40;

const CLASSIFIER_MAX_TOKENS: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    CompanyResearch,
    InterviewPrep,
    StoryMatching,
    CoverLetter,
    ApplicationAnswer,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 5] = [
        ActionCategory::CompanyResearch,
        ActionCategory::InterviewPrep,
        ActionCategory::StoryMatching,
        ActionCategory::CoverLetter,
        ActionCategory::ApplicationAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::CompanyResearch => "company_research",
            ActionCategory::InterviewPrep => "interview_prep",
            ActionCategory::StoryMatching => "story_matching",
            ActionCategory::CoverLetter => "cover_letter",
            ActionCategory::ApplicationAnswer => "application_answer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// `category` is `Some` only when `needs_action` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub needs_action: bool,
    pub category: Option<ActionCategory>,
    /// 0..=100
    pub confidence: u8,
    pub extracted_query: String,
    pub reasoning: String,
}

impl ClassificationResult {
    pub fn no_action(confidence: u8, reasoning: &str) -> Self {
        Self {
            needs_action: false,
            category: None,
            confidence,
            extracted_query: String::new(),
            reasoning: reasoning.to_string(),
        }
    }

    fn enforce_invariant(mut self) -> Self {
        if !self.needs_action {
            self.category = None;
        }
        self
    }
}

/// Whether a caller should act on `result`. An action without a category is
/// never acted on, however confident.
pub fn should_proceed(result: &ClassificationResult, min_confidence: u8) -> bool {
    result.needs_action && result.category.is_some() && result.confidence >= min_confidence
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub min_confidence: u8,
    /// Messages shorter than this with no pattern or trigger are not actions.
    pub short_message_chars: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            min_confidence: 70,
            short_message_chars: 40,
        }
    }
}

/// What the model answered, before clamping and invariant enforcement.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelClassification {
    needs_action: bool,
    category: Option<String>,
    confidence: f64,
    extracted_query: String,
    reasoning: String,
}

impl ModelClassification {
    fn into_result(self, message: &str) -> ClassificationResult {
        let category = self.category.as_deref().and_then(ActionCategory::parse);
        let extracted_query = if self.extracted_query.trim().is_empty() {
            message.trim().to_string()
        } else {
            self.extracted_query
        };
        ClassificationResult {
            needs_action: self.needs_action,
            category,
            confidence: clamp_confidence(self.confidence),
            extracted_query,
            reasoning: self.reasoning,
        }
        .enforce_invariant()
    }
}

fn clamp_confidence(raw: f64) -> u8 {
    if raw.is_nan() {
        0
    } else {
        raw.clamp(0.0, 100.0).round() as u8
    }
}

#[derive(Debug, Error)]
enum ModelError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("empty response")]
    Empty,

    #[error("unparseable classification: {0}")]
    Parse(#[from] serde_json::Error),
}

pub struct IntentClassifier {
    backend: Option<Arc<dyn GenerationBackend>>,
    cache: Arc<TwoTierCache>,
    ttl: Duration,
    settings: ClassifierSettings,
    chain: Vec<PreFilter>,
}

impl IntentClassifier {
    /// `backend: None` runs heuristics only.
    pub fn new(
        backend: Option<Arc<dyn GenerationBackend>>,
        cache: Arc<TwoTierCache>,
        ttl: Duration,
        settings: ClassifierSettings,
    ) -> Self {
        let chain = default_chain(settings.short_message_chars);
        Self {
            backend,
            cache,
            ttl,
            settings,
            chain,
        }
    }

    pub fn should_proceed(&self, result: &ClassificationResult) -> bool {
        should_proceed(result, self.settings.min_confidence)
    }

    pub async fn classify(&self, message: &str, context: Option<&str>) -> ClassificationResult {
        let mut heuristic = None;
        for filter in &self.chain {
            match filter.apply(message) {
                Verdict::Decided(result) => {
                    debug!("Classified by {filter:?}: needs_action={}", result.needs_action);
                    return result;
                }
                Verdict::Escalate(result) => {
                    heuristic = Some(result);
                    break;
                }
                Verdict::Continue => {}
            }
        }

        let heuristic = heuristic.unwrap_or_else(|| ClassificationResult {
            extracted_query: message.trim().to_string(),
            ..ClassificationResult::no_action(0, "No request phrasing found")
        });

        self.escalate(message, context, heuristic).await
    }

    async fn escalate(
        &self,
        message: &str,
        context: Option<&str>,
        heuristic: ClassificationResult,
    ) -> ClassificationResult {
        let Some(backend) = &self.backend else {
            debug!("No classification backend configured; using heuristic");
            return fallback(heuristic);
        };

        let key = CacheKey::derive(CLASSIFICATION_CATEGORY, [message, context.unwrap_or_default()]);
        if let Some(cached) = self.cache.get::<ClassificationResult>(&key) {
            debug!("Classification {key}: cache hit");
            return cached;
        }

        let request = BackendRequest::new(
            build_classification_prompt(message, context),
            CLASSIFIER_SYSTEM,
        )
        .with_schema(classification_schema())
        .with_sampling(SamplingParams {
            temperature: Some(0.0),
            max_tokens: Some(CLASSIFIER_MAX_TOKENS),
        });

        match ask_model(backend.as_ref(), request, message).await {
            Ok(result) => {
                info!(
                    "Classification {key}: model says needs_action={} category={:?} confidence={}",
                    result.needs_action, result.category, result.confidence
                );
                self.cache.set(&key, &result, self.ttl);
                result
            }
            Err(e) => {
                warn!("Classification {key}: model path failed, using heuristic: {e}");
                fallback(heuristic)
            }
        }
    }
}

async fn ask_model(
    backend: &dyn GenerationBackend,
    request: BackendRequest,
    message: &str,
) -> Result<ClassificationResult, ModelError> {
    let response = backend.generate(request).await?;
    if response.text.trim().is_empty() {
        return Err(ModelError::Empty);
    }
    let value = salvage::parse(&response.text)?;
    let parsed: ModelClassification = serde_json::from_value(value)?;
    Ok(parsed.into_result(message))
}

fn fallback(heuristic: ClassificationResult) -> ClassificationResult {
    ClassificationResult {
        confidence: FALLBACK_CONFIDENCE,
        reasoning: format!("Heuristic fallback: {}", heuristic.reasoning),
        ..heuristic
    }
    .enforce_invariant()
}
