//! Generation Orchestrator — coordinates one structured generation call.
//!
//! Flow: cache key → cache lookup → reference list into prompt → backend →
//!       parse (salvage on failure) → resolve reference indices → validate →
//!       cache write → return.
//!
//! There is no retry loop. A backend failure is terminal for the call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, TwoTierCache};
use crate::config::CacheTtls;
use crate::generation::prompts::{system_prompt_for, REFERENCES_PLACEHOLDER};
use crate::generation::shapes::{OutputShape, RecordKind, ReferenceBinding, TtlClass};
use crate::generation::single_flight::SingleFlight;
use crate::generation::GenerationError;
use crate::llm_client::prompts::REFERENCE_INSTRUCTION;
use crate::llm_client::{BackendRequest, GenerationBackend, SamplingParams};
use crate::references::{ReferenceCandidate, ReferenceList};
use crate::salvage::{parse_or_salvage, ArrayField, ParseOutcome};

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// Everything the orchestrator needs for one call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: RecordKind,
    pub prompt: String,
    pub system: String,
    pub shape: OutputShape,
    /// Semantic inputs hashed into the cache key. Falls back to the prompt.
    pub key_inputs: Vec<String>,
    pub ttl_class: TtlClass,
    /// Candidates the backend may refer to by index.
    pub references: Option<Vec<ReferenceCandidate>>,
    pub sampling: SamplingParams,
}

impl GenerationRequest {
    /// A request with the kind's default system prompt, shape, and TTL class.
    pub fn new(kind: RecordKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            system: system_prompt_for(kind).to_string(),
            shape: kind.default_shape(),
            key_inputs: Vec::new(),
            ttl_class: kind.default_ttl_class(),
            references: None,
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_key_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_references(mut self, candidates: Vec<ReferenceCandidate>) -> Self {
        self.references = Some(candidates);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

/// A validated structured result.
///
/// `recovered` is set when the payload was salvaged: the array holds only
/// the elements that survived, so its length is a lower bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub data: Value,
    pub recovered: Option<usize>,
    pub truncated: bool,
    pub generated_at: DateTime<Utc>,
    pub cache_key: String,
    #[serde(default)]
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CacheMode {
    Use,
    Skip,
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    cache: Arc<TwoTierCache>,
    ttls: CacheTtls,
    reference_cap: usize,
    single_flight: Option<SingleFlight>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        cache: Arc<TwoTierCache>,
        ttls: CacheTtls,
        reference_cap: usize,
    ) -> Self {
        Self {
            backend,
            cache,
            ttls,
            reference_cap,
            single_flight: Some(SingleFlight::new()),
        }
    }

    /// Lets concurrent identical misses each call the backend.
    pub fn without_single_flight(mut self) -> Self {
        self.single_flight = None;
        self
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedRecord, GenerationError> {
        self.run(request, CacheMode::Use).await
    }

    /// Skips the cache read but still refreshes the cache on success.
    pub async fn regenerate(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedRecord, GenerationError> {
        self.run(request, CacheMode::Skip).await
    }

    async fn run(
        &self,
        request: GenerationRequest,
        mode: CacheMode,
    ) -> Result<GeneratedRecord, GenerationError> {
        let kind = request.kind;
        let references = request
            .references
            .clone()
            .map(|candidates| ReferenceList::new(candidates, self.reference_cap));
        let key = cache_key(&request, references.as_ref());

        let _in_flight = match &self.single_flight {
            Some(flights) => Some(flights.acquire(&key.to_string()).await),
            None => None,
        };

        if mode == CacheMode::Use {
            debug!("Generation {key}: checking-cache");
            if let Some(mut record) = self.cache.get::<GeneratedRecord>(&key) {
                info!("Generation {key}: cache hit");
                record.from_cache = true;
                return Ok(record);
            }
        }

        let prompt = assemble_prompt(&request.prompt, references.as_ref());
        info!(
            "Generation {key}: calling-backend ({} reference candidates)",
            references.as_ref().map_or(0, ReferenceList::len)
        );

        let backend_request = BackendRequest::new(prompt, request.system.clone())
            .with_schema(request.shape.schema.clone())
            .with_sampling(request.sampling.clone());

        let response = self.backend.generate(backend_request).await.map_err(|e| {
            warn!("Generation {key}: failed at backend: {e}");
            GenerationError::Backend(e)
        })?;

        if response.text.trim().is_empty() {
            warn!("Generation {key}: failed, empty response");
            return Err(GenerationError::EmptyResponse);
        }

        debug!("Generation {key}: parsing");
        let (mut data, recovered) = match parse_or_salvage(&response.text, request.shape.array.as_ref()) {
            Ok(ParseOutcome::Complete(value)) => (value, None),
            Ok(ParseOutcome::Salvaged(elements)) => {
                let count = elements.len();
                let field = request
                    .shape
                    .array
                    .as_ref()
                    .map(|a| a.name.clone())
                    .unwrap_or_default();
                warn!("Generation {key}: salvaged {count} element(s) of `{field}` from malformed output");
                let mut salvaged = serde_json::Map::new();
                salvaged.insert(field, Value::Array(elements));
                (Value::Object(salvaged), Some(count))
            }
            Err(e) => {
                warn!("Generation {key}: failed, unparseable output: {e}");
                return Err(e.into());
            }
        };

        request.shape.validate(&data).inspect_err(|e| {
            warn!("Generation {key}: failed validation: {e}");
        })?;

        let offered = request
            .shape
            .array
            .as_ref()
            .map_or(0, |array| element_count(&data, array));
        if let Some(array) = &request.shape.array {
            drop_incomplete_elements(&mut data, array);
        }
        if let Some(binding) = &request.shape.references {
            let empty = ReferenceList::new(Vec::new(), 0);
            resolve_references(
                &mut data,
                binding,
                request.shape.array.as_ref(),
                references.as_ref().unwrap_or(&empty),
            );
        }
        if let Some(array) = &request.shape.array {
            if offered > 0 && element_count(&data, array) == 0 {
                warn!("Generation {key}: failed, none of {offered} `{}` element(s) usable", array.name);
                return Err(GenerationError::NoCompleteElements(array.name.clone()));
            }
        }

        let record = GeneratedRecord {
            id: Uuid::new_v4(),
            kind,
            data,
            recovered,
            truncated: response.truncated,
            generated_at: Utc::now(),
            cache_key: key.to_string(),
            from_cache: false,
        };

        self.cache
            .set(&key, &record, self.ttls.for_class(request.ttl_class));
        info!("Generation {key}: done");

        Ok(record)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

/// Key over the semantic inputs plus the IDs of the visible reference
/// candidates (different candidates can yield different records).
fn cache_key(request: &GenerationRequest, references: Option<&ReferenceList>) -> CacheKey {
    let mut inputs: Vec<String> = if request.key_inputs.is_empty() {
        vec![request.prompt.clone()]
    } else {
        request.key_inputs.clone()
    };
    if let Some(list) = references {
        inputs.push(format!("refs={}", list.ids().collect::<Vec<_>>().join(",")));
    }
    CacheKey::derive(request.kind.as_str(), inputs)
}

/// Places the reference block at `{references}` if the prompt has one,
/// otherwise appends it.
fn assemble_prompt(prompt: &str, references: Option<&ReferenceList>) -> String {
    let Some(list) = references else {
        return prompt.to_string();
    };
    let items = if list.is_empty() {
        "(none)".to_string()
    } else {
        list.render_for_prompt()
    };
    let block = format!("{items}\n\n{REFERENCE_INSTRUCTION}");

    if prompt.contains(REFERENCES_PLACEHOLDER) {
        prompt.replace(REFERENCES_PLACEHOLDER, &block)
    } else {
        format!("{prompt}\n\nREFERENCE ITEMS (one JSON object per line):\n{block}")
    }
}

fn element_count(data: &Value, array: &ArrayField) -> usize {
    data.get(&array.name)
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Applies the same element policy as salvage to a fully parsed array.
fn drop_incomplete_elements(data: &mut Value, array: &ArrayField) {
    let Some(elements) = data.get_mut(&array.name).and_then(Value::as_array_mut) else {
        return;
    };
    let before = elements.len();
    elements.retain(|element| {
        element.as_object().is_some_and(|fields| {
            array
                .required_keys
                .iter()
                .all(|k| fields.get(k).is_some_and(|v| !v.is_null()))
        })
    });
    if elements.len() < before {
        debug!(
            "Dropped {} incomplete `{}` element(s)",
            before - elements.len(),
            array.name
        );
    }
}

/// Swaps backend indices for stable IDs. Unresolvable list entries vanish.
/// An array element whose scalar index does not resolve is dropped; on a
/// plain record it becomes `null`. The index key never reaches the caller.
fn resolve_references(
    data: &mut Value,
    binding: &ReferenceBinding,
    array: Option<&ArrayField>,
    list: &ReferenceList,
) {
    let elements = array
        .and_then(|a| data.get_mut(&a.name))
        .and_then(Value::as_array_mut);
    match elements {
        Some(elements) => {
            let before = elements.len();
            elements.retain_mut(|element| bind_reference(element, binding, list));
            if elements.len() < before {
                debug!(
                    "Dropped {} element(s) with unresolvable `{}`",
                    before - elements.len(),
                    binding.index_key
                );
            }
        }
        None => {
            bind_reference(data, binding, list);
        }
    }
}

/// Returns false when a scalar index failed to resolve.
fn bind_reference(target: &mut Value, binding: &ReferenceBinding, list: &ReferenceList) -> bool {
    let Some(fields) = target.as_object_mut() else {
        return true;
    };
    let Some(raw) = fields.remove(&binding.index_key) else {
        return true;
    };
    let (resolved, bound) = match &raw {
        Value::Array(items) => (Value::from(list.resolve(items)), true),
        scalar => match list.resolve_one(scalar) {
            Ok(id) => (Value::from(id), true),
            Err(reason) => {
                debug!("Dropping backend reference: {reason}");
                (Value::Null, false)
            }
        },
    };
    fields.insert(binding.id_key.clone(), resolved);
    bound
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
