//! Reference Index Mapper — the only channel between prompt-local indices and
//! stable entity IDs.
//!
//! Candidates (prior stories, saved answers, ...) are capped and numbered
//! `0..n-1` when the prompt is built. The backend only ever sees the numbers.
//! Anything it hands back is untrusted: an index that does not name one of the
//! numbered candidates resolves to nothing rather than failing the call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default number of candidates shown to the backend.
pub const DEFAULT_REFERENCE_CAP: usize = 10;

pub type StableId = String;

/// An entity the backend may refer to. `id` never leaves this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceCandidate {
    pub id: StableId,
    pub content: Value,
}

/// Why a backend-provided index did not resolve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidReference {
    #[error("reference index is missing")]
    Missing,

    #[error("reference index {0} is not an integer")]
    NotAnInteger(Value),

    #[error("reference index {0} is negative")]
    Negative(i64),

    #[error("reference index {index} is out of range for {len} candidates")]
    OutOfRange { index: u64, len: usize },
}

/// A capped, positionally-indexed candidate list for one prompt/response cycle.
#[derive(Debug, Clone)]
pub struct ReferenceList {
    candidates: Vec<ReferenceCandidate>,
}

impl ReferenceList {
    /// Keeps the first `cap` candidates; everything past the cap is invisible
    /// to the backend and can never be referenced.
    pub fn new(mut candidates: Vec<ReferenceCandidate>, cap: usize) -> Self {
        if candidates.len() > cap {
            debug!(
                "Reference list truncated from {} to {cap} candidates",
                candidates.len()
            );
            candidates.truncate(cap);
        }
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// `(index, candidate)` pairs in prompt order.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &ReferenceCandidate)> {
        self.candidates.iter().enumerate()
    }

    /// Stable IDs of the visible candidates, in order. Used as cache-key input.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.id.as_str())
    }

    /// Renders the list for prompt embedding: `{"index": i, ...content}` per
    /// line. Only `content` and the index are emitted.
    pub fn render_for_prompt(&self) -> String {
        self.indexed()
            .map(|(index, candidate)| {
                let view = match &candidate.content {
                    Value::Object(fields) => {
                        let mut view = serde_json::Map::with_capacity(fields.len() + 1);
                        view.insert("index".to_string(), Value::from(index));
                        for (k, v) in fields {
                            if k != "index" {
                                view.insert(k.clone(), v.clone());
                            }
                        }
                        Value::Object(view)
                    }
                    other => serde_json::json!({ "index": index, "content": other }),
                };
                view.to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolves one backend-provided index.
    pub fn resolve_one(&self, raw: &Value) -> Result<&str, InvalidReference> {
        let index = match raw {
            Value::Null => return Err(InvalidReference::Missing),
            Value::Number(n) => {
                if let Some(i) = n.as_u64() {
                    i
                } else if let Some(i) = n.as_i64() {
                    return Err(InvalidReference::Negative(i));
                } else {
                    // Floats: accept only exact non-negative integers like 2.0.
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f < 0.0 => {
                            return Err(InvalidReference::Negative(f as i64))
                        }
                        Some(f) if f.fract() == 0.0 && f <= u32::MAX as f64 => f as u64,
                        _ => return Err(InvalidReference::NotAnInteger(raw.clone())),
                    }
                }
            }
            other => return Err(InvalidReference::NotAnInteger(other.clone())),
        };

        usize::try_from(index)
            .ok()
            .and_then(|i| self.candidates.get(i))
            .map(|c| c.id.as_str())
            .ok_or(InvalidReference::OutOfRange {
                index,
                len: self.candidates.len(),
            })
    }

    /// Resolves a batch, keeping every `Ok` and discarding every `Err`.
    pub fn resolve<'a, I>(&self, raws: I) -> Vec<StableId>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        raws.into_iter()
            .filter_map(|raw| match self.resolve_one(raw) {
                Ok(id) => Some(id.to_string()),
                Err(reason) => {
                    debug!("Dropping backend reference: {reason}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates(n: usize) -> Vec<ReferenceCandidate> {
        (0..n)
            .map(|i| ReferenceCandidate {
                id: format!("story-{i}"),
                content: json!({ "title": format!("Story {i}") }),
            })
            .collect()
    }

    #[test]
    fn test_resolve_drops_invalid_indices() {
        let list = ReferenceList::new(candidates(2), DEFAULT_REFERENCE_CAP);
        let raws = [json!(-1), json!(0), json!(3), Value::Null];
        assert_eq!(list.resolve(&raws), vec!["story-0".to_string()]);
    }

    #[test]
    fn test_resolve_one_reasons() {
        let list = ReferenceList::new(candidates(2), DEFAULT_REFERENCE_CAP);
        assert_eq!(list.resolve_one(&json!(1)), Ok("story-1"));
        assert_eq!(list.resolve_one(&json!(1.0)), Ok("story-1"));
        assert_eq!(list.resolve_one(&Value::Null), Err(InvalidReference::Missing));
        assert_eq!(list.resolve_one(&json!(-4)), Err(InvalidReference::Negative(-4)));
        assert_eq!(
            list.resolve_one(&json!(2)),
            Err(InvalidReference::OutOfRange { index: 2, len: 2 })
        );
        assert!(matches!(
            list.resolve_one(&json!(0.5)),
            Err(InvalidReference::NotAnInteger(_))
        ));
        assert!(matches!(
            list.resolve_one(&json!("0")),
            Err(InvalidReference::NotAnInteger(_))
        ));
        assert!(matches!(
            list.resolve_one(&json!(true)),
            Err(InvalidReference::NotAnInteger(_))
        ));
    }

    #[test]
    fn test_cap_hides_candidates_past_the_limit() {
        let list = ReferenceList::new(candidates(15), DEFAULT_REFERENCE_CAP);
        assert_eq!(list.len(), 10);
        assert_eq!(list.resolve_one(&json!(9)), Ok("story-9"));
        assert!(list.resolve_one(&json!(12)).is_err());
    }

    #[test]
    fn test_prompt_rendering_never_contains_ids() {
        let list = ReferenceList::new(candidates(3), DEFAULT_REFERENCE_CAP);
        let rendered = list.render_for_prompt();
        assert!(!rendered.contains("story-"));
        let lines: Vec<Value> = rendered
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["index"], json!(2));
        assert_eq!(lines[2]["title"], json!("Story 2"));
    }

    #[test]
    fn test_content_cannot_spoof_its_index() {
        let list = ReferenceList::new(
            vec![ReferenceCandidate {
                id: "s".into(),
                content: json!({ "index": 7, "title": "t" }),
            }],
            DEFAULT_REFERENCE_CAP,
        );
        let line: Value = serde_json::from_str(&list.render_for_prompt()).unwrap();
        assert_eq!(line["index"], json!(0));
    }

    #[test]
    fn test_scalar_content_is_wrapped() {
        let list = ReferenceList::new(
            vec![ReferenceCandidate {
                id: "s".into(),
                content: json!("Led the migration"),
            }],
            DEFAULT_REFERENCE_CAP,
        );
        assert_eq!(
            list.render_for_prompt(),
            r#"{"content":"Led the migration","index":0}"#
        );
    }
}
