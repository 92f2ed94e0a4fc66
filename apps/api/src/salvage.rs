//! Structured-Output Salvager.
//!
//! Backends cut long outputs off at their token budget, often in the middle of
//! an array element. Rather than discard the whole (already paid for) payload,
//! [`salvage`] walks the raw text and keeps every array element that is
//! complete on its own. It never invents data: an element that does not parse
//! alone, or lacks a required key, is dropped, and if nothing survives the
//! original parse error is returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SalvageError {
    #[error("structured output did not parse and nothing was recoverable: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The array a salvage pass should look for, and what every kept element must
/// contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArrayField {
    pub name: String,
    pub required_keys: Vec<String>,
}

impl ArrayField {
    pub fn new(name: &str, required_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Complete(Value),
    /// Full parse failed; these are the elements recovered from the array.
    Salvaged(Vec<Value>),
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output. A
/// missing closing fence (truncation) is tolerated.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let body = if let Some(stripped) = text.strip_prefix("```json") {
        stripped
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
    } else {
        return text;
    };
    body.trim_start()
        .strip_suffix("```")
        .map(|s| s.trim())
        .unwrap_or(body.trim_start())
}

pub fn parse(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fences(raw))
}

/// Full parse first; salvage `array` only when that fails.
pub fn parse_or_salvage(
    raw: &str,
    array: Option<&ArrayField>,
) -> Result<ParseOutcome, SalvageError> {
    match parse(raw) {
        Ok(value) => Ok(ParseOutcome::Complete(value)),
        Err(e) => match array {
            Some(array) => {
                debug!("Full parse failed ({e}); salvaging `{}`", array.name);
                salvage(raw, &array.name, &array.required_keys).map(ParseOutcome::Salvaged)
            }
            None => Err(SalvageError::Parse(e)),
        },
    }
}

/// Recovers complete elements of the array stored under `array_field`.
///
/// Returns the original parse error when zero elements qualify.
pub fn salvage(
    raw: &str,
    array_field: &str,
    required_keys: &[String],
) -> Result<Vec<Value>, SalvageError> {
    let text = strip_code_fences(raw);
    let recovered: Vec<Value> = candidate_elements(text, array_field)
        .into_iter()
        .filter_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(value) if has_required_keys(&value, required_keys) => Some(value),
            Ok(_) => {
                debug!("Salvage candidate lacks required keys {required_keys:?}");
                None
            }
            Err(e) => {
                debug!("Salvage candidate does not parse: {e}");
                None
            }
        })
        .collect();

    if recovered.is_empty() {
        // Re-parse to hand back the caller's original error.
        return match serde_json::from_str::<Value>(text) {
            Err(e) => Err(SalvageError::Parse(e)),
            Ok(_) => Err(SalvageError::Parse(serde::de::Error::custom(format!(
                "no complete `{array_field}` elements found"
            )))),
        };
    }

    debug!(
        "Salvaged {} element(s) from `{array_field}`",
        recovered.len()
    );
    Ok(recovered)
}

fn has_required_keys(value: &Value, required_keys: &[String]) -> bool {
    let Value::Object(fields) = value else {
        return false;
    };
    required_keys
        .iter()
        .all(|k| fields.get(k).is_some_and(|v| !v.is_null()))
}

// ────────────────────────────────────────────────────────────────────────────
// Scanner
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScanState {
    SeekingArray,
    InArrayBeforeObject,
    InObject { depth: usize, start: usize },
}

/// Slices of `text` that look like complete top-level objects inside the
/// array stored under `array_field`. Braces inside string literals (and
/// escaped quotes inside those) do not move the depth counter.
fn candidate_elements<'a>(text: &'a str, array_field: &str) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    let mut state = ScanState::SeekingArray;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        state = match state {
            ScanState::SeekingArray => match locate_array(text, array_field) {
                Some(after_bracket) => {
                    state = ScanState::InArrayBeforeObject;
                    i = after_bracket;
                    continue;
                }
                None => {
                    debug!("Salvage could not find array field `{array_field}`");
                    break;
                }
            },
            ScanState::InArrayBeforeObject => match b {
                b'{' => ScanState::InObject { depth: 1, start: i },
                b']' => break,
                _ => state,
            },
            ScanState::InObject { depth, start } if in_string => {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                ScanState::InObject { depth, start }
            }
            ScanState::InObject { depth, start } => match b {
                b'"' => {
                    in_string = true;
                    state
                }
                b'{' => ScanState::InObject {
                    depth: depth + 1,
                    start,
                },
                b'}' if depth == 1 => {
                    candidates.push(&text[start..=i]);
                    ScanState::InArrayBeforeObject
                }
                b'}' => ScanState::InObject {
                    depth: depth - 1,
                    start,
                },
                _ => state,
            },
        };
        i += 1;
    }

    candidates
}

/// Byte offset just past the `[` that opens `"array_field": [`.
fn locate_array(text: &str, array_field: &str) -> Option<usize> {
    let needle = format!("\"{array_field}\"");
    text.match_indices(&needle).find_map(|(pos, _)| {
        let after_key = text[pos + needle.len()..].trim_start();
        let after_colon = after_key.strip_prefix(':')?.trim_start();
        after_colon
            .starts_with('[')
            .then(|| text.len() - after_colon.len() + 1)
    })
}
