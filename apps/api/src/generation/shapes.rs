//! Output shapes — what each kind of generated record must look like.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::generation::GenerationError;
use crate::salvage::ArrayField;

/// The kinds of structured record the orchestrator produces. Doubles as the
/// cache category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Likely interview questions for a posting.
    Analysis,
    /// A drafted answer to an application question.
    Answer,
    /// Company research summary.
    Research,
    /// Which prior stories fit a question.
    StoryMatching,
    CoverLetter,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Analysis,
        RecordKind::Answer,
        RecordKind::Research,
        RecordKind::StoryMatching,
        RecordKind::CoverLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Analysis => "analysis",
            RecordKind::Answer => "answer",
            RecordKind::Research => "research",
            RecordKind::StoryMatching => "story_matching",
            RecordKind::CoverLetter => "cover_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn default_ttl_class(&self) -> TtlClass {
        match self {
            RecordKind::Analysis => TtlClass::Analysis,
            RecordKind::Answer | RecordKind::CoverLetter => TtlClass::Answer,
            RecordKind::Research => TtlClass::Research,
            RecordKind::StoryMatching => TtlClass::StoryMatching,
        }
    }

    pub fn default_shape(&self) -> OutputShape {
        let shape = match self {
            RecordKind::Analysis => OutputShape {
                name: "interview_analysis".to_string(),
                schema: json!({
                    "type": "object",
                    "required": ["questions"],
                    "properties": {
                        "summary": {"type": "string"},
                        "questions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["question"],
                                "properties": {
                                    "question": {"type": "string"},
                                    "category": {"type": "string"},
                                    "why_asked": {"type": "string"}
                                }
                            }
                        }
                    }
                }),
                required: vec!["questions".to_string()],
                array: None,
                references: None,
            },
            RecordKind::Answer => OutputShape {
                name: "application_answer".to_string(),
                schema: json!({
                    "type": "object",
                    "required": ["answer"],
                    "properties": {
                        "answer": {"type": "string"},
                        "key_points": {"type": "array", "items": {"type": "string"}},
                        "story_indices": {"type": "array", "items": {"type": "integer"}}
                    }
                }),
                required: vec!["answer".to_string()],
                array: None,
                references: Some(ReferenceBinding::new("story_indices", "story_ids")),
            },
            RecordKind::Research => OutputShape {
                name: "company_research".to_string(),
                schema: json!({
                    "type": "object",
                    "required": ["sections"],
                    "properties": {
                        "company": {"type": "string"},
                        "sections": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["title", "content"],
                                "properties": {
                                    "title": {"type": "string"},
                                    "content": {"type": "string"}
                                }
                            }
                        }
                    }
                }),
                required: vec!["sections".to_string()],
                array: None,
                references: None,
            },
            RecordKind::StoryMatching => OutputShape {
                name: "story_matches".to_string(),
                schema: json!({
                    "type": "object",
                    "required": ["matches"],
                    "properties": {
                        "matches": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["story_index", "reason"],
                                "properties": {
                                    "story_index": {"type": "integer"},
                                    "relevance": {"type": "integer", "minimum": 0, "maximum": 100},
                                    "reason": {"type": "string"}
                                }
                            }
                        }
                    }
                }),
                required: vec!["matches".to_string()],
                array: None,
                references: Some(ReferenceBinding::new("story_index", "story_id")),
            },
            RecordKind::CoverLetter => OutputShape {
                name: "cover_letter".to_string(),
                schema: json!({
                    "type": "object",
                    "required": ["body"],
                    "properties": {
                        "greeting": {"type": "string"},
                        "body": {"type": "string"},
                        "closing": {"type": "string"}
                    }
                }),
                required: vec!["body".to_string()],
                array: None,
                references: None,
            },
        };
        match self.array_field() {
            Some(name) => shape.with_array(name),
            None => shape,
        }
    }

    /// The record array that may be salvaged from a truncated payload.
    fn array_field(&self) -> Option<&'static str> {
        match self {
            RecordKind::Analysis => Some("questions"),
            RecordKind::Research => Some("sections"),
            RecordKind::StoryMatching => Some("matches"),
            RecordKind::Answer | RecordKind::CoverLetter => None,
        }
    }
}

/// Named expiration buckets for cache writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Classification,
    StoryMatching,
    Analysis,
    Answer,
    Research,
}

/// Where backend-provided reference indices live in a record and where the
/// resolved stable IDs go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBinding {
    pub index_key: String,
    pub id_key: String,
}

impl ReferenceBinding {
    pub fn new(index_key: &str, id_key: &str) -> Self {
        Self {
            index_key: index_key.to_string(),
            id_key: id_key.to_string(),
        }
    }
}

/// The output-shape constraint sent to the backend and enforced on the way back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputShape {
    pub name: String,
    pub schema: Value,
    /// Top-level fields every accepted record must carry.
    pub required: Vec<String>,
    /// The array that may be salvaged from a truncated payload.
    pub array: Option<ArrayField>,
    /// Applied to each array element when `array` is set, else to the record.
    pub references: Option<ReferenceBinding>,
}

impl OutputShape {
    /// Declares `name` as the salvageable array. Its element requirements
    /// are read from the schema's `items.required` for that property.
    pub fn with_array(mut self, name: &str) -> Self {
        let required_keys: Vec<&str> = self
            .schema
            .pointer(&format!("/properties/{name}/items/required"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        self.array = Some(ArrayField::new(name, &required_keys));
        self
    }

    /// Rejects the record unless every required field is present and non-null
    /// and the declared array (if any) is an array.
    pub fn validate(&self, data: &Value) -> Result<(), GenerationError> {
        let Value::Object(fields) = data else {
            return Err(GenerationError::NotAnObject);
        };
        for field in &self.required {
            if fields.get(field).map_or(true, Value::is_null) {
                return Err(GenerationError::MissingField(field.clone()));
            }
        }
        if let Some(array) = &self.array {
            if let Some(value) = fields.get(&array.name) {
                if !value.is_array() {
                    return Err(GenerationError::MissingField(array.name.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.as_str().to_string()));
        }
        assert_eq!(RecordKind::parse("classification"), None);
    }

    #[test]
    fn test_validate_requires_fields() {
        let shape = RecordKind::Answer.default_shape();
        assert!(shape.validate(&json!({"answer": "Because..."})).is_ok());
        assert!(matches!(
            shape.validate(&json!({"key_points": []})),
            Err(GenerationError::MissingField(f)) if f == "answer"
        ));
        assert!(matches!(
            shape.validate(&json!({"answer": null})),
            Err(GenerationError::MissingField(_))
        ));
        assert!(matches!(
            shape.validate(&json!(["answer"])),
            Err(GenerationError::NotAnObject)
        ));
    }

    #[test]
    fn test_validate_checks_array_type() {
        let shape = RecordKind::Analysis.default_shape();
        assert!(shape.validate(&json!({"questions": []})).is_ok());
        assert!(shape.validate(&json!({"questions": "none"})).is_err());
    }

    #[test]
    fn test_array_shapes_declare_salvageable_fields() {
        for kind in [RecordKind::Analysis, RecordKind::Research, RecordKind::StoryMatching] {
            let shape = kind.default_shape();
            let array = shape.array.expect("array shape");
            assert!(shape.required.contains(&array.name));
            assert!(!array.required_keys.is_empty());
        }
    }

    #[test]
    fn test_array_element_keys_follow_item_schema() {
        for kind in RecordKind::ALL {
            let shape = kind.default_shape();
            let Some(array) = shape.array else { continue };
            let declared: Vec<String> = shape.schema["properties"][&array.name]["items"]["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|k| k.as_str().unwrap().to_string())
                .collect();
            assert_eq!(array.required_keys, declared, "{}", kind.as_str());
        }

        let research = RecordKind::Research.default_shape().array.unwrap();
        assert_eq!(research.required_keys, vec!["title", "content"]);
        let matches = RecordKind::StoryMatching.default_shape().array.unwrap();
        assert_eq!(matches.required_keys, vec!["story_index", "reason"]);
    }
}
