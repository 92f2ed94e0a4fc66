use serde_json::{json, Value};

pub const CLASSIFIER_SYSTEM: &str = "You route messages for a job-search coaching assistant. \
    Decide whether the user's message asks the assistant to DO something, and if so which \
    action fits best. Categories: company_research, interview_prep, story_matching, \
    cover_letter, application_answer. Use null for category when no action is needed or \
    when none of the categories fit. confidence is 0-100. extracted_query is the subject \
    of the request (a company, role, or question) in the user's words.";

/// Shape the model must answer in. Mirrors `ClassificationResult`.
pub fn classification_schema() -> Value {
    json!({
        "type": "object",
        "required": ["needs_action", "category", "confidence", "extracted_query", "reasoning"],
        "properties": {
            "needs_action": {"type": "boolean"},
            "category": {
                "type": ["string", "null"],
                "enum": [
                    "company_research",
                    "interview_prep",
                    "story_matching",
                    "cover_letter",
                    "application_answer",
                    null
                ]
            },
            "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
            "extracted_query": {"type": "string"},
            "reasoning": {"type": "string"}
        }
    })
}

pub fn build_classification_prompt(message: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "CONVERSATION CONTEXT:\n{context}\n\nUSER MESSAGE:\n{message}\n\nClassify the user message."
        ),
        None => format!("USER MESSAGE:\n{message}\n\nClassify the user message."),
    }
}
