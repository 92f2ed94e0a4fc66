//! Deterministic pre-filters. Each one inspects the message and either
//! decides, escalates with a heuristic guess, or passes to the next.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classifier::{ActionCategory, ClassificationResult};

/// Confidence assigned to a pattern-table hit.
pub const PATTERN_CONFIDENCE: u8 = 85;
/// Confidence assigned to the short-message "nothing to do" verdict.
pub const SHORT_MESSAGE_CONFIDENCE: u8 = 95;

/// Ordered category → patterns. The first matching pattern wins, so more
/// specific requests (cover letters) sit above broader ones (research).
/// A named `query` group, when present, becomes `extracted_query`.
static PATTERN_TABLE: Lazy<Vec<(ActionCategory, Vec<Regex>)>> = Lazy::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("pattern table regex is valid"))
            .collect()
    };
    vec![
        (
            ActionCategory::CoverLetter,
            compile(&[
                r"(?i)\b(?:write|draft|generate|create)\b.{0,30}\bcover\s+letter\b(?:\s+(?:for|to)\s+(?P<query>.+))?",
                r"(?i)\bcover\s+letter\s+for\s+(?P<query>.+)",
            ]),
        ),
        (
            ActionCategory::InterviewPrep,
            compile(&[
                r"(?i)\b(?:prep|prepare|practice|get\s+ready)\b.{0,30}\binterview\b(?:\s+(?:at|with|for)\s+(?P<query>.+))?",
                r"(?i)\b(?:likely|possible|common|expected)\s+interview\s+questions\b(?:\s+(?:at|for)\s+(?P<query>.+))?",
                r"(?i)\bmock\s+interview\b",
            ]),
        ),
        (
            ActionCategory::StoryMatching,
            compile(&[
                r"(?i)\bwhich\s+(?:of\s+my\s+)?stor(?:y|ies)\b(?:.{0,40}\b(?:for|about)\s+(?P<query>.+))?",
                r"(?i)\b(?:find|match|pick)\b.{0,20}\bstor(?:y|ies)\b(?:\s+(?:for|about)\s+(?P<query>.+))?",
                r"(?i)\bstar\s+(?:story|example)\b",
            ]),
        ),
        (
            ActionCategory::ApplicationAnswer,
            compile(&[
                r"(?i)\bhelp\s+me\s+answer\s+(?P<query>.+)",
                r"(?i)\b(?:answer|respond\s+to)\b.{0,30}\b(?:application|screening|essay)\s+question\b",
            ]),
        ),
        (
            ActionCategory::CompanyResearch,
            compile(&[
                r"(?i)\bresearch\s+(?:the\s+company\s+)?(?P<query>.+)",
                r"(?i)\bwhat\s+does\s+(?P<query>.+?)\s+do\b",
                r"(?i)\bcompany\s+(?:research|overview|background|culture)\b",
            ]),
        ),
    ]
});

/// Generic "the user wants something" phrases. Not specific enough to pick
/// a category on their own.
static TRIGGER_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:can\s+you|could\s+you|would\s+you|help\s+me|i\s+need|i\s+want\s+to|please|how\s+(?:do|should)\s+i|what\s+should\s+i)\b",
    )
    .expect("trigger phrase regex is valid")
});

/// What a pre-filter concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Final; no backend call.
    Decided(ClassificationResult),
    /// Ask the model. The result is the fallback if the model fails.
    Escalate(ClassificationResult),
    /// No opinion; try the next filter.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreFilter {
    PatternTable,
    TriggerPhrases,
    ShortMessage { max_chars: usize },
}

impl PreFilter {
    pub fn apply(&self, message: &str) -> Verdict {
        match self {
            PreFilter::PatternTable => match match_pattern(message) {
                Some((category, query)) => Verdict::Decided(ClassificationResult {
                    needs_action: true,
                    category: Some(category),
                    confidence: PATTERN_CONFIDENCE,
                    extracted_query: query,
                    reasoning: format!("Matched {} pattern", category.as_str()),
                }),
                None => Verdict::Continue,
            },
            PreFilter::TriggerPhrases => {
                if TRIGGER_PHRASES.is_match(message) {
                    Verdict::Escalate(ClassificationResult {
                        needs_action: true,
                        category: None,
                        confidence: 0,
                        extracted_query: message.trim().to_string(),
                        reasoning: "Request phrasing without a clear category".to_string(),
                    })
                } else {
                    Verdict::Continue
                }
            }
            PreFilter::ShortMessage { max_chars } => {
                if message.trim().chars().count() < *max_chars {
                    Verdict::Decided(ClassificationResult::no_action(
                        SHORT_MESSAGE_CONFIDENCE,
                        "Short message with no actionable request",
                    ))
                } else {
                    Verdict::Continue
                }
            }
        }
    }
}

/// The standard chain, in evaluation order.
pub fn default_chain(short_message_chars: usize) -> Vec<PreFilter> {
    vec![
        PreFilter::PatternTable,
        PreFilter::TriggerPhrases,
        PreFilter::ShortMessage {
            max_chars: short_message_chars,
        },
    ]
}

fn match_pattern(message: &str) -> Option<(ActionCategory, String)> {
    PATTERN_TABLE.iter().find_map(|(category, patterns)| {
        patterns.iter().find_map(|pattern| {
            let captures = pattern.captures(message)?;
            let query = captures
                .name("query")
                .map(|m| m.as_str())
                .unwrap_or(message);
            Some((*category, clean_query(query)))
        })
    })
}

fn clean_query(query: &str) -> String {
    query
        .trim()
        .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!' | ','))
        .trim()
        .to_string()
}
