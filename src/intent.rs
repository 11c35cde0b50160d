//! Rule + keyword intent classifier.
//!
//! No direct teacher analog exists for query routing, so this module
//! follows the deterministic-fixture testing style of
//! `wg-ragsmith/tests/integration_mock_embeddings.rs` rather than borrowed
//! logic.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    SpecLookup,
    SemanticSearch,
    Comparison,
    Faq,
    StructuredBatch,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Natural,
    Structured,
    Hybrid,
}

/// Inputs the classifier needs beyond raw config.
pub struct ClassifyInput<'a> {
    pub question: Option<&'a str>,
    pub requested_specs: &'a [String],
    pub request_mode: RequestMode,
    pub intent_hint: Option<Intent>,
    pub hint_confidence: Option<f64>,
}

static COMPARATIVE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(vs\.?|versus|compare|compared to|better than|worse than)\b").unwrap());
static QUESTION_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(what|which|how much|how many|how long|does)\b").unwrap());
static SPEC_NOUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(economy|mileage|mpg|torque|power|horsepower|clearance|weight|capacity|volume|dimension|speed|range)\b").unwrap()
});
static FAQ_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(warranty|return policy|faq|support|contact)\b").unwrap());

/// Classifies a query into `(intent, confidence)` per §4.4's rule ordering:
/// structured request → comparison keywords → spec-lookup question shape →
/// semantic fallback. A sufficiently confident hint overrides the rule
/// output.
#[must_use]
pub fn classify(input: &ClassifyInput<'_>, cfg: &Config) -> (Intent, f64) {
    if input.request_mode == RequestMode::Structured || !input.requested_specs.is_empty() {
        return (Intent::StructuredBatch, 1.0);
    }

    let question = input.question.unwrap_or("");

    let rule_result = if COMPARATIVE_MARKERS.is_match(question) {
        (Intent::Comparison, cfg.keyword_confidence_threshold)
    } else if FAQ_MARKERS.is_match(question) {
        (Intent::Faq, cfg.keyword_confidence_threshold)
    } else if QUESTION_WORDS.is_match(question) && SPEC_NOUNS.is_match(question) {
        (Intent::SpecLookup, cfg.keyword_confidence_threshold)
    } else if question.trim().is_empty() {
        (Intent::Unknown, 0.0)
    } else {
        (Intent::SemanticSearch, cfg.intent_confidence_threshold)
    };

    if let (Some(hint), Some(hint_conf)) = (input.intent_hint, input.hint_confidence) {
        if hint_conf >= cfg.intent_confidence_threshold {
            return (hint, hint_conf);
        }
    }

    rule_result
}
