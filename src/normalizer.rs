//! Spec-name normalization via a static synonym table.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Result of normalizing a user-supplied spec name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub canonical: String,
    pub alternatives: Vec<String>,
    /// `true` when the input matched a synonym entry rather than the
    /// canonical name itself exactly.
    pub matched_synonym: bool,
}

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("mileage", "Fuel Economy"),
        ("mpg", "Fuel Economy"),
        ("fuel efficiency", "Fuel Economy"),
        ("torque", "Engine Torque"),
        ("max torque", "Engine Torque"),
        ("hp", "Horsepower"),
        ("bhp", "Horsepower"),
        ("power", "Horsepower"),
        ("ground clearance", "Ground Clearance"),
        ("boot space", "Cargo Volume"),
        ("trunk space", "Cargo Volume"),
        ("kerb weight", "Curb Weight"),
        ("curb weight", "Curb Weight"),
    ])
});

static CANONICALS: Lazy<HashMap<&'static str, ()>> = Lazy::new(|| {
    SYNONYMS.values().map(|v| (*v, ())).collect()
});

fn fold(raw: &str) -> String {
    let no_punct = PUNCTUATION.replace_all(raw, " ");
    WHITESPACE
        .replace_all(no_punct.trim(), " ")
        .to_lowercase()
}

/// Canonicalizes `name`: case/whitespace/punctuation-insensitive lookup
/// against the synonym table. Unknown names pass through unchanged with no
/// alternatives.
#[must_use]
pub fn normalize(name: &str) -> Normalized {
    let folded = fold(name);

    if let Some(canonical) = CANONICALS.keys().find(|c| fold(c) == folded) {
        return Normalized {
            canonical: (*canonical).to_string(),
            alternatives: alternatives_for(canonical),
            matched_synonym: false,
        };
    }

    if let Some(canonical) = SYNONYMS.get(folded.as_str()) {
        return Normalized {
            canonical: (*canonical).to_string(),
            alternatives: alternatives_for(canonical),
            matched_synonym: true,
        };
    }

    Normalized {
        canonical: name.to_string(),
        alternatives: Vec::new(),
        matched_synonym: false,
    }
}

fn alternatives_for(canonical: &str) -> Vec<String> {
    SYNONYMS
        .iter()
        .filter(|(_, v)| **v == canonical)
        .map(|(k, _)| (*k).to_string())
        .collect()
}

/// Token-overlap ratio used by the Structured-Batch Path's fuzzy-match
/// confidence tier (`name_match_score = 0.6` when overlap ≥ 0.5).
#[must_use]
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a: std::collections::HashSet<_> = fold(a).split_whitespace().map(str::to_string).collect();
    let tokens_b: std::collections::HashSet<_> = fold(b).split_whitespace().map(str::to_string).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}
