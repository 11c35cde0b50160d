//! Markdown → structured-record parser and row chunker.
//!
//! Turns the external extractor's markdown output into `SpecValue`,
//! `FeatureBlock`/`USP`, and row-level `KnowledgeChunk` candidates. Mirrors
//! the pure-conversion-function shape of `outcome_to_batch` in the teacher's
//! ingestion module: malformed input degrades to a warning on the result
//! rather than aborting the whole document.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ChunkMetadata;

/// Optional document-level frontmatter the extractor attaches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frontmatter {
    pub model_year: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub domain: Option<String>,
    pub country_code: Option<String>,
    pub condition: Option<String>,
}

/// A parsed spec-row candidate before it is resolved against a `SpecItem`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSpecRow {
    pub category: String,
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub canonical_text: String,
    pub content_hash: String,
}

/// A bullet extracted from a heading-delimited feature/USP section.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBullet {
    pub section: String,
    pub is_usp: bool,
    pub body: String,
}

/// Non-fatal issue encountered while parsing one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

/// Output of parsing a single markdown document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub frontmatter: Frontmatter,
    pub spec_rows: Vec<ParsedSpecRow>,
    pub bullets: Vec<ParsedBullet>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedDocument {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spec_rows.is_empty() && self.bullets.is_empty()
    }
}

static FOOTNOTE_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#*†‡§¶]").unwrap());
static MATH_DELIMITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$+").unwrap());
static INTERNAL_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TABLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|?[\s:|-]+\|?\s*$").unwrap());
static USP_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*#{1,6}\s*(unique selling point|usp)s?\s*$").unwrap());
static FEATURE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*#{1,6}\s*features?\s*$").unwrap());
static BULLET_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*+]\s+(.*\S)\s*$").unwrap());

/// Strips footnote markers and math-mode delimiters from a raw value.
#[must_use]
pub fn sanitize_value(raw: &str) -> String {
    let no_math = MATH_DELIMITERS.replace_all(raw, "");
    let no_footnotes = FOOTNOTE_MARKERS.replace_all(&no_math, "");
    no_footnotes.trim().to_string()
}

/// Collapses internal whitespace runs to a single space and trims the ends.
#[must_use]
pub fn collapse_whitespace(raw: &str) -> String {
    INTERNAL_WHITESPACE.replace_all(raw.trim(), " ").to_string()
}

fn canonical_text(category: &str, name: &str, value: &str, unit: Option<&str>) -> String {
    let mut text = format!("Category: {category} | Name: {name} | Value: {value}");
    if let Some(u) = unit {
        text.push_str(&format!(" | Unit: {u}"));
    }
    collapse_whitespace(&text)
}

fn split_table_row(line: &str) -> Vec<String> {
    let trimmed = line.trim().trim_start_matches('|').trim_end_matches('|');
    trimmed
        .split('|')
        .map(|cell| collapse_whitespace(cell))
        .collect()
}

/// Parses one markdown document into its structured constituents. Never
/// fails outright: malformed rows are dropped with a warning.
#[must_use]
pub fn parse_document(markdown: &str, frontmatter: Frontmatter) -> ParsedDocument {
    let mut doc = ParsedDocument {
        frontmatter,
        ..Default::default()
    };

    let lines: Vec<&str> = markdown.lines().collect();
    let mut current_section: Option<(String, bool)> = None;
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let line_no = i + 1;

        if USP_HEADING.is_match(line) {
            current_section = Some((line.trim().to_string(), true));
            i += 1;
            continue;
        }
        if FEATURE_HEADING.is_match(line) {
            current_section = Some((line.trim().to_string(), false));
            i += 1;
            continue;
        }
        if line.trim_start().starts_with('#') {
            current_section = None;
            i += 1;
            continue;
        }

        if let Some(caps) = BULLET_LINE.captures(line) {
            if let Some((section, is_usp)) = &current_section {
                doc.bullets.push(ParsedBullet {
                    section: section.clone(),
                    is_usp: *is_usp,
                    body: sanitize_value(&caps[1]),
                });
            }
            i += 1;
            continue;
        }

        if line.trim_start().starts_with('|') {
            // Candidate table: gather the contiguous block of `|`-led lines.
            let start = i;
            let mut end = i;
            while end < lines.len() && lines[end].trim_start().starts_with('|') {
                end += 1;
            }
            let block = &lines[start..end];
            parse_table_block(block, start, &mut doc);
            i = end;
            continue;
        }

        let _ = line_no;
        i += 1;
    }

    doc
}

fn parse_table_block(block: &[&str], block_start: usize, doc: &mut ParsedDocument) {
    if block.is_empty() {
        return;
    }

    // The second line, if a separator row (`---|---|---`), marks the first
    // line as a header; otherwise every row is data (first-row heuristic).
    let has_header_separator = block.len() > 1 && TABLE_SEPARATOR.is_match(block[1]);
    let data_start = if has_header_separator { 2 } else { 0 };

    for (offset, raw_row) in block.iter().enumerate().skip(data_start) {
        let line_no = block_start + offset + 1;
        if TABLE_SEPARATOR.is_match(raw_row) {
            continue;
        }

        let cells = split_table_row(raw_row);
        match cells.len() {
            3 => record_row(doc, line_no, &cells[0], &cells[1], &cells[2], None),
            4 => record_row(doc, line_no, &cells[0], &cells[1], &cells[2], Some(&cells[3])),
            5 => {
                // 5-column shape: Category | Name | Value | Unit | Note — the
                // trailing note column is informational only and dropped.
                record_row(doc, line_no, &cells[0], &cells[1], &cells[2], Some(&cells[3]));
            }
            0 | 1 | 2 => doc.warnings.push(ParseWarning {
                line: line_no,
                message: format!("table row has too few columns ({})", cells.len()),
            }),
            n => doc.warnings.push(ParseWarning {
                line: line_no,
                message: format!("unsupported table shape with {n} columns"),
            }),
        }
    }
}

fn record_row(
    doc: &mut ParsedDocument,
    line: usize,
    category: &str,
    name: &str,
    value: &str,
    unit: Option<&str>,
) {
    let category = collapse_whitespace(category);
    let name = collapse_whitespace(name);
    let value = sanitize_value(value);
    let unit = unit.map(|u| collapse_whitespace(u)).filter(|u| !u.is_empty());

    if category.is_empty() || name.is_empty() || value.is_empty() {
        doc.warnings.push(ParseWarning {
            line,
            message: "table row missing category, name, or value".to_string(),
        });
        return;
    }

    let canonical_text = canonical_text(&category, &name, &value, unit.as_deref());
    let content_hash = crate::domain::KnowledgeChunk::hash_text(&canonical_text);

    doc.spec_rows.push(ParsedSpecRow {
        category,
        name,
        value,
        unit,
        canonical_text,
        content_hash,
    });
}

/// Builds the `ChunkMetadata` for a row chunk using the row's own fields.
#[must_use]
pub fn row_metadata(row: &ParsedSpecRow, source_page: Option<u32>) -> ChunkMetadata {
    ChunkMetadata {
        category: Some(row.category.clone()),
        name: Some(row.name.clone()),
        unit: row.unit.clone(),
        source_page,
        parsed_spec_ids: Vec::new(),
        tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_3_4_and_5_column_tables() {
        let md = "\
| Category | Name | Value |\n\
| --- | --- | --- |\n\
| Fuel | Fuel Economy | 25.49 |\n\
\n\
| Category | Name | Value | Unit |\n\
| --- | --- | --- | --- |\n\
| Engine | Power | 90 | PS |\n\
\n\
| Category | Name | Value | Unit | Note |\n\
| --- | --- | --- | --- | --- |\n\
| Engine | Torque | 113 | Nm | at 4000rpm |\n";

        let doc = parse_document(md, Frontmatter::default());
        assert_eq!(doc.spec_rows.len(), 3);
        assert_eq!(doc.spec_rows[0].name, "Fuel Economy");
        assert_eq!(doc.spec_rows[1].unit.as_deref(), Some("PS"));
        assert_eq!(doc.spec_rows[2].name, "Torque");
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn malformed_row_is_warned_not_fatal() {
        let md = "\
| Category | Name | Value |\n\
| --- | --- | --- |\n\
| Fuel | Fuel Economy |\n\
| Engine | Power | 90 |\n";
        let doc = parse_document(md, Frontmatter::default());
        assert_eq!(doc.spec_rows.len(), 1);
        assert_eq!(doc.warnings.len(), 1);
    }

    #[test]
    fn footnote_and_math_markers_are_stripped() {
        let cleaned = sanitize_value("25.49#* $\\dagger$");
        assert!(!cleaned.contains('#'));
        assert!(!cleaned.contains('*'));
        assert!(!cleaned.contains('$'));
    }

    #[test]
    fn content_hash_is_stable_across_whitespace_variation() {
        let md_a = "| Category | Name | Value |\n| --- | --- | --- |\n| Engine | Power | 90 |\n";
        let md_b = "|  Category | Name  |  Value  |\n|---|---|---|\n|  Engine | Power |  90  |\n";
        let a = parse_document(md_a, Frontmatter::default());
        let b = parse_document(md_b, Frontmatter::default());
        assert_eq!(a.spec_rows[0].content_hash, b.spec_rows[0].content_hash);
    }

    #[test]
    fn feature_and_usp_sections_are_split() {
        let md = "\
# Features\n\
- Sunroof\n\
- Cruise control\n\
\n\
# USPs\n\
- Industry-leading warranty\n";
        let doc = parse_document(md, Frontmatter::default());
        let features: Vec<_> = doc.bullets.iter().filter(|b| !b.is_usp).collect();
        let usps: Vec<_> = doc.bullets.iter().filter(|b| b.is_usp).collect();
        assert_eq!(features.len(), 2);
        assert_eq!(usps.len(), 1);
        assert_eq!(usps[0].body, "Industry-leading warranty");
    }
}
