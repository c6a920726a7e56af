//! Stage 2: content quality heuristics.

use std::collections::HashSet;

use serde_json::Value;

use crate::producer::CandidateContent;
use crate::resolver::GenerationSpec;
use crate::schema::{ContentSchema, FieldDefinition, FieldKind, LanguageRole};
use crate::validator::compliance::field_text;
use crate::validator::language::detect_language;
use crate::validator::{Stage, Violation};

/// Text longer than this must carry at least two distinct words.
const INFORMATIVE_MIN_CHARS: usize = 20;

/// Fraction of `max_length` above which a field draws a soft warning.
const NEAR_LIMIT_RATIO: f64 = 0.9;

/// Returns hard violations and soft warnings.
pub fn check(
    candidate: &CandidateContent,
    schema: &ContentSchema,
    spec: &GenerationSpec,
) -> (Vec<Violation>, Vec<String>) {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();
    let pair = &spec.combination.language_pair;

    for field in &schema.fields {
        let Some(value) = candidate.get(&field.name) else {
            continue;
        };
        for text in texts(field, value) {
            let trimmed = text.trim();
            if let Some(problem) = placeholder(trimmed) {
                violations.push(violation(field, "placeholder", format!("contains {}", problem)));
                continue;
            }
            if trimmed.chars().count() > INFORMATIVE_MIN_CHARS && distinct_words(trimmed) < 2 {
                violations.push(violation(
                    field,
                    "uninformative",
                    "repeats a single word".to_string(),
                ));
                continue;
            }
            if pair.source_lang != pair.target_lang {
                let wrong = match field.language {
                    LanguageRole::Any => None,
                    LanguageRole::Target => Some(pair.source_lang.as_str()),
                    LanguageRole::Source => Some(pair.target_lang.as_str()),
                };
                if let (Some(wrong), Some(detected)) = (wrong, detect_language(trimmed)) {
                    if wrong == detected {
                        violations.push(violation(
                            field,
                            "wrong_language",
                            format!("is written in '{}'", detected),
                        ));
                    }
                }
            }
        }

        if field.kind == FieldKind::Text && field.max_length > 0 {
            if let Some(text) = field_text(field, value) {
                let len = text.trim().chars().count();
                if len as f64 > field.max_length as f64 * NEAR_LIMIT_RATIO {
                    warnings.push(format!(
                        "{} is close to its length limit ({}/{})",
                        field.name, len, field.max_length
                    ));
                }
            }
        }
    }

    (violations, warnings)
}

fn texts(field: &FieldDefinition, value: &Value) -> Vec<String> {
    match field.kind {
        FieldKind::Text => field_text(field, value)
            .map(|t| vec![t.into_owned()])
            .unwrap_or_default(),
        FieldKind::TextList => value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        FieldKind::Integer => Vec::new(),
    }
}

/// Name of the placeholder pattern found, if any.
fn placeholder(text: &str) -> Option<&'static str> {
    if text.is_empty() {
        return Some("no text");
    }
    if !text.chars().any(char::is_alphanumeric) {
        return Some("only punctuation");
    }
    let lowered = text.to_lowercase();
    if lowered.contains("lorem ipsum") {
        return Some("lorem ipsum");
    }
    if lowered.contains("<placeholder") || lowered.contains("[placeholder") {
        return Some("a placeholder marker");
    }
    if text.contains("{{") || has_template_slot(text) {
        return Some("a template slot");
    }
    // Case-sensitive: "todo" is an ordinary Spanish and Portuguese word.
    let tokens: HashSet<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ':' | ';' | '(' | ')'))
        .collect();
    for marker in ["TODO", "TBD", "N/A", "FIXME"] {
        if tokens.contains(marker) {
            return Some("a placeholder marker");
        }
    }
    None
}

/// `{name}` style slots left unfilled by the producer.
fn has_template_slot(text: &str) -> bool {
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return false;
        };
        let inner = &after[..close];
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return true;
        }
        rest = &after[close + 1..];
    }
    false
}

fn distinct_words(text: &str) -> usize {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

fn violation(field: &FieldDefinition, code: &str, detail: String) -> Violation {
    Violation::new(
        Stage::Quality,
        Some(&field.name),
        code,
        format!("{} {}", field.name, detail),
    )
}
