//! Stage 1: schema compliance.

use serde_json::Value;

use crate::producer::CandidateContent;
use crate::schema::{ContentSchema, FieldDefinition, FieldKind, FormatHint};
use crate::validator::{Stage, Violation};

const MAX_PHRASE_WORDS: usize = 8;

/// Every violation of required presence, kind, length and format. Extra fields are ignored.
pub fn check(candidate: &CandidateContent, schema: &ContentSchema) -> Vec<Violation> {
    let mut violations = Vec::new();
    for field in &schema.fields {
        match candidate.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    violations.push(violation(field, "missing", "is missing".to_string()));
                }
            }
            Some(value) => check_field(field, value, &mut violations),
        }
    }
    violations
}

/// Stable identity of a set of violations: sorted `field:code` pairs.
pub fn signature(violations: &[Violation]) -> String {
    let mut parts: Vec<String> = violations
        .iter()
        .map(|v| format!("{}:{}", v.field.as_deref().unwrap_or("*"), v.code))
        .collect();
    parts.sort();
    parts.dedup();
    parts.join(",")
}

/// Text view of a field value; option numbers may arrive as JSON integers.
pub fn field_text<'a>(field: &FieldDefinition, value: &'a Value) -> Option<std::borrow::Cow<'a, str>> {
    match value {
        Value::String(s) => Some(std::borrow::Cow::Borrowed(s.as_str())),
        Value::Number(n) if field.format == FormatHint::OptionNumber => {
            Some(std::borrow::Cow::Owned(n.to_string()))
        }
        _ => None,
    }
}

fn check_field(field: &FieldDefinition, value: &Value, out: &mut Vec<Violation>) {
    match field.kind {
        FieldKind::Text => {
            let Some(text) = field_text(field, value) else {
                out.push(violation(field, "wrong_kind", "must be a string".to_string()));
                return;
            };
            let text = text.trim();
            check_length(field, text.chars().count(), "characters", out);
            check_format(field, text, out);
        }
        FieldKind::Integer => {
            let number = value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()));
            match number {
                Some(n) => {
                    if n < field.min_length as i64 || n > field.max_length as i64 {
                        out.push(violation(
                            field,
                            "out_of_range",
                            format!(
                                "value {} outside {}..={}",
                                n, field.min_length, field.max_length
                            ),
                        ));
                    }
                }
                None => out.push(violation(field, "wrong_kind", "must be an integer".to_string())),
            }
        }
        FieldKind::TextList => {
            let Some(items) = value.as_array() else {
                out.push(violation(field, "wrong_kind", "must be a list of strings".to_string()));
                return;
            };
            let all_text = items
                .iter()
                .all(|item| item.as_str().map_or(false, |s| !s.trim().is_empty()));
            if !all_text {
                out.push(violation(
                    field,
                    "wrong_kind",
                    "list items must be non-empty strings".to_string(),
                ));
                return;
            }
            check_length(field, items.len(), "items", out);
        }
    }
}

fn check_length(field: &FieldDefinition, len: usize, unit: &str, out: &mut Vec<Violation>) {
    if len < field.min_length {
        out.push(violation(
            field,
            "too_short",
            format!("has {} {}, minimum {}", len, unit, field.min_length),
        ));
    } else if len > field.max_length {
        out.push(violation(
            field,
            "too_long",
            format!("has {} {}, maximum {}", len, unit, field.max_length),
        ));
    }
}

fn check_format(field: &FieldDefinition, text: &str, out: &mut Vec<Violation>) {
    let problem = match field.format {
        FormatHint::Free => None,
        FormatHint::BlankMarker => (!text.contains("___")).then_some("must contain a ___ blank"),
        FormatHint::NumberedOptions => (!(text.contains("[1]") && text.contains("[2]")))
            .then_some("must list numbered options [1] and [2]"),
        FormatHint::OptionNumber => {
            if text.is_empty() {
                Some("must be an option number or phrase")
            } else if text.chars().all(|c| c.is_ascii_digit()) {
                let valid = text.parse::<u32>().map_or(false, |n| (1..=9).contains(&n));
                (!valid).then_some("option number must be between 1 and 9")
            } else {
                None
            }
        }
        FormatHint::SinglePhrase => {
            if text.contains('\n') {
                Some("must be a single line")
            } else if text.split_whitespace().count() > MAX_PHRASE_WORDS {
                Some("must be a short phrase")
            } else {
                None
            }
        }
    };
    if let Some(problem) = problem {
        out.push(violation(field, "format", problem.to_string()));
    }
}

fn violation(field: &FieldDefinition, code: &str, detail: String) -> Violation {
    Violation::new(
        Stage::Schema,
        Some(&field.name),
        code,
        format!("{} {}", field.name, detail),
    )
}
