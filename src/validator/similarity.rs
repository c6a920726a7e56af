//! Stage 3: near-duplicate detection.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

use crate::content::AcceptedContent;
use crate::producer::CandidateContent;

/// Field compared between candidates; falls back to all text fields when absent.
pub const COMPARED_FIELD: &str = "exercise_input";

/// NFKC, lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn shingles(normalized: &str) -> HashSet<String> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.len() < 2 {
        return words.into_iter().map(str::to_string).collect();
    }
    words
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

/// Word-bigram Jaccard similarity of two texts after normalization.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = shingles(&normalize_text(a));
    let b = shingles(&normalize_text(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

fn candidate_text(candidate: &CandidateContent) -> String {
    match candidate.text(COMPARED_FIELD) {
        Some(text) => text.to_string(),
        None => join_text_fields(candidate.fields.values()),
    }
}

fn accepted_text(content: &AcceptedContent) -> String {
    match content.text(COMPARED_FIELD) {
        Some(text) => text.to_string(),
        None => join_text_fields(content.fields.values()),
    }
}

fn join_text_fields<'a>(values: impl Iterator<Item = &'a serde_json::Value>) -> String {
    values
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Most similar accepted record and its score.
pub fn closest<'a>(
    candidate: &CandidateContent,
    accepted: impl Iterator<Item = &'a AcceptedContent>,
) -> Option<(&'a AcceptedContent, f64)> {
    let text = candidate_text(candidate);
    accepted
        .map(|content| (content, jaccard_similarity(&text, &accepted_text(content))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
