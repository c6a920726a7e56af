//! Schema-aware prompt construction.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::producer::ProducerRequest;
use crate::schema::{FieldKind, LanguageRole};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

const SYSTEM_PROMPT: &str = "You are an expert language learning content creator. \
Generate educational exercises for language learners. \
Reply with a single JSON object and nothing else.";

/// System and user messages for one generation attempt.
pub fn build_messages(request: &ProducerRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: MessageRole::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: MessageRole::User,
            content: build_user_prompt(request),
        },
    ]
}

fn build_user_prompt(request: &ProducerRequest) -> String {
    let combination = &request.spec.combination;
    let pair = &combination.language_pair;
    let schema = &request.schema;
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "Generate 1 exercise for the following specification:");
    let _ = writeln!(out, "- Source language: {} ({})", pair.source_name, pair.source_lang);
    let _ = writeln!(out, "- Target language: {} ({})", pair.target_name, pair.target_lang);
    let _ = writeln!(
        out,
        "- Level: {} {} (CEFR)",
        combination.level.code, combination.level.name
    );
    let _ = writeln!(out, "- Exercise type: {}", combination.exercise_type.name);
    let _ = writeln!(
        out,
        "- Topic: {} ({})",
        combination.topic.name, combination.topic.description
    );
    let _ = writeln!(out, "- Content category: {}", combination.category.name);
    let _ = writeln!(out);
    if !schema.validation_rules.is_empty() {
        let _ = writeln!(out, "Validation rules: {}", schema.validation_rules);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Fields (JSON keys):");
    for field in &schema.fields {
        let kind = match field.kind {
            FieldKind::Text => "string",
            FieldKind::Integer => "integer",
            FieldKind::TextList => "array of strings",
        };
        let language = match field.language {
            LanguageRole::Any => String::new(),
            LanguageRole::Source => format!(", written in {}", pair.source_name),
            LanguageRole::Target => format!(", written in {}", pair.target_name),
        };
        let required = if field.required { "required" } else { "optional" };
        let _ = writeln!(
            out,
            "- \"{}\" ({}, {}, {}-{} characters{}): {}",
            field.name,
            kind,
            required,
            field.min_length,
            field.max_length,
            language,
            field.description
        );
        if let Some(format) = &field.format_description {
            let _ = writeln!(out, "  Format: {}", format);
        }
    }

    let examples: Vec<_> = schema
        .fields
        .iter()
        .filter_map(|f| f.example.as_ref().map(|e| (f.name.as_str(), e.as_str())))
        .collect();
    if !examples.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Example for reference:");
        for (name, example) in examples {
            let _ = writeln!(out, "- {}: {}", name, example);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Content must suit {} learners and be culturally relevant for {} speakers.",
        combination.level.code, pair.source_name
    );
    let _ = writeln!(out, "VARIATION SEED: {}", request.variation_seed);
    let _ = write!(
        out,
        "Generate a completely different exercise than previous variations."
    );
    out
}
