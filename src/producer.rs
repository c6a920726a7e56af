//! Content producer capability
//!
//! A producer turns a [`ProducerRequest`] (spec, schema, variation seed) into a
//! [`CandidateContent`] field map. The pipeline only depends on the trait; the
//! bundled implementation talks to an OpenAI-compatible chat endpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProducerError;
use crate::resolver::GenerationSpec;
use crate::schema::ContentSchema;

pub mod openai;
pub mod prompt;

pub use openai::OpenAiProducer;
pub use prompt::{build_messages, ChatMessage, MessageRole};

/// Seed stride between attempts, so retries ask for different content.
pub const SEED_STRIDE: u64 = 1000;

/// Deterministic seed for one attempt; `prior_attempts` is the number already consumed.
pub fn variation_seed(variation: u32, prior_attempts: u32) -> u64 {
    variation as u64 + prior_attempts as u64 * SEED_STRIDE
}

#[derive(Debug, Clone)]
pub struct ProducerRequest {
    pub spec: GenerationSpec,
    pub schema: ContentSchema,
    pub variation_seed: u64,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Raw producer output for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateContent {
    pub fields: BTreeMap<String, Value>,
}

impl CandidateContent {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Parse a model reply into a field map. Accepts bare JSON or JSON wrapped
    /// in prose or a fenced code block; the outermost object is used.
    pub fn from_reply(reply: &str) -> Result<Self, ProducerError> {
        Ok(Self {
            fields: outermost_object(reply)?.into_iter().collect(),
        })
    }
}

/// The outermost JSON object in a model reply.
pub(crate) fn outermost_object(reply: &str) -> Result<serde_json::Map<String, Value>, ProducerError> {
    let start = reply
        .find('{')
        .ok_or_else(|| ProducerError::Malformed("reply contains no JSON object".to_string()))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ProducerError::Malformed("unterminated JSON object".to_string()))?;
    let value: Value = serde_json::from_str(&reply[start..=end])
        .map_err(|e| ProducerError::Malformed(format!("invalid JSON: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ProducerError::Malformed("reply is not a JSON object".to_string())),
    }
}

#[async_trait]
pub trait ContentProducer: Send + Sync {
    async fn produce(&self, request: &ProducerRequest) -> Result<CandidateContent, ProducerError>;

    /// Short name for logs
    fn name(&self) -> &str;
}
