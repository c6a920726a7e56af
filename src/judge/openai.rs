//! Judge backed by the OpenAI-compatible chat endpoint the producer uses.

use std::fmt::Write;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{JudgeConfig, ProducerConfig};
use crate::error::ProducerError;
use crate::judge::{ContentJudge, JudgeRequest, Judgement};
use crate::producer::openai::{ChatClient, ChatCompletionRequest, OpenAIMessage, ResponseFormat};
use crate::producer::{ChatMessage, MessageRole};

const SYSTEM_PROMPT: &str = "You are an expert language education evaluator. \
Judge exercises for correctness and quality. \
Reply with a single JSON object and nothing else.";

pub struct OpenAiJudge {
    chat: ChatClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiJudge {
    pub fn new(
        producer: &ProducerConfig,
        judge: &JudgeConfig,
        request_timeout: Duration,
    ) -> Result<Self, ProducerError> {
        Ok(Self {
            chat: ChatClient::new(producer, request_timeout)?,
            model: judge.model(producer).to_string(),
            temperature: judge.temperature,
            max_tokens: judge.max_tokens,
        })
    }
}

#[async_trait]
impl ContentJudge for OpenAiJudge {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Judgement, ProducerError> {
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_judge_messages(request)
                .into_iter()
                .map(OpenAIMessage::from)
                .collect(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            seed: None,
            response_format: ResponseFormat::json_object(),
            stream: false,
        };

        let started = Instant::now();
        let reply = self.chat.complete(&body).await?;
        debug!(
            spec_key = %request.spec.key(),
            model = %reply.model,
            total_tokens = reply.total_tokens,
            duration_ms = started.elapsed().as_millis() as u64,
            "Judge response received"
        );
        Judgement::from_reply(&reply.content)
    }

    fn name(&self) -> &str {
        "openai-judge"
    }
}

pub fn build_judge_messages(request: &JudgeRequest<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: MessageRole::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: MessageRole::User,
            content: build_judge_prompt(request),
        },
    ]
}

fn build_judge_prompt(request: &JudgeRequest<'_>) -> String {
    let combination = &request.spec.combination;
    let pair = &combination.language_pair;
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "Evaluate the following exercise.");
    let _ = writeln!(out);
    let _ = writeln!(out, "Specification:");
    let _ = writeln!(
        out,
        "- Language pair: {} speakers learning {}",
        pair.source_name, pair.target_name
    );
    let _ = writeln!(out, "- Level: {} {}", combination.level.code, combination.level.name);
    let _ = writeln!(out, "- Category: {}", combination.category.name);
    let _ = writeln!(out, "- Exercise type: {}", combination.exercise_type.name);
    let _ = writeln!(out, "- Topic: {}", combination.topic.name);
    let _ = writeln!(out, "- Variation: {}", request.spec.variation);
    let _ = writeln!(out);

    let _ = writeln!(out, "Exercise content:");
    for field in &request.schema.fields {
        let value = match request.candidate.get(&field.name) {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => "MISSING".to_string(),
        };
        let _ = writeln!(out, "- {}: {}", field.name, value);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Field requirements:");
    for field in &request.schema.fields {
        let _ = writeln!(out, "- {}: {}", field.name, field.description);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Criteria:");
    let _ = writeln!(
        out,
        "- Content (40%): language accuracy, fit for {} learners, topic and category relevance",
        combination.level.code
    );
    let _ = writeln!(out, "- Schema (30%): every field present, meaningful and in the expected format");
    let _ = writeln!(out, "- Quality (30%): clarity, engagement, completeness");
    let _ = writeln!(out);
    let _ = writeln!(out, "Reply with this JSON object, scores in [0, 1]:");
    let _ = writeln!(
        out,
        "{{\"overall_score\": 0.0, \"content_score\": 0.0, \"schema_score\": 0.0, \
         \"quality_score\": 0.0, \"result\": \"excellent|good|acceptable|needs_improvement|rejected\", \
         \"feedback\": \"...\", \"suggestions\": [\"...\"]}}"
    );
    let _ = write!(
        out,
        "Bands: 0.8+ excellent, 0.6+ good, 0.4+ acceptable, 0.2+ needs improvement, below 0.2 rejected."
    );
    out
}
