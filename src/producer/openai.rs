//! OpenAI-compatible chat completions producer.
//!
//! [`ChatClient`] is the HTTP transport; the judge reuses it with its own prompt.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ProducerConfig;
use crate::error::ProducerError;
use crate::producer::prompt::{build_messages, ChatMessage};
use crate::producer::{CandidateContent, ContentProducer, ProducerRequest};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub response_format: ResponseFormat,
    pub stream: bool,
}

#[derive(Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object",
        }
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct OpenAIMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for OpenAIMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// First choice of a completion, with the metadata worth logging.
pub(crate) struct ChatReply {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub total_tokens: Option<u32>,
}

fn map_http_error(error: reqwest::Error) -> ProducerError {
    if error.is_timeout() {
        ProducerError::Service(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ProducerError::Service(format!("Connection error: {}", error))
    } else {
        ProducerError::Service(format!("HTTP error: {}", error))
    }
}

fn map_status(status: StatusCode, body: &str) -> ProducerError {
    match status.as_u16() {
        401 | 403 => ProducerError::Service(format!("Authentication failed: {}", body)),
        429 => ProducerError::Service(format!("Rate limit exceeded: {}", body)),
        404 => ProducerError::Service(format!("Model not found: {}", body)),
        _ => ProducerError::Service(format!("Request failed with status {}: {}", status, body)),
    }
}

pub(crate) struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ChatClient {
    /// `request_timeout` caps a single HTTP exchange; the orchestrator applies its own bound too.
    pub fn new(config: &ProducerConfig, request_timeout: Duration) -> Result<Self, ProducerError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProducerError::Service(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key(),
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    pub async fn complete(&self, body: &ChatCompletionRequest) -> Result<ChatReply, ProducerError> {
        let mut http = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            http = http.header("Authorization", format!("Bearer {}", key));
        }
        let response = http.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status, &error_text));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProducerError::Malformed(format!("Failed to parse response: {}", e)))?;
        let total_tokens = completion.usage.as_ref().map(|u| u.total_tokens);
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProducerError::Malformed("No choices in response".to_string()))?;

        Ok(ChatReply {
            content: choice.message.content,
            model: completion.model,
            finish_reason: choice.finish_reason,
            total_tokens,
        })
    }
}

pub struct OpenAiProducer {
    chat: ChatClient,
    config: ProducerConfig,
}

impl OpenAiProducer {
    pub fn new(config: ProducerConfig, request_timeout: Duration) -> Result<Self, ProducerError> {
        let chat = ChatClient::new(&config, request_timeout)?;
        Ok(Self { chat, config })
    }
}

#[async_trait]
impl ContentProducer for OpenAiProducer {
    async fn produce(&self, request: &ProducerRequest) -> Result<CandidateContent, ProducerError> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: build_messages(request)
                .into_iter()
                .map(OpenAIMessage::from)
                .collect(),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            seed: Some(request.variation_seed),
            response_format: ResponseFormat::json_object(),
            stream: false,
        };

        let spec_key = request.spec.key();
        let started = Instant::now();
        info!(
            spec_key = %spec_key,
            attempt = request.attempt,
            model = %self.config.model,
            "Producer request sent"
        );

        let reply = self.chat.complete(&body).await?;

        debug!(
            spec_key = %spec_key,
            model = %reply.model,
            finish_reason = ?reply.finish_reason,
            total_tokens = reply.total_tokens,
            duration_ms = started.elapsed().as_millis() as u64,
            "Producer response received"
        );

        CandidateContent::from_reply(&reply.content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
