//! Configuration System
//!
//! Layered configuration for the generation pipeline: built-in defaults, the
//! user-level config file, workspace config files and `COURSEGEN__*` environment
//! overrides. Validation collects every problem instead of stopping at the first.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoursegenConfig {
    /// Workspace root path (defaults to current directory)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub system: SystemConfig,

    /// Dimension catalog source; built-in catalog when unset
    #[serde(default)]
    pub catalog: SourceConfig,

    /// Schema registry source; built-in schemas when unset
    #[serde(default)]
    pub schemas: SourceConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub producer: ProducerConfig,

    /// Optional LLM judge run after the heuristic validator accepts a candidate
    #[serde(default)]
    pub judge: JudgeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// System-wide configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database directory, relative paths resolve against the workspace root
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".coursegen/store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Batch, retry and timeout knobs for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_variations")]
    pub variations_per_combo: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consecutive identical schema violations before rejection; defaults to `max_attempts`
    #[serde(default)]
    pub repeat_limit: Option<u32>,
    #[serde(default = "default_producer_timeout_ms")]
    pub producer_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_store_write_retries")]
    pub store_write_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_variations() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_producer_timeout_ms() -> u64 {
    60_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_store_write_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_lease_ms() -> u64 {
    120_000
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            variations_per_combo: default_variations(),
            max_attempts: default_max_attempts(),
            repeat_limit: None,
            producer_timeout_ms: default_producer_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            store_write_retries: default_store_write_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            lease_ms: default_lease_ms(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl PipelineConfig {
    pub fn effective_repeat_limit(&self) -> u32 {
        self.repeat_limit.unwrap_or(self.max_attempts).max(1)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Worst-case time a worker can hold a spec between heartbeats.
    pub fn worst_case_attempt_ms(&self) -> u64 {
        self.producer_timeout_ms
            + (self.store_write_retries as u64 + 1) * (self.store_timeout_ms + self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.batch_size == 0 {
            errors.push("batch_size must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            errors.push("concurrency must be at least 1".to_string());
        }
        if self.variations_per_combo == 0 {
            errors.push("variations_per_combo must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            errors.push("max_attempts must be at least 1".to_string());
        }
        if self.repeat_limit == Some(0) {
            errors.push("repeat_limit must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            errors.push(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.lease_ms <= self.worst_case_attempt_ms() {
            errors.push(format!(
                "lease_ms ({}) must exceed the worst-case attempt time ({} ms)",
                self.lease_ms,
                self.worst_case_attempt_ms()
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Inline key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ProducerConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(format!("Invalid endpoint URL: {}", self.endpoint));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "Temperature must be within [0, 2], got {}",
                self.temperature
            ));
        }
        Ok(())
    }
}

/// LLM judge settings. The judge talks to the producer endpoint with the producer's key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Minimum overall score in [0, 1]; lower scores make the attempt retryable
    #[serde(default = "default_judge_threshold")]
    pub threshold: f64,
    /// Model override; the producer model when unset
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,
}

fn default_judge_threshold() -> f64 {
    0.4
}

fn default_judge_max_tokens() -> u32 {
    800
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_judge_threshold(),
            model: None,
            temperature: 0.0,
            max_tokens: default_judge_max_tokens(),
        }
    }
}

impl JudgeConfig {
    pub fn model<'a>(&'a self, producer: &'a ProducerConfig) -> &'a str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&producer.model)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "Threshold must be within [0, 1], got {}",
                self.threshold
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "Temperature must be within [0, 2], got {}",
                self.temperature
            ));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Pipeline(String),
    Producer(String),
    Judge(String),
    System(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Producer(msg) => write!(f, "Producer: {}", msg),
            ValidationError::Judge(msg) => write!(f, "Judge: {}", msg),
            ValidationError::System(msg) => write!(f, "System: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CoursegenConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(msgs) = self.pipeline.validate() {
            errors.extend(msgs.into_iter().map(ValidationError::Pipeline));
        }
        if let Err(msg) = self.producer.validate() {
            errors.push(ValidationError::Producer(msg));
        }
        if let Err(msg) = self.judge.validate() {
            errors.push(ValidationError::Judge(msg));
        }
        if self.system.storage.store_path.as_os_str().is_empty() {
            errors.push(ValidationError::System(
                "Store path cannot be empty".to_string(),
            ));
        }
        if self.logging.format != "text" && self.logging.format != "json" {
            errors.push(ValidationError::Logging(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Store path resolved against the workspace root
    pub fn store_path(&self) -> PathBuf {
        resolve(&self.workspace_root(), &self.system.storage.store_path)
    }

    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog
            .path
            .as_ref()
            .map(|p| resolve(&self.workspace_root(), p))
    }

    pub fn schemas_path(&self) -> Option<PathBuf> {
        self.schemas
            .path
            .as_ref()
            .map(|p| resolve(&self.workspace_root(), p))
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
