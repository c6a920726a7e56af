//! LLM judge stage
//!
//! Runs after the heuristic validator accepts a candidate. A [`ContentJudge`]
//! scores the candidate in [0, 1] for language accuracy, schema fit and
//! overall quality. A passing score replaces the heuristic quality score; a
//! score under the threshold, or a judge that cannot answer, turns the verdict
//! into `retryable` with `quality_violation`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::ProducerError;
use crate::producer::{outermost_object, CandidateContent};
use crate::resolver::GenerationSpec;
use crate::schema::ContentSchema;
use crate::status::FailureReason;
use crate::validator::{Stage, ValidationResult, Verdict, Violation};

pub mod openai;

pub use openai::OpenAiJudge;

const DEFAULT_JUDGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Coarse band of an overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Acceptable,
    NeedsImprovement,
    Rejected,
}

impl Rating {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Rating::Excellent
        } else if score >= 0.6 {
            Rating::Good
        } else if score >= 0.4 {
            Rating::Acceptable
        } else if score >= 0.2 {
            Rating::NeedsImprovement
        } else {
            Rating::Rejected
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "excellent" => Some(Rating::Excellent),
            "good" => Some(Rating::Good),
            "acceptable" => Some(Rating::Acceptable),
            "needs_improvement" => Some(Rating::NeedsImprovement),
            "rejected" => Some(Rating::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Excellent => "excellent",
            Rating::Good => "good",
            Rating::Acceptable => "acceptable",
            Rating::NeedsImprovement => "needs_improvement",
            Rating::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    /// Overall score in [0, 1]
    pub score: f64,
    pub content_score: Option<f64>,
    pub schema_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub rating: Rating,
    pub feedback: String,
    pub suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct JudgeReply {
    overall_score: f64,
    #[serde(default)]
    content_score: Option<f64>,
    #[serde(default)]
    schema_score: Option<f64>,
    #[serde(default)]
    quality_score: Option<f64>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl Judgement {
    /// Judgement with only an overall score; the rating follows the score band.
    pub fn new(score: f64, feedback: impl Into<String>) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            score,
            content_score: None,
            schema_score: None,
            quality_score: None,
            rating: Rating::from_score(score),
            feedback: feedback.into(),
            suggestions: Vec::new(),
        }
    }

    /// Parse a judge reply. `overall_score` is required; an unknown `result`
    /// falls back to the band of the score.
    pub fn from_reply(reply: &str) -> Result<Self, ProducerError> {
        let object = outermost_object(reply)?;
        let parsed: JudgeReply = serde_json::from_value(Value::Object(object))
            .map_err(|e| ProducerError::Malformed(format!("invalid judgement: {}", e)))?;
        if !parsed.overall_score.is_finite() {
            return Err(ProducerError::Malformed(
                "overall_score is not a number".to_string(),
            ));
        }
        let score = parsed.overall_score.clamp(0.0, 1.0);
        let rating = parsed
            .result
            .as_deref()
            .and_then(Rating::parse)
            .unwrap_or_else(|| Rating::from_score(score));
        Ok(Self {
            score,
            content_score: parsed.content_score,
            schema_score: parsed.schema_score,
            quality_score: parsed.quality_score,
            rating,
            feedback: parsed.feedback,
            suggestions: parsed.suggestions,
        })
    }
}

/// Everything a judge sees for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub spec: &'a GenerationSpec,
    pub schema: &'a ContentSchema,
    pub candidate: &'a CandidateContent,
    /// 1-based attempt number
    pub attempt: u32,
}

#[async_trait]
pub trait ContentJudge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Judgement, ProducerError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// A judge plus the threshold and time bound it runs under.
#[derive(Clone)]
pub struct JudgeStage {
    judge: Arc<dyn ContentJudge>,
    threshold: f64,
    timeout: Duration,
}

impl JudgeStage {
    pub fn new(judge: Arc<dyn ContentJudge>, threshold: f64) -> Self {
        Self {
            judge,
            threshold,
            timeout: DEFAULT_JUDGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Review a candidate the heuristic stages accepted. Other verdicts pass through unchanged.
    pub async fn review(
        &self,
        request: &JudgeRequest<'_>,
        result: ValidationResult,
    ) -> ValidationResult {
        if result.verdict != Verdict::Accepted {
            return result;
        }
        let spec_key = request.spec.key();
        let outcome = match timeout(self.timeout, self.judge.judge(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProducerError::Timeout(self.timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(judgement) if judgement.score >= self.threshold => {
                info!(
                    spec_key = %spec_key,
                    attempt = request.attempt,
                    judge = self.judge.name(),
                    score = judgement.score,
                    rating = judgement.rating.as_str(),
                    "Candidate passed judge"
                );
                ValidationResult {
                    quality_score: judgement.score,
                    ..result
                }
            }
            Ok(judgement) => {
                warn!(
                    spec_key = %spec_key,
                    attempt = request.attempt,
                    judge = self.judge.name(),
                    score = judgement.score,
                    threshold = self.threshold,
                    feedback = %judgement.feedback,
                    "Candidate scored below judge threshold"
                );
                let message = format!(
                    "judge score {:.2} is below {:.2}: {}",
                    judgement.score, self.threshold, judgement.feedback
                );
                judged_down(result, judgement.score, "below_threshold", message)
            }
            Err(err) => {
                warn!(
                    spec_key = %spec_key,
                    attempt = request.attempt,
                    judge = self.judge.name(),
                    error = %err,
                    "Judge unavailable, treating candidate as unreviewed"
                );
                judged_down(result, 0.0, "judge_unavailable", format!("judge failed: {}", err))
            }
        }
    }
}

fn judged_down(result: ValidationResult, score: f64, code: &str, message: String) -> ValidationResult {
    ValidationResult {
        verdict: Verdict::Retryable,
        violations: vec![Violation::new(Stage::Judge, None, code, message)],
        quality_score: score,
        reason: Some(FailureReason::QualityViolation),
        low_diversity: false,
        warnings: result.warnings,
        signature: None,
    }
}
