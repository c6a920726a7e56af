//! Content validation
//!
//! Three ordered stages, stopping at the first one that fails:
//! schema compliance, content quality heuristics, then similarity against
//! content already accepted for the same combination. An optional LLM judge
//! ([`crate::judge`]) may review what these stages accept.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::content::AcceptedContent;
use crate::producer::CandidateContent;
use crate::resolver::GenerationSpec;
use crate::schema::ContentSchema;
use crate::status::FailureReason;

pub mod compliance;
pub mod language;
pub mod quality;
pub mod similarity;

pub use language::detect_language;
pub use similarity::{jaccard_similarity, normalize_text};

/// Similarity at or above this is treated as a duplicate unless configured otherwise.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Penalty per soft warning when computing the quality score.
const WARNING_PENALTY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
    Retryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    Quality,
    Similarity,
    Judge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub stage: Stage,
    pub field: Option<String>,
    /// Stable machine-readable code, e.g. `missing`, `too_long`, `placeholder`
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(stage: Stage, field: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            field: field.map(str::to_string),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    /// In [0, 1]
    pub quality_score: f64,
    pub reason: Option<FailureReason>,
    pub low_diversity: bool,
    /// Soft findings that lower the score without failing validation
    pub warnings: Vec<String>,
    /// Signature of the schema violations, used to detect repeated identical failures
    pub signature: Option<String>,
}

impl ValidationResult {
    pub(crate) fn accepted(quality_score: f64, warnings: Vec<String>, low_diversity: bool) -> Self {
        Self {
            verdict: Verdict::Accepted,
            violations: Vec::new(),
            quality_score,
            reason: None,
            low_diversity,
            warnings,
            signature: None,
        }
    }

    /// One-line description of the violations, for status rows and logs.
    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return self
                .reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "ok".to_string());
        }
        self.violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Attempt bookkeeping the validator needs to pick between retry and terminal verdicts.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    /// Consecutive identical schema violations that turn into a rejection
    pub repeat_limit: u32,
    pub previous_signature: Option<&'a str>,
    pub previous_streak: u32,
    /// Content already accepted for the same combination
    pub accepted: &'a [AcceptedContent],
}

impl ValidationContext<'_> {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct ContentValidator {
    similarity_threshold: f64,
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl ContentValidator {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn validate(
        &self,
        candidate: &CandidateContent,
        schema: &ContentSchema,
        spec: &GenerationSpec,
        ctx: &ValidationContext<'_>,
    ) -> ValidationResult {
        let violations = compliance::check(candidate, schema);
        if !violations.is_empty() {
            let signature = compliance::signature(&violations);
            let streak = if ctx.previous_signature == Some(signature.as_str()) {
                ctx.previous_streak + 1
            } else {
                1
            };
            let verdict = if streak >= ctx.repeat_limit {
                Verdict::Rejected
            } else {
                Verdict::Retryable
            };
            return ValidationResult {
                verdict,
                violations,
                quality_score: 0.0,
                reason: Some(FailureReason::SchemaViolation),
                low_diversity: false,
                warnings: Vec::new(),
                signature: Some(signature),
            };
        }

        let (violations, warnings) = quality::check(candidate, schema, spec);
        let quality_score = (1.0 - WARNING_PENALTY * warnings.len() as f64).max(0.0);
        if !violations.is_empty() {
            return ValidationResult {
                verdict: Verdict::Retryable,
                violations,
                quality_score,
                reason: Some(FailureReason::QualityViolation),
                low_diversity: false,
                warnings,
                signature: None,
            };
        }

        let spec_key = spec.key();
        let siblings: Vec<&AcceptedContent> = ctx
            .accepted
            .iter()
            .filter(|c| c.spec_key != spec_key)
            .collect();
        if let Some((closest, score)) =
            similarity::closest(candidate, siblings.iter().copied())
        {
            if score >= self.similarity_threshold {
                if ctx.is_final_attempt() {
                    warn!(
                        spec_key = %spec_key,
                        similar_to = %closest.spec_key,
                        similarity = score,
                        "Accepting near-duplicate content on final attempt"
                    );
                    return ValidationResult::accepted(quality_score, warnings, true);
                }
                return ValidationResult {
                    verdict: Verdict::Retryable,
                    violations: vec![Violation::new(
                        Stage::Similarity,
                        None,
                        "near_duplicate",
                        format!(
                            "similarity {:.2} with {} is at or above {:.2}",
                            score, closest.spec_key, self.similarity_threshold
                        ),
                    )],
                    quality_score,
                    reason: Some(FailureReason::DuplicateContent),
                    low_diversity: false,
                    warnings,
                    signature: None,
                };
            }
        }

        ValidationResult::accepted(quality_score, warnings, false)
    }
}
