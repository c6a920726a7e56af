//! Per-spec generation status
//!
//! One durable record per (combination, variation). The record is the single
//! source of truth for resumability: every state change goes through a
//! compare-and-swap in [`StatusStore`].

use crate::resolver::{GenerationSpec, SpecKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod store;

pub use store::{Claim, SeedReport, StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Pending => "pending",
            GenerationState::InProgress => "in_progress",
            GenerationState::Completed => "completed",
            GenerationState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GenerationState::Pending),
            "in_progress" => Some(GenerationState::InProgress),
            "completed" => Some(GenerationState::Completed),
            "failed" => Some(GenerationState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable reason codes recorded on failed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnknownSchema,
    SchemaViolation,
    QualityViolation,
    DuplicateContent,
    ProducerFailure,
    Rejected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnknownSchema => "unknown_schema",
            FailureReason::SchemaViolation => "schema_violation",
            FailureReason::QualityViolation => "quality_violation",
            FailureReason::DuplicateContent => "duplicate_content",
            FailureReason::ProducerFailure => "producer_failure",
            FailureReason::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Token of the claim holding the row
    pub owner: String,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub key: SpecKey,
    pub spec: GenerationSpec,
    pub state: GenerationState,
    /// Attempts consumed so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Signature of the most recent schema violation and how many consecutive attempts produced it
    pub violation_signature: Option<String>,
    pub violation_streak: u32,
    pub lease: Option<Lease>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub claimed_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
}

impl GenerationStatus {
    pub fn new(spec: GenerationSpec, now_ms: u64) -> Self {
        GenerationStatus {
            key: spec.key(),
            spec,
            state: GenerationState::Pending,
            attempts: 0,
            last_error: None,
            failure_reason: None,
            violation_signature: None,
            violation_streak: 0,
            lease: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            claimed_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// Pending, or in progress under a lease that has run out.
    pub fn is_claimable(&self, now_ms: u64) -> bool {
        match self.state {
            GenerationState::Pending => true,
            GenerationState::InProgress => self
                .lease
                .as_ref()
                .map_or(true, |lease| lease.is_expired(now_ms)),
            GenerationState::Completed | GenerationState::Failed => false,
        }
    }

    pub fn is_reclaimable(&self, now_ms: u64) -> bool {
        self.state == GenerationState::InProgress && self.is_claimable(now_ms)
    }

    /// Claim order: combination priority, then spec key.
    pub fn claim_order(&self) -> (u32, &SpecKey) {
        (self.spec.combination.priority, &self.key)
    }
}

/// Counts per state for the status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// In progress with an expired lease
    pub reclaimable: usize,
    /// Failed after using the whole retry budget
    pub exhausted: usize,
    pub failures_by_reason: BTreeMap<String, usize>,
}

impl StatusBreakdown {
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn count(&self, state: GenerationState) -> usize {
        match state {
            GenerationState::Pending => self.pending,
            GenerationState::InProgress => self.in_progress,
            GenerationState::Completed => self.completed,
            GenerationState::Failed => self.failed,
        }
    }
}

pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
