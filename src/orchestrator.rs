//! Generation orchestrator
//!
//! Claims pending specs from the status store, fans them out to the producer
//! under a concurrency bound, routes candidates through the validator (and the
//! judge, when one is configured) and drives each status row to its next state. Per-spec failures never abort a
//! batch; they are tallied in the [`BatchReport`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::content::{AcceptedContent, ContentStore};
use crate::error::{PipelineError, ProducerError, StoreWriteError};
use crate::judge::{JudgeRequest, JudgeStage};
use crate::producer::{variation_seed, ContentProducer, ProducerRequest};
use crate::resolver::DimensionFilter;
use crate::schema::SchemaRegistry;
use crate::status::{now_millis, Claim, FailureReason, GenerationStatus, StatusBreakdown, StatusStore};
use crate::validator::{ContentValidator, ValidationContext, Verdict};

pub mod cancel;

pub use cancel::CancellationSignal;

/// Retry, timeout and lease knobs, derived from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub repeat_limit: u32,
    pub producer_timeout: Duration,
    pub store_timeout: Duration,
    pub store_write_retries: u32,
    pub retry_delay: Duration,
    pub lease: Duration,
}

impl From<&PipelineConfig> for OrchestratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            repeat_limit: config.effective_repeat_limit(),
            producer_timeout: config.producer_timeout(),
            store_timeout: config.store_timeout(),
            store_write_retries: config.store_write_retries,
            retry_delay: config.retry_delay(),
            lease: config.lease(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// What happened to one claimed spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecOutcome {
    Accepted { low_diversity: bool },
    Retried,
    Failed(FailureReason),
    /// Store write kept failing; back to pending without consuming the attempt
    RolledBack,
    /// Cancelled before dispatch; back to pending without consuming the attempt
    Released,
    /// Another worker reclaimed the row; result discarded
    LeaseLost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub accepted: usize,
    pub retried: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub low_diversity: usize,
    pub released: usize,
    pub lease_lost: usize,
    /// Status store errors while processing a spec
    pub errors: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: SpecOutcome) {
        match outcome {
            SpecOutcome::Accepted { low_diversity } => {
                self.accepted += 1;
                if low_diversity {
                    self.low_diversity += 1;
                }
            }
            SpecOutcome::Retried => self.retried += 1,
            SpecOutcome::Failed(_) => self.failed += 1,
            SpecOutcome::RolledBack => self.rolled_back += 1,
            SpecOutcome::Released => self.released += 1,
            SpecOutcome::LeaseLost => self.lease_lost += 1,
        }
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.claimed += other.claimed;
        self.accepted += other.accepted;
        self.retried += other.retried;
        self.failed += other.failed;
        self.rolled_back += other.rolled_back;
        self.low_diversity += other.low_diversity;
        self.released += other.released;
        self.lease_lost += other.lease_lost;
        self.errors += other.errors;
    }
}

pub struct Orchestrator {
    status: Arc<StatusStore>,
    content: Arc<dyn ContentStore>,
    producer: Arc<dyn ContentProducer>,
    schemas: Arc<SchemaRegistry>,
    validator: ContentValidator,
    judge: Option<JudgeStage>,
    settings: OrchestratorSettings,
    owner: String,
    filter: Option<DimensionFilter>,
    cancel: CancellationSignal,
}

impl Orchestrator {
    pub fn new(
        status: Arc<StatusStore>,
        content: Arc<dyn ContentStore>,
        producer: Arc<dyn ContentProducer>,
        schemas: Arc<SchemaRegistry>,
        validator: ContentValidator,
        settings: OrchestratorSettings,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            status,
            content,
            producer,
            schemas,
            validator,
            judge: None,
            settings,
            owner: owner.into(),
            filter: None,
            cancel: CancellationSignal::new(),
        }
    }

    pub fn with_filter(mut self, filter: Option<DimensionFilter>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    /// Review heuristically accepted candidates with a judge before storing them.
    pub fn with_judge(mut self, judge: Option<JudgeStage>) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Claim up to `n` specs for this orchestrator.
    pub fn claim_batch(&self, n: usize) -> Result<Vec<Claim>, PipelineError> {
        self.status
            .claim_batch(n, &self.owner, self.settings.lease, self.filter.as_ref())
    }

    /// Claim a batch and process it with at most `concurrency` specs in flight.
    pub async fn run_batch(
        &self,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        if self.cancel.is_cancelled() {
            return Ok(report);
        }
        let claims = self.claim_batch(batch_size)?;
        report.claimed = claims.len();
        if claims.is_empty() {
            return Ok(report);
        }
        debug!(claimed = claims.len(), concurrency, "Batch claimed");

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut futures = FuturesUnordered::new();
        for claim in claims {
            let semaphore = semaphore.clone();
            futures.push(async move {
                let key = claim.key.clone();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => self.process_spec(claim).await,
                    Err(_) => self.release(&claim).await,
                };
                (key, result)
            });
        }

        while let Some((key, result)) = futures.next().await {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    report.errors += 1;
                    error!(spec_key = %key, error = %err, "Spec processing failed");
                }
            }
        }

        info!(
            claimed = report.claimed,
            accepted = report.accepted,
            retried = report.retried,
            failed = report.failed,
            rolled_back = report.rolled_back,
            released = report.released,
            "Batch finished"
        );
        Ok(report)
    }

    /// Run one attempt for a claimed spec and record its outcome in the status store.
    pub async fn process_spec(&self, claim: Claim) -> Result<SpecOutcome, PipelineError> {
        if self.cancel.is_cancelled() {
            return self.release(&claim).await;
        }
        let started = Instant::now();
        let final_attempt = claim.attempt >= self.settings.max_attempts;

        let schema = match self.schemas.lookup(&claim.spec.schema_id) {
            Ok(schema) => schema.clone(),
            Err(err) => {
                warn!(spec_key = %claim.key, schema = %claim.spec.schema_id, "No schema for spec");
                return self
                    .fail(&claim, FailureReason::UnknownSchema, &err.to_string(), None)
                    .await;
            }
        };

        let accepted = match self.accepted_siblings(&claim).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(spec_key = %claim.key, error = %err, "Content store unreadable, releasing spec");
                self.status
                    .release(&claim.key, &claim.owner, Some(&err.to_string()))?;
                return Ok(SpecOutcome::RolledBack);
            }
        };
        if let Some(existing) = accepted.iter().find(|c| c.spec_key == claim.key) {
            info!(spec_key = %claim.key, "Content already stored, completing without regeneration");
            let low_diversity = existing.low_diversity;
            return self
                .complete(&claim, SpecOutcome::Accepted { low_diversity })
                .await;
        }

        let request = ProducerRequest {
            spec: claim.spec.clone(),
            schema: schema.clone(),
            variation_seed: variation_seed(claim.spec.variation, claim.attempt - 1),
            attempt: claim.attempt,
        };
        let produced = match timeout(self.settings.producer_timeout, self.producer.produce(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProducerError::Timeout(
                self.settings.producer_timeout.as_millis() as u64,
            )),
        };

        if !self.renew_lease(&claim)? {
            warn!(spec_key = %claim.key, "Lease lost during producer call, discarding result");
            return Ok(SpecOutcome::LeaseLost);
        }

        let candidate = match produced {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(
                    spec_key = %claim.key,
                    attempt = claim.attempt,
                    producer = self.producer.name(),
                    error = %err,
                    "Producer attempt failed"
                );
                return if final_attempt {
                    self.fail(&claim, FailureReason::ProducerFailure, &err.to_string(), None)
                        .await
                } else {
                    self.requeue(&claim, &err.to_string(), None).await
                };
            }
        };

        let ctx = ValidationContext {
            attempt: claim.attempt,
            max_attempts: self.settings.max_attempts,
            repeat_limit: self.settings.repeat_limit,
            previous_signature: claim.violation_signature.as_deref(),
            previous_streak: claim.violation_streak,
            accepted: &accepted,
        };
        let mut result = self
            .validator
            .validate(&candidate, &schema, &claim.spec, &ctx);
        if let Some(judge) = &self.judge {
            if result.verdict == Verdict::Accepted {
                let request = JudgeRequest {
                    spec: &claim.spec,
                    schema: &schema,
                    candidate: &candidate,
                    attempt: claim.attempt,
                };
                result = judge.review(&request, result).await;
                if !self.renew_lease(&claim)? {
                    warn!(spec_key = %claim.key, "Lease lost during judge call, discarding result");
                    return Ok(SpecOutcome::LeaseLost);
                }
            }
        }

        info!(
            spec_key = %claim.key,
            attempt = claim.attempt,
            verdict = ?result.verdict,
            quality_score = result.quality_score,
            duration_ms = started.elapsed().as_millis() as u64,
            "Candidate validated"
        );

        match result.verdict {
            Verdict::Accepted => {
                let record = AcceptedContent {
                    spec_key: claim.key.clone(),
                    combination_id: claim.spec.combination.id.clone(),
                    variation: claim.spec.variation,
                    exercise_type: claim.spec.schema_id.clone(),
                    schema_version: schema.version,
                    fields: candidate.fields,
                    quality_score: result.quality_score,
                    low_diversity: result.low_diversity,
                    attempts: claim.attempt,
                    accepted_at_ms: now_millis(),
                };
                match self.write_with_retry(&record).await {
                    Ok(()) => {
                        self.complete(
                            &claim,
                            SpecOutcome::Accepted {
                                low_diversity: result.low_diversity,
                            },
                        )
                        .await
                    }
                    Err(err) => {
                        error!(
                            spec_key = %claim.key,
                            error = %err,
                            "Content store write failed, rolling back to pending"
                        );
                        self.status
                            .release(&claim.key, &claim.owner, Some(&err.to_string()))?;
                        Ok(SpecOutcome::RolledBack)
                    }
                }
            }
            Verdict::Rejected => {
                let reason = result.reason.unwrap_or(FailureReason::Rejected);
                self.fail(&claim, reason, &result.summary(), result.signature.as_deref())
                    .await
            }
            Verdict::Retryable if final_attempt => {
                let reason = result.reason.unwrap_or(FailureReason::Rejected);
                self.fail(&claim, reason, &result.summary(), result.signature.as_deref())
                    .await
            }
            Verdict::Retryable => {
                self.requeue(&claim, &result.summary(), result.signature.as_deref())
                    .await
            }
        }
    }

    pub fn pending_count(&self) -> Result<usize, PipelineError> {
        self.status.pending_count()
    }

    pub fn status_breakdown(&self) -> Result<StatusBreakdown, PipelineError> {
        self.status.breakdown(self.settings.max_attempts)
    }

    /// Next specs in claim order, without claiming them.
    pub fn preview(&self, n: usize) -> Result<Vec<GenerationStatus>, PipelineError> {
        self.status.preview(n, self.filter.as_ref())
    }

    /// Heartbeat the claim. `false` when another worker has taken the row over.
    fn renew_lease(&self, claim: &Claim) -> Result<bool, PipelineError> {
        match self
            .status
            .heartbeat(&claim.key, &claim.owner, self.settings.lease)
        {
            Ok(_) => Ok(true),
            Err(PipelineError::LeaseLost(_)) | Err(PipelineError::InvalidTransition { .. }) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn accepted_siblings(&self, claim: &Claim) -> Result<Vec<AcceptedContent>, StoreWriteError> {
        match timeout(
            self.settings.store_timeout,
            self.content.accepted_for(&claim.spec.combination.id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreWriteError::Unavailable(format!(
                "read timed out after {} ms",
                self.settings.store_timeout.as_millis()
            ))),
        }
    }

    /// Bounded write with retries. A duplicate means the record is already durable.
    async fn write_with_retry(&self, record: &AcceptedContent) -> Result<(), StoreWriteError> {
        let mut last_error = StoreWriteError::Unavailable("no write attempted".to_string());
        for attempt in 0..=self.settings.store_write_retries {
            if attempt > 0 {
                sleep(self.settings.retry_delay).await;
            }
            let outcome = match timeout(self.settings.store_timeout, self.content.write(record)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreWriteError::Unavailable(format!(
                    "write timed out after {} ms",
                    self.settings.store_timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(StoreWriteError::Duplicate(_)) => {
                    debug!(spec_key = %record.spec_key, "Content already present, treating write as done");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        spec_key = %record.spec_key,
                        write_attempt = attempt + 1,
                        error = %err,
                        "Content store write failed"
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn complete(&self, claim: &Claim, outcome: SpecOutcome) -> Result<SpecOutcome, PipelineError> {
        match self.status.complete(&claim.key, &claim.owner) {
            Ok(_) => Ok(outcome),
            Err(PipelineError::LeaseLost(_)) => Ok(SpecOutcome::LeaseLost),
            Err(err) => Err(err),
        }
    }

    async fn requeue(
        &self,
        claim: &Claim,
        error: &str,
        signature: Option<&str>,
    ) -> Result<SpecOutcome, PipelineError> {
        match self.status.requeue(&claim.key, &claim.owner, error, signature) {
            Ok(_) => Ok(SpecOutcome::Retried),
            Err(PipelineError::LeaseLost(_)) => Ok(SpecOutcome::LeaseLost),
            Err(err) => Err(err),
        }
    }

    async fn fail(
        &self,
        claim: &Claim,
        reason: FailureReason,
        error: &str,
        signature: Option<&str>,
    ) -> Result<SpecOutcome, PipelineError> {
        warn!(spec_key = %claim.key, attempt = claim.attempt, reason = %reason, error, "Spec failed");
        match self
            .status
            .fail(&claim.key, &claim.owner, reason, error, signature)
        {
            Ok(_) => Ok(SpecOutcome::Failed(reason)),
            Err(PipelineError::LeaseLost(_)) => Ok(SpecOutcome::LeaseLost),
            Err(err) => Err(err),
        }
    }

    async fn release(&self, claim: &Claim) -> Result<SpecOutcome, PipelineError> {
        debug!(spec_key = %claim.key, "Releasing unstarted spec");
        match self.status.release(&claim.key, &claim.owner, None) {
            Ok(_) => Ok(SpecOutcome::Released),
            Err(PipelineError::LeaseLost(_)) => Ok(SpecOutcome::LeaseLost),
            Err(err) => Err(err),
        }
    }
}
