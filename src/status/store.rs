//! Durable sled-backed status table with conditional transitions.
//!
//! Every mutation reads the current record bytes, computes the next record and
//! writes it with `compare_and_swap` against those exact bytes. A lost race either
//! retries against the fresh record (transitions) or skips the row (claims).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sled::{Db, IVec, Tree};
use tracing::{debug, warn};

use crate::error::{to_storage_data, to_storage_io, PipelineError};
use crate::resolver::{DimensionFilter, GenerationSpec, SpecKey};
use crate::status::{
    now_millis, FailureReason, GenerationState, GenerationStatus, Lease, StatusBreakdown,
};

const TREE_STATUS: &str = "status";

/// A row handed to one worker for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub spec: GenerationSpec,
    pub key: SpecKey,
    /// 1-based number of the attempt this claim is for
    pub attempt: u32,
    /// Lease token required for every transition out of `in_progress`
    pub owner: String,
    pub violation_signature: Option<String>,
    pub violation_streak: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub existing: usize,
}

/// Store opens in this process; separates tokens of stores opened in the same millisecond.
static OPEN_COUNT: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct StatusStore {
    db: Db,
    status: Tree,
    /// Per-open token prefix: open time plus the process-local open counter
    token_prefix: String,
    claim_seq: Arc<AtomicU64>,
}

impl StatusStore {
    pub fn new(db: Db) -> Result<Self, PipelineError> {
        let status = db.open_tree(TREE_STATUS).map_err(to_storage_io)?;
        let token_prefix = format!(
            "{:x}.{}",
            now_millis(),
            OPEN_COUNT.fetch_add(1, Ordering::Relaxed)
        );
        Ok(Self {
            db,
            status,
            token_prefix,
            claim_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, PipelineError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Insert a pending row for every spec that has none. Existing rows are left untouched.
    pub fn seed(&self, specs: &[GenerationSpec]) -> Result<SeedReport, PipelineError> {
        let now = now_millis();
        let mut report = SeedReport::default();
        for spec in specs {
            let record = GenerationStatus::new(spec.clone(), now);
            let bytes = encode(&record)?;
            let swapped = self
                .status
                .compare_and_swap(record.key.as_bytes(), None as Option<&[u8]>, Some(bytes))
                .map_err(to_storage_io)?;
            match swapped {
                Ok(()) => report.inserted += 1,
                Err(_) => report.existing += 1,
            }
        }
        debug!(
            inserted = report.inserted,
            existing = report.existing,
            "Status table seeded"
        );
        Ok(report)
    }

    /// Atomically move up to `limit` claimable rows to `in_progress` under fresh leases.
    pub fn claim_batch(
        &self,
        limit: usize,
        owner: &str,
        lease: Duration,
        filter: Option<&DimensionFilter>,
    ) -> Result<Vec<Claim>, PipelineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_millis();
        let mut candidates = self.scan_raw(|status| {
            status.is_claimable(now) && filter.map_or(true, |f| f.matches(&status.spec.combination))
        })?;
        candidates.sort_by(|(a, _), (b, _)| a.claim_order().cmp(&b.claim_order()));

        let mut claims = Vec::new();
        for (current, raw) in candidates {
            if claims.len() >= limit {
                break;
            }
            let token = self.lease_token(owner);
            if current.state == GenerationState::InProgress {
                warn!(
                    spec_key = %current.key,
                    previous_owner = ?current.lease.as_ref().map(|l| l.owner.as_str()),
                    "Reclaiming spec with expired lease"
                );
            }
            let mut next = current.clone();
            next.state = GenerationState::InProgress;
            next.lease = Some(Lease {
                owner: token.clone(),
                expires_at_ms: now + lease.as_millis() as u64,
            });
            next.claimed_at_ms = Some(now);
            next.updated_at_ms = now;

            let swapped = self
                .status
                .compare_and_swap(current.key.as_bytes(), Some(&raw), Some(encode(&next)?))
                .map_err(to_storage_io)?;
            if swapped.is_err() {
                debug!(spec_key = %current.key, "Claim lost to a concurrent worker");
                continue;
            }
            claims.push(Claim {
                attempt: next.attempts + 1,
                spec: next.spec,
                key: next.key,
                owner: token,
                violation_signature: next.violation_signature,
                violation_streak: next.violation_streak,
            });
        }
        Ok(claims)
    }

    /// `{owner}-{open time}.{open count}-{seq}`; unique across stores and restarts.
    fn lease_token(&self, owner: &str) -> String {
        format!(
            "{}-{}-{:06}",
            owner,
            self.token_prefix,
            self.claim_seq.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Extend the lease of a row this worker still holds.
    pub fn heartbeat(
        &self,
        key: &SpecKey,
        owner: &str,
        lease: Duration,
    ) -> Result<GenerationStatus, PipelineError> {
        self.transition(key, owner, |current, now| {
            let mut next = current.clone();
            next.lease = Some(Lease {
                owner: owner.to_string(),
                expires_at_ms: now + lease.as_millis() as u64,
            });
            next.updated_at_ms = now;
            next
        })
    }

    /// `in_progress -> completed`, consuming the attempt.
    pub fn complete(&self, key: &SpecKey, owner: &str) -> Result<GenerationStatus, PipelineError> {
        self.transition(key, owner, |current, now| {
            let mut next = current.clone();
            next.state = GenerationState::Completed;
            next.attempts += 1;
            next.lease = None;
            next.last_error = None;
            next.failure_reason = None;
            next.completed_at_ms = Some(now);
            next.updated_at_ms = now;
            next
        })
    }

    /// `in_progress -> pending` after a retryable attempt, consuming the attempt.
    ///
    /// A schema-violation signature equal to the stored one extends the streak;
    /// any other outcome restarts it.
    pub fn requeue(
        &self,
        key: &SpecKey,
        owner: &str,
        error: &str,
        signature: Option<&str>,
    ) -> Result<GenerationStatus, PipelineError> {
        self.transition(key, owner, |current, now| {
            let mut next = current.clone();
            next.state = GenerationState::Pending;
            next.attempts += 1;
            next.lease = None;
            next.last_error = Some(error.to_string());
            record_signature(&mut next, signature);
            next.updated_at_ms = now;
            next
        })
    }

    /// `in_progress -> failed`, consuming the attempt.
    pub fn fail(
        &self,
        key: &SpecKey,
        owner: &str,
        reason: FailureReason,
        error: &str,
        signature: Option<&str>,
    ) -> Result<GenerationStatus, PipelineError> {
        self.transition(key, owner, |current, now| {
            let mut next = current.clone();
            next.state = GenerationState::Failed;
            next.attempts += 1;
            next.lease = None;
            next.last_error = Some(error.to_string());
            next.failure_reason = Some(reason);
            record_signature(&mut next, signature);
            next.updated_at_ms = now;
            next
        })
    }

    /// `in_progress -> pending` without consuming the attempt.
    pub fn release(
        &self,
        key: &SpecKey,
        owner: &str,
        error: Option<&str>,
    ) -> Result<GenerationStatus, PipelineError> {
        self.transition(key, owner, |current, now| {
            let mut next = current.clone();
            next.state = GenerationState::Pending;
            next.lease = None;
            if let Some(error) = error {
                next.last_error = Some(error.to_string());
            }
            next.updated_at_ms = now;
            next
        })
    }

    /// Externally reset a terminal row to `pending`, clearing attempts and failure data.
    /// Completed rows require `force`; pending rows are returned unchanged.
    pub fn reset(&self, key: &SpecKey, force: bool) -> Result<GenerationStatus, PipelineError> {
        self.update(key, |current, now| {
            match current.state {
                GenerationState::Pending => return Ok(None),
                GenerationState::InProgress => {
                    return Err(PipelineError::InvalidTransition {
                        key: key.to_string(),
                        expected: GenerationState::Failed,
                        found: GenerationState::InProgress,
                    })
                }
                GenerationState::Completed if !force => {
                    return Err(PipelineError::InvalidTransition {
                        key: key.to_string(),
                        expected: GenerationState::Failed,
                        found: GenerationState::Completed,
                    })
                }
                GenerationState::Completed | GenerationState::Failed => {}
            }
            let mut next = current.clone();
            next.state = GenerationState::Pending;
            next.attempts = 0;
            next.last_error = None;
            next.failure_reason = None;
            next.violation_signature = None;
            next.violation_streak = 0;
            next.lease = None;
            next.claimed_at_ms = None;
            next.completed_at_ms = None;
            next.updated_at_ms = now;
            Ok(Some(next))
        })
    }

    /// Reset every failed row matching the filter. Returns the number of rows reset.
    pub fn reset_failed(&self, filter: Option<&DimensionFilter>) -> Result<usize, PipelineError> {
        let failed = self.list(Some(GenerationState::Failed), filter)?;
        let mut count = 0;
        for status in failed {
            match self.reset(&status.key, false) {
                Ok(_) => count += 1,
                Err(PipelineError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    pub fn get(&self, key: &SpecKey) -> Result<Option<GenerationStatus>, PipelineError> {
        let Some(raw) = self.status.get(key.as_bytes()).map_err(to_storage_io)? else {
            return Ok(None);
        };
        Ok(Some(decode(&raw)?))
    }

    /// Rows in claim order, optionally restricted to one state and a dimension filter.
    pub fn list(
        &self,
        state: Option<GenerationState>,
        filter: Option<&DimensionFilter>,
    ) -> Result<Vec<GenerationStatus>, PipelineError> {
        let mut rows: Vec<GenerationStatus> = self
            .scan_raw(|status| {
                state.map_or(true, |s| status.state == s)
                    && filter.map_or(true, |f| f.matches(&status.spec.combination))
            })?
            .into_iter()
            .map(|(status, _)| status)
            .collect();
        rows.sort_by(|a, b| a.claim_order().cmp(&b.claim_order()));
        Ok(rows)
    }

    pub fn pending_count(&self) -> Result<usize, PipelineError> {
        let mut count = 0;
        for result in self.status.iter() {
            let (_, value) = result.map_err(to_storage_io)?;
            if decode(&value)?.state == GenerationState::Pending {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn breakdown(&self, max_attempts: u32) -> Result<StatusBreakdown, PipelineError> {
        let now = now_millis();
        let mut breakdown = StatusBreakdown::default();
        for result in self.status.iter() {
            let (_, value) = result.map_err(to_storage_io)?;
            let status = decode(&value)?;
            breakdown.total += 1;
            match status.state {
                GenerationState::Pending => breakdown.pending += 1,
                GenerationState::InProgress => {
                    breakdown.in_progress += 1;
                    if status.is_reclaimable(now) {
                        breakdown.reclaimable += 1;
                    }
                }
                GenerationState::Completed => breakdown.completed += 1,
                GenerationState::Failed => {
                    breakdown.failed += 1;
                    if status.attempts >= max_attempts {
                        breakdown.exhausted += 1;
                    }
                    let reason = status
                        .failure_reason
                        .map(|r| r.as_str().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    *breakdown.failures_by_reason.entry(reason).or_insert(0) += 1;
                }
            }
        }
        Ok(breakdown)
    }

    /// Next claimable rows in claim order, without claiming them.
    pub fn preview(
        &self,
        limit: usize,
        filter: Option<&DimensionFilter>,
    ) -> Result<Vec<GenerationStatus>, PipelineError> {
        let now = now_millis();
        let mut rows: Vec<GenerationStatus> = self
            .scan_raw(|status| {
                status.is_claimable(now)
                    && filter.map_or(true, |f| f.matches(&status.spec.combination))
            })?
            .into_iter()
            .map(|(status, _)| status)
            .collect();
        rows.sort_by(|a, b| a.claim_order().cmp(&b.claim_order()));
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn flush(&self) -> Result<(), PipelineError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    fn scan_raw<F>(&self, keep: F) -> Result<Vec<(GenerationStatus, IVec)>, PipelineError>
    where
        F: Fn(&GenerationStatus) -> bool,
    {
        let mut out = Vec::new();
        for result in self.status.iter() {
            let (_, value) = result.map_err(to_storage_io)?;
            let status = decode(&value)?;
            if keep(&status) {
                out.push((status, value));
            }
        }
        Ok(out)
    }

    /// Transition out of `in_progress` for the lease holder.
    fn transition<F>(
        &self,
        key: &SpecKey,
        owner: &str,
        apply: F,
    ) -> Result<GenerationStatus, PipelineError>
    where
        F: Fn(&GenerationStatus, u64) -> GenerationStatus,
    {
        self.update(key, |current, now| {
            if current.state != GenerationState::InProgress {
                return Err(PipelineError::InvalidTransition {
                    key: key.to_string(),
                    expected: GenerationState::InProgress,
                    found: current.state,
                });
            }
            let holds_lease = current
                .lease
                .as_ref()
                .map_or(false, |lease| lease.owner == owner);
            if !holds_lease {
                return Err(PipelineError::LeaseLost(key.to_string()));
            }
            Ok(Some(apply(current, now)))
        })
    }

    /// Read-modify-CAS loop. `apply` returning `None` leaves the row untouched.
    fn update<F>(&self, key: &SpecKey, apply: F) -> Result<GenerationStatus, PipelineError>
    where
        F: Fn(&GenerationStatus, u64) -> Result<Option<GenerationStatus>, PipelineError>,
    {
        loop {
            let raw = self
                .status
                .get(key.as_bytes())
                .map_err(to_storage_io)?
                .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;
            let current = decode(&raw)?;
            let Some(next) = apply(&current, now_millis())? else {
                return Ok(current);
            };
            let swapped = self
                .status
                .compare_and_swap(key.as_bytes(), Some(&raw), Some(encode(&next)?))
                .map_err(to_storage_io)?;
            if swapped.is_ok() {
                return Ok(next);
            }
            debug!(spec_key = %key, "Concurrent status update, retrying");
        }
    }
}

fn record_signature(next: &mut GenerationStatus, signature: Option<&str>) {
    match signature {
        Some(sig) if next.violation_signature.as_deref() == Some(sig) => {
            next.violation_streak += 1;
        }
        Some(sig) => {
            next.violation_signature = Some(sig.to_string());
            next.violation_streak = 1;
        }
        None => {
            next.violation_signature = None;
            next.violation_streak = 0;
        }
    }
}

fn encode(status: &GenerationStatus) -> Result<Vec<u8>, PipelineError> {
    Ok(serde_json::to_vec(status).map_err(to_storage_data)?)
}

fn decode(raw: &[u8]) -> Result<GenerationStatus, PipelineError> {
    Ok(serde_json::from_slice(raw).map_err(to_storage_data)?)
}
