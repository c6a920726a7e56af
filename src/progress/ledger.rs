//! Run lifecycle helpers on top of [`RunStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{PipelineError, StorageError};
use crate::progress::event::{RunEndedData, RunStartedData};
use crate::progress::store::{RunRecord, RunStatus, RunStore};
use crate::status::now_millis;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct RunLedger {
    store: Arc<RunStore>,
}

impl RunLedger {
    pub fn new(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            store: RunStore::shared(db)?,
        })
    }

    pub fn start_run(&self, command: &str) -> Result<String, PipelineError> {
        let run_id = new_run_id();
        let record = RunRecord {
            run_id: run_id.clone(),
            command: command.to_string(),
            started_at_ms: now_millis(),
            ended_at_ms: None,
            status: RunStatus::Active,
            next_seq: 1,
            error: None,
            summary: None,
        };
        self.store.put_run(&record)?;
        self.store.append_event(
            &run_id,
            "run_started",
            to_value(&RunStartedData {
                command: command.to_string(),
            })?,
        )?;
        self.store.flush()?;
        Ok(run_id)
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: Option<Value>,
        error: Option<String>,
    ) -> Result<(), PipelineError> {
        self.store.append_event(
            run_id,
            "run_ended",
            to_value(&RunEndedData {
                status: status.as_str().to_string(),
                error: error.clone(),
            })?,
        )?;
        let mut record = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("run {run_id}")))?;
        record.status = status;
        record.ended_at_ms = Some(now_millis());
        record.summary = summary;
        record.error = error;
        self.store.put_run(&record)?;
        self.store.flush()?;
        Ok(())
    }

    pub fn record_event<T: Serialize>(
        &self,
        run_id: &str,
        event_type: &str,
        data: &T,
    ) -> Result<(), PipelineError> {
        self.store.append_event(run_id, event_type, to_value(data)?)?;
        self.store.flush()?;
        Ok(())
    }

    /// Ledger writes never fail a run.
    pub fn record_event_best_effort<T: Serialize>(&self, run_id: &str, event_type: &str, data: &T) {
        if let Err(err) = self.record_event(run_id, event_type, data) {
            warn!(
                run_id = %run_id,
                event_type = %event_type,
                error = %err,
                "failed to record run event"
            );
        }
    }

    pub fn mark_interrupted_runs(&self) -> Result<usize, PipelineError> {
        let changed = self.store.mark_interrupted_runs()?;
        self.store.flush()?;
        Ok(changed)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, PipelineError> {
        let mut runs = self.store.list_runs()?;
        runs.truncate(limit);
        Ok(runs)
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }
}

pub fn new_run_id() -> String {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{ts}-{pid}-{seq}")
}

fn to_value<T: Serialize>(data: &T) -> Result<Value, PipelineError> {
    serde_json::to_value(data)
        .map_err(|e| PipelineError::Storage(crate::error::to_storage_data(e)))
}
