//! Durable sled-backed run ledger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::{Db, Tree};

use crate::error::{to_storage_data, to_storage_io, StorageError};
use crate::progress::event::RunEvent;
use crate::status::now_millis;

const TREE_RUNS: &str = "runs";
const TREE_EVENTS: &str = "run_events";
const EVENT_KEY_PAD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, RunStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub command: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub status: RunStatus,
    pub next_seq: u64,
    pub error: Option<String>,
    /// Final run summary, serialized as written by the pipeline
    pub summary: Option<Value>,
}

#[derive(Clone)]
pub struct RunStore {
    db: Db,
    runs: Tree,
    events: Tree,
}

impl RunStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let runs = db.open_tree(TREE_RUNS).map_err(to_storage_io)?;
        let events = db.open_tree(TREE_EVENTS).map_err(to_storage_io)?;
        Ok(Self { db, runs, events })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn put_run(&self, record: &RunRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record).map_err(to_storage_data)?;
        self.runs
            .insert(record.run_id.as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StorageError> {
        let Some(raw) = self.runs.get(run_id.as_bytes()).map_err(to_storage_io)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    /// Most recent first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>, StorageError> {
        let mut out = Vec::new();
        for result in self.runs.iter() {
            let (_, value) = result.map_err(to_storage_io)?;
            let rec: RunRecord = serde_json::from_slice(&value).map_err(to_storage_data)?;
            out.push(rec);
        }
        out.sort_by_key(|r| std::cmp::Reverse(r.started_at_ms));
        Ok(out)
    }

    /// Appends an event and bumps the run's sequence counter.
    pub fn append_event(
        &self,
        run_id: &str,
        event_type: &str,
        data: Value,
    ) -> Result<RunEvent, StorageError> {
        let mut run = self
            .get_run(run_id)?
            .ok_or_else(|| StorageError::NotFound(format!("run {run_id}")))?;
        let event = RunEvent {
            run_id: run_id.to_string(),
            seq: run.next_seq,
            ts_ms: now_millis(),
            event_type: event_type.to_string(),
            data,
        };
        let key = encode_event_key(run_id, event.seq);
        let value = serde_json::to_vec(&event).map_err(to_storage_data)?;
        self.events
            .insert(key.as_bytes(), value)
            .map_err(to_storage_io)?;
        run.next_seq += 1;
        self.put_run(&run)?;
        Ok(event)
    }

    pub fn read_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StorageError> {
        let prefix = format!("{run_id}:");
        let mut out = Vec::new();
        for result in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result.map_err(to_storage_io)?;
            let parsed: RunEvent = serde_json::from_slice(&value).map_err(to_storage_data)?;
            out.push(parsed);
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    /// Runs still `active` belong to a process that died; mark them interrupted.
    pub fn mark_interrupted_runs(&self) -> Result<usize, StorageError> {
        let mut changed = 0usize;
        for mut run in self.list_runs()? {
            if run.status == RunStatus::Active {
                run.status = RunStatus::Interrupted;
                run.ended_at_ms = Some(now_millis());
                self.put_run(&run)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

fn encode_event_key(run_id: &str, seq: u64) -> String {
    format!("{run_id}:{seq:0EVENT_KEY_PAD$}")
}
