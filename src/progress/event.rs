//! Event schema for the run ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::orchestrator::BatchReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub seq: u64,
    pub ts_ms: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedData {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEndedData {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEventData {
    pub combinations: usize,
    pub inserted: usize,
    pub existing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEventData {
    pub batch: usize,
    #[serde(flatten)]
    pub report: BatchReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}
