//! Run ledger: durable per-run records and events.

pub mod event;
pub mod ledger;
pub mod store;

pub use event::{BatchEventData, RunEndedData, RunEvent, RunStartedData, SeedEventData};
pub use ledger::{new_run_id, RunLedger};
pub use store::{RunRecord, RunStatus, RunStore};
