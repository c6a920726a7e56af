//! Content store failures: persistent write failure rolls back, duplicates complete.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use coursegen::pipeline::RunOptions;
use coursegen::status::GenerationState;
use tempfile::TempDir;

use crate::integration::test_utils::{
    open_pipeline, single_combination_catalog, test_config, DuplicateStore, ScriptedProducer,
    UnavailableStore,
};

fn options() -> RunOptions {
    RunOptions {
        batch_size: 10,
        variations_per_combo: 2,
        concurrency: 2,
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn persistent_write_failure_rolls_back_to_pending() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(UnavailableStore::default());
    let config = test_config();
    let pipeline = open_pipeline(
        &dir,
        single_combination_catalog(),
        ScriptedProducer::always_good(),
        config.clone(),
    )
    .with_content_store(store.clone());

    let summary = pipeline.run(&options()).await.unwrap();

    assert_eq!(summary.report.claimed, 2);
    assert_eq!(summary.report.rolled_back, 2);
    assert_eq!(summary.report.accepted, 0);
    assert_eq!(summary.batches, 1, "a batch without progress ends the run");
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(
        store.writes.load(Ordering::SeqCst),
        2 * (config.store_write_retries as usize + 1)
    );

    for row in pipeline.list(None, &Default::default()).unwrap() {
        assert_eq!(row.state, GenerationState::Pending);
        assert_eq!(row.attempts, 0, "a rolled back attempt is not consumed");
        assert!(row.last_error.unwrap().contains("disk full"));
        assert!(row.lease.is_none());
    }
}

#[tokio::test]
async fn duplicate_write_completes_without_second_write() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DuplicateStore::default());
    let pipeline = open_pipeline(
        &dir,
        single_combination_catalog(),
        ScriptedProducer::always_good(),
        test_config(),
    )
    .with_content_store(store.clone());

    let summary = pipeline.run(&options()).await.unwrap();

    assert_eq!(summary.report.accepted, 2);
    assert_eq!(summary.breakdown.completed, 2);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2, "no retry after a duplicate");
}
