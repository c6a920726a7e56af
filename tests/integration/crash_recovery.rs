//! Resumability after a crash: expired leases are reclaimed, stored work is not redone.

use std::time::Duration;

use coursegen::content::{AcceptedContent, ContentStore, SledContentStore};
use coursegen::pipeline::{Pipeline, RunOptions};
use coursegen::resolver::{expand, to_specs};
use coursegen::schema::SchemaRegistry;
use coursegen::status::{GenerationState, StatusStore};
use tempfile::TempDir;

use crate::integration::test_utils::{
    good_candidate, open_pipeline, test_config, tiny_catalog, ScriptedProducer,
};

fn options() -> RunOptions {
    RunOptions {
        batch_size: 4,
        variations_per_combo: 3,
        concurrency: 2,
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn expired_leases_are_reclaimed_and_completed() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();

    // A worker claims everything and dies without finishing.
    let status = StatusStore::new(db.clone()).unwrap();
    let specs = to_specs(&expand(&tiny_catalog()).unwrap(), 3);
    status.seed(&specs).unwrap();
    let orphaned = status
        .claim_batch(100, "crashed", Duration::from_millis(1), None)
        .unwrap();
    assert_eq!(orphaned.len(), 6);
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(status.breakdown(3).unwrap().reclaimable, 6);

    let producer = ScriptedProducer::always_good();
    let pipeline = Pipeline::new(
        tiny_catalog(),
        SchemaRegistry::builtin(),
        db,
        producer.clone(),
        test_config(),
    )
    .unwrap();
    let summary = pipeline.run(&options()).await.unwrap();

    assert_eq!(summary.seed.existing, 6);
    assert_eq!(summary.report.accepted, 6);
    assert_eq!(summary.breakdown.completed, 6);
    assert_eq!(summary.breakdown.in_progress, 0);
    assert_eq!(producer.calls(), 6);
    for row in pipeline.list(None, &Default::default()).unwrap() {
        assert_eq!(row.attempts, 1, "reclaiming an expired lease consumes no attempt");
    }
}

#[tokio::test]
async fn rerun_does_not_duplicate_completed_work() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());

    let first = pipeline.run(&options()).await.unwrap();
    assert_eq!(first.report.accepted, 6);

    let second = pipeline.run(&options()).await.unwrap();
    assert_eq!(second.report.claimed, 0);
    assert_eq!(second.seed.inserted, 0);
    assert_eq!(producer.calls(), 6);
    assert_eq!(second.breakdown.completed, 6);
}

#[tokio::test]
async fn content_written_before_crash_completes_without_regeneration() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();
    let status = StatusStore::new(db.clone()).unwrap();
    let content = SledContentStore::new(&db).unwrap();

    let specs = to_specs(&expand(&tiny_catalog()).unwrap(), 1);
    status.seed(&specs).unwrap();
    let claim = status
        .claim_batch(1, "crashed", Duration::from_millis(1), None)
        .unwrap()
        .remove(0);

    // Crash between the content write and the status transition.
    let record = AcceptedContent {
        spec_key: claim.key.clone(),
        combination_id: claim.spec.combination.id.clone(),
        variation: claim.spec.variation,
        exercise_type: claim.spec.schema_id.clone(),
        schema_version: 1,
        fields: good_candidate(42).fields,
        quality_score: 1.0,
        low_diversity: false,
        attempts: 1,
        accepted_at_ms: 0,
    };
    content.write(&record).await.unwrap();
    std::thread::sleep(Duration::from_millis(10));

    let producer = ScriptedProducer::always_good();
    let pipeline = Pipeline::new(
        tiny_catalog(),
        SchemaRegistry::builtin(),
        db,
        producer.clone(),
        test_config(),
    )
    .unwrap();
    let summary = pipeline
        .run(&RunOptions {
            variations_per_combo: 1,
            ..options()
        })
        .await
        .unwrap();

    assert_eq!(summary.report.accepted, 2);
    assert_eq!(producer.calls(), 1, "only the spec without stored content is produced");
    assert!(producer
        .requests()
        .iter()
        .all(|(key, _, _)| key != &claim.key));
    let row = status.get(&claim.key).unwrap().unwrap();
    assert_eq!(row.state, GenerationState::Completed);

    assert_eq!(content.len(), 2);
    assert_eq!(content.get(&claim.key).await.unwrap().unwrap(), record);
}

#[tokio::test]
async fn interrupted_runs_are_marked_on_open() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();
    let producer = ScriptedProducer::always_good();

    let first = Pipeline::new(
        tiny_catalog(),
        SchemaRegistry::builtin(),
        db.clone(),
        producer.clone(),
        test_config(),
    )
    .unwrap();
    let run_id = first.ledger().start_run("run").unwrap();
    drop(first);

    let second =
        Pipeline::new(tiny_catalog(), SchemaRegistry::builtin(), db, producer, test_config())
            .unwrap();
    let run = second.ledger().store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.status, coursegen::progress::RunStatus::Interrupted);
}
