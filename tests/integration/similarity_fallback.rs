//! Near-duplicate candidates retry, then are accepted with `low_diversity` on the last attempt.

use coursegen::content::{ContentStore, SledContentStore};
use coursegen::pipeline::RunOptions;
use coursegen::resolver::{expand, SpecKey};
use coursegen::status::GenerationState;
use tempfile::TempDir;

use crate::integration::test_utils::{
    good_candidate, single_combination_catalog, test_config, ScriptedProducer,
};

#[tokio::test]
async fn identical_candidates_fall_back_to_low_diversity() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();
    // Same text for every spec and attempt.
    let producer = ScriptedProducer::new(|_| Ok(good_candidate(7)));
    let pipeline = coursegen::pipeline::Pipeline::new(
        single_combination_catalog(),
        coursegen::schema::SchemaRegistry::builtin(),
        db.clone(),
        producer.clone(),
        test_config(),
    )
    .unwrap();

    let summary = pipeline
        .run(&RunOptions {
            batch_size: 1,
            variations_per_combo: 2,
            concurrency: 1,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.report.accepted, 2);
    assert_eq!(summary.report.retried, 2);
    assert_eq!(summary.report.low_diversity, 1);
    assert_eq!(summary.breakdown.completed, 2);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(producer.calls(), 4);

    let combination = expand(&single_combination_catalog()).unwrap().remove(0);
    let content = SledContentStore::new(&db).unwrap();
    let first = content
        .get(&SpecKey::new(&combination.id, 0))
        .await
        .unwrap()
        .unwrap();
    let second = content
        .get(&SpecKey::new(&combination.id, 1))
        .await
        .unwrap()
        .unwrap();
    assert!(!first.low_diversity);
    assert_eq!(first.attempts, 1);
    assert!(second.low_diversity);
    assert_eq!(second.attempts, 3);

    let row = pipeline
        .status_store()
        .get(&SpecKey::new(&combination.id, 1))
        .unwrap()
        .unwrap();
    assert_eq!(row.state, GenerationState::Completed);
    assert_eq!(row.attempts, 3);
}

#[tokio::test]
async fn distinct_candidates_are_accepted_first_time() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = crate::integration::test_utils::open_pipeline(
        &dir,
        single_combination_catalog(),
        producer.clone(),
        test_config(),
    );

    let summary = pipeline
        .run(&RunOptions {
            batch_size: 1,
            variations_per_combo: 4,
            concurrency: 1,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(summary.report.accepted, 4);
    assert_eq!(summary.report.retried, 0);
    assert_eq!(summary.report.low_diversity, 0);
    assert_eq!(producer.calls(), 4);
}
