//! Cooperative cancellation: no new claims, unstarted specs go back to pending untouched.

use coursegen::orchestrator::{CancellationSignal, SpecOutcome};
use coursegen::pipeline::RunOptions;
use coursegen::progress::RunStatus;
use coursegen::resolver::DimensionFilter;
use coursegen::status::GenerationState;
use tempfile::TempDir;

use crate::integration::test_utils::{
    good_candidate, open_pipeline, test_config, tiny_catalog, ScriptedProducer,
};

#[tokio::test]
async fn cancel_before_run_claims_nothing() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());

    pipeline.cancellation().cancel();
    let summary = pipeline
        .run(&RunOptions {
            batch_size: 4,
            variations_per_combo: 2,
            concurrency: 2,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.report.claimed, 0);
    assert_eq!(summary.breakdown.pending, 4);
    assert_eq!(producer.calls(), 0);

    let run_id = summary.run_id.unwrap();
    let record = pipeline.ledger().store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn claimed_spec_is_released_without_consuming_an_attempt() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());
    pipeline.seed(1, &DimensionFilter::default()).unwrap();

    let orchestrator = pipeline.orchestrator(DimensionFilter::default());
    let mut claims = orchestrator.claim_batch(1).unwrap();
    let claim = claims.remove(0);
    let key = claim.key.clone();

    pipeline.cancellation().cancel();
    let outcome = orchestrator.process_spec(claim).await.unwrap();
    assert_eq!(outcome, SpecOutcome::Released);

    let row = pipeline.status_store().get(&key).unwrap().unwrap();
    assert_eq!(row.state, GenerationState::Pending);
    assert_eq!(row.attempts, 0);
    assert!(row.lease.is_none());
    assert_eq!(producer.calls(), 0);
}

#[tokio::test]
async fn in_flight_spec_finishes_after_cancel() {
    let dir = TempDir::new().unwrap();
    let signal = CancellationSignal::new();
    let trigger = signal.clone();
    let producer = ScriptedProducer::new(move |request| {
        trigger.cancel();
        Ok(good_candidate(request.variation_seed))
    });
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());
    pipeline.seed(2, &DimensionFilter::default()).unwrap();

    let orchestrator = pipeline
        .orchestrator(DimensionFilter::default())
        .with_cancellation(signal);
    let report = orchestrator.run_batch(4, 1).await.unwrap();

    assert_eq!(report.claimed, 4);
    assert_eq!(report.accepted, 1, "the spec already at the producer completes");
    assert_eq!(report.released, 3);
    assert_eq!(producer.calls(), 1);

    let breakdown = pipeline.status_breakdown().unwrap();
    assert_eq!(breakdown.completed, 1);
    assert_eq!(breakdown.pending, 3);
    assert_eq!(breakdown.in_progress, 0);

    // Cancelled orchestrators claim nothing further.
    let again = orchestrator.run_batch(4, 1).await.unwrap();
    assert_eq!(again.claimed, 0);
}
