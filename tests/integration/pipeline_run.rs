//! End-to-end runs through the pipeline service and the CLI route table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use coursegen::cli::{Cli, RunContext};
use coursegen::config::CoursegenConfig;
use coursegen::content::{AcceptedContent, ContentStore, SledContentStore};
use coursegen::error::PipelineError;
use coursegen::pipeline::{Pipeline, RunOptions};
use coursegen::producer::CandidateContent;
use coursegen::progress::RunStatus;
use coursegen::resolver::{expand, DimensionFilter, SpecKey};
use coursegen::schema::SchemaRegistry;
use coursegen::status::GenerationState;
use coursegen::validator::{ContentValidator, ValidationContext, Verdict};
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

fn command(args: &[&str]) -> coursegen::cli::Commands {
    let mut argv = vec!["coursegen"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap().command
}

fn context(dir: &TempDir, producer: Arc<ScriptedProducer>) -> RunContext {
    let mut config = CoursegenConfig::default();
    config.pipeline = test_config();
    config.workspace_root = Some(dir.path().to_path_buf());
    RunContext::from_parts(config, open_pipeline(dir, tiny_catalog(), producer, test_config()))
}

#[tokio::test]
async fn full_run_completes_every_spec() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = Pipeline::new(
        tiny_catalog(),
        SchemaRegistry::builtin(),
        db.clone(),
        producer.clone(),
        test_config(),
    )
    .unwrap();

    let summary = pipeline.run(&options()).await.unwrap();

    assert_eq!(summary.seed.combinations, 2);
    assert_eq!(summary.seed.specs, 6);
    assert_eq!(summary.seed.inserted, 6);
    assert_eq!(summary.report.claimed, 6);
    assert_eq!(summary.report.accepted, 6);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.breakdown.completed, 6);
    assert_eq!(summary.breakdown.pending, 0);
    assert!((summary.breakdown.completion_rate() - 100.0).abs() < 1e-9);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(producer.calls(), 6);

    let content = SledContentStore::new(&db).unwrap();
    assert_eq!(content.len(), 6);
    let registry = SchemaRegistry::builtin();
    let schema = registry.lookup("EX_FILL").unwrap();
    let validator = ContentValidator::new(test_config().similarity_threshold);
    for combination in expand(&tiny_catalog()).unwrap() {
        let stored = content.accepted_for(&combination.id).await.unwrap();
        assert_eq!(stored.len(), 3);
        for record in &stored {
            assert_eq!(record.exercise_type, "EX_FILL");
            assert_eq!(record.schema_version, schema.version);
            assert_eq!(record.attempts, 1);
            assert!(record.text("exercise_input").unwrap().contains("___"));

            // Stored content must still pass every validator stage against its siblings.
            let row = pipeline.status_store().get(&record.spec_key).unwrap().unwrap();
            let siblings: Vec<AcceptedContent> = stored
                .iter()
                .filter(|other| other.spec_key != record.spec_key)
                .cloned()
                .collect();
            let ctx = ValidationContext {
                attempt: record.attempts,
                max_attempts: test_config().max_attempts,
                repeat_limit: test_config().effective_repeat_limit(),
                previous_signature: None,
                previous_streak: 0,
                accepted: &siblings,
            };
            let candidate = CandidateContent::new(record.fields.clone());
            let result = validator.validate(&candidate, schema, &row.spec, &ctx);
            assert_eq!(
                result.verdict,
                Verdict::Accepted,
                "{}: {:?}",
                record.spec_key,
                result.violations
            );
            assert!(!result.low_diversity);
        }
    }
}

#[tokio::test]
async fn run_is_recorded_in_the_ledger() {
    let dir = TempDir::new().unwrap();
    let pipeline = open_pipeline(
        &dir,
        tiny_catalog(),
        ScriptedProducer::always_good(),
        test_config(),
    );

    let summary = pipeline.run(&options()).await.unwrap();
    let run_id = summary.run_id.clone().unwrap();

    let record = pipeline.ledger().store().get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.command, "run");
    assert!(record.ended_at_ms.is_some());
    assert!(record.summary.is_some());

    let events = pipeline.ledger().store().read_events(&run_id).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["run_started", "seeded", "batch_finished", "batch_finished", "run_ended"]
    );
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    let recent = pipeline.ledger().recent_runs(5).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].run_id, run_id);
}

#[tokio::test]
async fn max_batches_stops_early_and_resumes() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());

    let first = pipeline
        .run(&RunOptions {
            batch_size: 2,
            max_batches: Some(1),
            ..options()
        })
        .await
        .unwrap();
    assert_eq!(first.batches, 1);
    assert_eq!(first.report.accepted, 2);
    assert_eq!(first.breakdown.pending, 4);

    let second = pipeline.run(&options()).await.unwrap();
    assert_eq!(second.report.accepted, 4);
    assert_eq!(second.breakdown.completed, 6);
    assert_eq!(producer.calls(), 6);
}

#[tokio::test]
async fn filtered_run_leaves_other_specs_alone() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let pipeline = open_pipeline(&dir, tiny_catalog(), producer.clone(), test_config());
    pipeline.seed(3, &DimensionFilter::default()).unwrap();

    // LEVEL_C2 exists but is inactive, so nothing resolves under it.
    let inactive = DimensionFilter {
        level: Some("LEVEL_C2".to_string()),
        ..DimensionFilter::default()
    };
    let summary = pipeline
        .run(&RunOptions {
            filter: inactive,
            ..options()
        })
        .await
        .unwrap();
    assert_eq!(summary.seed.combinations, 0);
    assert_eq!(summary.report.claimed, 0);
    assert_eq!(summary.breakdown.pending, 6);
    assert_eq!(producer.calls(), 0);

    let unknown = DimensionFilter {
        level: Some("LEVEL_Z9".to_string()),
        ..DimensionFilter::default()
    };
    let result = pipeline
        .run(&RunOptions {
            filter: unknown,
            ..options()
        })
        .await;
    assert!(matches!(result, Err(PipelineError::Catalog(_))));
}

#[tokio::test]
async fn dry_run_resolves_without_seeding() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let ctx = context(&dir, producer.clone());

    let output = ctx
        .execute(&command(&["run", "--dry-run", "--variations", "5", "--format", "json"]))
        .await
        .unwrap();
    assert_eq!(output.exit_code, 0);
    let value: serde_json::Value = serde_json::from_str(&output.text).unwrap();
    assert_eq!(value["dry_run"], true);
    assert_eq!(value["seed"]["specs"], 10);

    assert_eq!(ctx.pipeline().pending_count().unwrap(), 0);
    assert_eq!(producer.calls(), 0);
}

#[tokio::test]
async fn cli_commands_report_store_state() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, ScriptedProducer::always_good());

    let seeded = ctx
        .execute(&command(&["seed", "--variations", "2"]))
        .await
        .unwrap();
    assert!(seeded.text.contains("4 spec(s): 4 new"));

    let pending = ctx.execute(&command(&["pending"])).await.unwrap();
    assert_eq!(pending.text, "4 pending spec(s)");

    let preview = ctx
        .execute(&command(&["preview", "-n", "2", "--format", "json"]))
        .await
        .unwrap();
    let rows: serde_json::Value = serde_json::from_str(&preview.text).unwrap();
    assert_eq!(rows["specs"].as_array().unwrap().len(), 2);
    assert_eq!(rows["specs"][0]["state"], "pending");
    assert_eq!(ctx.pipeline().pending_count().unwrap(), 4, "preview does not claim");

    let run = ctx
        .execute(&command(&["run", "--variations", "2"]))
        .await
        .unwrap();
    assert_eq!(run.exit_code, 0);

    let status = ctx
        .execute(&command(&["status", "--format", "json"]))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&status.text).unwrap();
    assert_eq!(value["completed"], 4);
    assert_eq!(value["pending"], 0);

    let runs = ctx.execute(&command(&["runs"])).await.unwrap();
    assert!(runs.text.contains("completed"));
}

#[tokio::test]
async fn reset_requires_force_for_completed_specs() {
    let dir = TempDir::new().unwrap();
    let served = Arc::new(AtomicU64::new(0));
    let counter = served.clone();
    let producer = ScriptedProducer::new(move |_| {
        Ok(good_candidate(1_000 + counter.fetch_add(1, Ordering::SeqCst) * 7))
    });
    let ctx = context(&dir, producer.clone());
    ctx.execute(&command(&["run", "--variations", "1"]))
        .await
        .unwrap();
    assert_eq!(producer.calls(), 2);

    let combination = expand(&tiny_catalog()).unwrap().remove(0);
    let key = SpecKey::new(&combination.id, 0);
    let content = SledContentStore::new(ctx.pipeline().status_store().db()).unwrap();
    let before = content.get(&key).await.unwrap().unwrap();

    let refused = ctx.execute(&command(&["reset", key.as_str()])).await;
    assert!(matches!(
        refused,
        Err(PipelineError::InvalidTransition { .. })
    ));
    assert!(content.get(&key).await.unwrap().is_some());

    let forced = ctx
        .execute(&command(&["reset", key.as_str(), "--force"]))
        .await
        .unwrap();
    assert_eq!(forced.exit_code, 0);
    let row = ctx.pipeline().status_store().get(&key).unwrap().unwrap();
    assert_eq!(row.state, GenerationState::Pending);
    assert_eq!(row.attempts, 0);
    assert!(content.get(&key).await.unwrap().is_none());

    let rerun = ctx
        .execute(&command(&["run", "--variations", "1", "--format", "json"]))
        .await
        .unwrap();
    assert_eq!(rerun.exit_code, 0);
    let value: serde_json::Value = serde_json::from_str(&rerun.text).unwrap();
    assert_eq!(value["report"]["accepted"], 1);
    assert_eq!(producer.calls(), 3);
    assert_eq!(producer.requests()[2].0, key);

    let after = content.get(&key).await.unwrap().unwrap();
    assert_ne!(after.text("exercise_input"), before.text("exercise_input"));
    let row = ctx.pipeline().status_store().get(&key).unwrap().unwrap();
    assert_eq!(row.state, GenerationState::Completed);
    assert_eq!(row.attempts, 1);

    let missing = ctx
        .execute(&command(&["reset", "NOPE#0000", "--force"]))
        .await;
    assert!(matches!(missing, Err(PipelineError::NotFound(_))));
}
