//! Judge stage: passing scores become the stored quality score, low scores and
//! judge failures retry the attempt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coursegen::content::{ContentStore, SledContentStore};
use coursegen::error::ProducerError;
use coursegen::judge::{ContentJudge, JudgeRequest, Judgement};
use coursegen::pipeline::{Pipeline, RunOptions};
use coursegen::resolver::expand;
use coursegen::schema::SchemaRegistry;
use coursegen::status::{FailureReason, GenerationState};
use tempfile::TempDir;

use crate::integration::test_utils::{
    good_candidate, single_combination_catalog, test_config, ScriptedProducer,
};

type Respond = dyn Fn(&JudgeRequest<'_>) -> Result<Judgement, ProducerError> + Send + Sync;

struct ScriptedJudge {
    respond: Box<Respond>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&JudgeRequest<'_>) -> Result<Judgement, ProducerError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentJudge for ScriptedJudge {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Judgement, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(request)
    }

    fn name(&self) -> &str {
        "scripted-judge"
    }
}

fn options() -> RunOptions {
    RunOptions {
        batch_size: 10,
        variations_per_combo: 2,
        concurrency: 2,
        ..RunOptions::default()
    }
}

fn judged_pipeline(
    dir: &TempDir,
    producer: Arc<ScriptedProducer>,
    judge: Arc<ScriptedJudge>,
) -> (Pipeline, sled::Db) {
    let db = sled::open(dir.path().join("store")).unwrap();
    let pipeline = Pipeline::new(
        single_combination_catalog(),
        SchemaRegistry::builtin(),
        db.clone(),
        producer,
        test_config(),
    )
    .unwrap()
    .with_owner("test-worker")
    .with_judge(judge, 0.5);
    (pipeline, db)
}

#[tokio::test]
async fn passing_judge_score_is_stored_as_quality_score() {
    let dir = TempDir::new().unwrap();
    let judge = ScriptedJudge::new(|_| Ok(Judgement::new(0.92, "clear and correct")));
    let (pipeline, db) = judged_pipeline(&dir, ScriptedProducer::always_good(), judge.clone());

    let summary = pipeline.run(&options()).await.unwrap();
    assert_eq!(summary.report.accepted, 2);
    assert_eq!(summary.report.retried, 0);
    assert_eq!(judge.calls(), 2);

    let content = SledContentStore::new(&db).unwrap();
    let combination = expand(&single_combination_catalog()).unwrap().remove(0);
    let stored = content.accepted_for(&combination.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|record| record.quality_score == 0.92));
}

#[tokio::test]
async fn low_score_retries_with_fresh_content() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let judge = ScriptedJudge::new(|request| {
        if request.attempt == 1 {
            Ok(Judgement::new(0.2, "topic mismatch"))
        } else {
            Ok(Judgement::new(0.75, "good"))
        }
    });
    let (pipeline, db) = judged_pipeline(&dir, producer.clone(), judge.clone());

    let summary = pipeline.run(&options()).await.unwrap();
    assert_eq!(summary.report.retried, 2);
    assert_eq!(summary.report.accepted, 2);
    assert_eq!(summary.breakdown.completed, 2);
    assert_eq!(producer.calls(), 4);
    assert_eq!(judge.calls(), 4);

    let seeds: Vec<u64> = producer.requests().iter().map(|(_, _, seed)| *seed).collect();
    assert!(seeds.contains(&1000) && seeds.contains(&1001), "retries use a new seed");

    let content = SledContentStore::new(&db).unwrap();
    for row in pipeline.list(None, &Default::default()).unwrap() {
        assert_eq!(row.state, GenerationState::Completed);
        assert_eq!(row.attempts, 2);
        let record = content.get(&row.key).await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.quality_score, 0.75);
    }
}

#[tokio::test]
async fn judge_below_threshold_on_every_attempt_fails_with_quality_violation() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::always_good();
    let judge = ScriptedJudge::new(|_| Ok(Judgement::new(0.1, "not in the target language")));
    let (pipeline, _db) = judged_pipeline(&dir, producer.clone(), judge.clone());

    let summary = pipeline.run(&options()).await.unwrap();
    assert_eq!(summary.report.failed, 2);
    assert_eq!(summary.report.accepted, 0);
    assert_eq!(judge.calls(), 6, "two specs, three attempts each");
    assert_eq!(
        summary.breakdown.failures_by_reason.get("quality_violation"),
        Some(&2)
    );
    assert_eq!(summary.exit_code(), 2);

    for row in pipeline.list(None, &Default::default()).unwrap() {
        assert_eq!(row.state, GenerationState::Failed);
        assert_eq!(row.failure_reason, Some(FailureReason::QualityViolation));
        assert!(row
            .last_error
            .as_deref()
            .unwrap()
            .contains("not in the target language"));
    }
}

#[tokio::test]
async fn judge_errors_retry_and_heuristic_failures_skip_the_judge() {
    let dir = TempDir::new().unwrap();
    let producer = ScriptedProducer::new(|request| {
        let mut candidate = good_candidate(request.variation_seed);
        if request.spec.variation == 1 {
            candidate.fields.remove("theory");
        }
        Ok(candidate)
    });
    let judge = ScriptedJudge::new(|request| {
        if request.attempt == 1 {
            Err(ProducerError::Service("HTTP 503".to_string()))
        } else {
            Ok(Judgement::new(0.8, "fine"))
        }
    });
    let (pipeline, _db) = judged_pipeline(&dir, producer.clone(), judge.clone());

    let summary = pipeline.run(&options()).await.unwrap();

    // Variation 0: judge error, then accepted. Variation 1: schema violations only.
    assert_eq!(judge.calls(), 2);
    assert_eq!(summary.report.accepted, 1);
    assert_eq!(summary.report.failed, 1);
    assert_eq!(
        summary.breakdown.failures_by_reason.get("schema_violation"),
        Some(&1)
    );
}
