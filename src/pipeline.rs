//! Pipeline service: the trigger surface over catalog, stores and orchestrator.
//!
//! Opens the sled database, seeds status rows from the catalog and loops
//! orchestrator batches until nothing is claimable, the run is cancelled or
//! the batch limit is reached.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{CoursegenConfig, PipelineConfig};
use crate::content::{ContentStore, SledContentStore};
use crate::error::{PipelineError, StorageError};
use crate::judge::{ContentJudge, JudgeStage, OpenAiJudge};
use crate::orchestrator::{BatchReport, CancellationSignal, Orchestrator, OrchestratorSettings};
use crate::producer::{ContentProducer, OpenAiProducer};
use crate::progress::{BatchEventData, RunLedger, RunStatus, SeedEventData};
use crate::resolver::{self, DimensionFilter, SpecKey};
use crate::schema::SchemaRegistry;
use crate::status::{GenerationState, GenerationStatus, StatusBreakdown, StatusStore};
use crate::validator::ContentValidator;

/// Options for one `run` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: usize,
    pub variations_per_combo: u32,
    pub concurrency: usize,
    pub filter: DimensionFilter,
    /// Stop after this many batches even if work remains
    pub max_batches: Option<usize>,
    /// Resolve and count specs only; no seeding, no producer calls
    pub dry_run: bool,
}

impl RunOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            variations_per_combo: config.variations_per_combo,
            concurrency: config.concurrency,
            filter: DimensionFilter::default(),
            max_batches: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub combinations: usize,
    pub specs: usize,
    pub inserted: usize,
    pub existing: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Option<String>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub seed: SeedSummary,
    pub batches: usize,
    /// Totals over every batch of this run
    pub report: BatchReport,
    /// Status store counts when the run ended
    pub breakdown: StatusBreakdown,
    pub duration_ms: u64,
}

impl RunSummary {
    /// 0 when nothing is failed, 2 when any spec sits in `failed`.
    pub fn exit_code(&self) -> i32 {
        if self.breakdown.failed > 0 || self.report.failed > 0 {
            2
        } else {
            0
        }
    }
}

pub struct Pipeline {
    catalog: Arc<Catalog>,
    schemas: Arc<SchemaRegistry>,
    status: Arc<StatusStore>,
    content: Arc<dyn ContentStore>,
    producer: Arc<dyn ContentProducer>,
    judge: Option<JudgeStage>,
    ledger: RunLedger,
    config: PipelineConfig,
    cancel: CancellationSignal,
    owner: String,
}

impl Pipeline {
    /// Build the full pipeline from loaded configuration.
    pub fn open(config: &CoursegenConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(|errors| {
            PipelineError::Config(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let catalog = match config.catalog_path() {
            Some(path) => Catalog::load(&path)?,
            None => Catalog::builtin(),
        };
        let schemas = match config.schemas_path() {
            Some(path) => SchemaRegistry::load(&path)?,
            None => SchemaRegistry::builtin(),
        };
        let db = open_db(&config.store_path())?;
        let producer = OpenAiProducer::new(config.producer.clone(), config.pipeline.producer_timeout())?;

        info!(
            store = %config.store_path().display(),
            model = %config.producer.model,
            judge = config.judge.enabled,
            schemas_version = schemas.version(),
            "Pipeline opened"
        );
        let pipeline = Self::new(catalog, schemas, db, Arc::new(producer), config.pipeline.clone())?;
        if !config.judge.enabled {
            return Ok(pipeline);
        }
        let judge = OpenAiJudge::new(
            &config.producer,
            &config.judge,
            config.pipeline.producer_timeout(),
        )?;
        Ok(pipeline.with_judge(Arc::new(judge), config.judge.threshold))
    }

    /// Pipeline over an already opened database, with the sled content store.
    pub fn new(
        catalog: Catalog,
        schemas: SchemaRegistry,
        db: sled::Db,
        producer: Arc<dyn ContentProducer>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let content: Arc<dyn ContentStore> = SledContentStore::shared(&db)?;
        let ledger = RunLedger::new(db.clone())?;
        let interrupted = ledger.mark_interrupted_runs()?;
        if interrupted > 0 {
            warn!(runs = interrupted, "Previous runs ended without finishing; marked interrupted");
        }
        Ok(Self {
            catalog: Arc::new(catalog),
            schemas: Arc::new(schemas),
            status: StatusStore::shared(db)?,
            content,
            producer,
            judge: None,
            ledger,
            config,
            cancel: CancellationSignal::new(),
            owner: format!("worker-{}", std::process::id()),
        })
    }

    /// Replace the content store, e.g. with an external one.
    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = content;
        self
    }

    /// Review candidates the validator accepts with `judge`; scores under
    /// `threshold` retry the attempt. The judge call shares the producer timeout.
    pub fn with_judge(mut self, judge: Arc<dyn ContentJudge>, threshold: f64) -> Self {
        self.judge = Some(
            JudgeStage::new(judge, threshold).with_timeout(self.config.producer_timeout()),
        );
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Handle to cancel a running `run` from another task.
    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Insert status rows for every spec of the (filtered) catalog. Existing rows are kept.
    pub fn seed(
        &self,
        variations_per_combo: u32,
        filter: &DimensionFilter,
    ) -> Result<SeedSummary, PipelineError> {
        let combinations = resolver::expand_filtered(&self.catalog, filter)?;
        for combination in &combinations {
            if !self.schemas.contains(&combination.exercise_type.code) {
                warn!(
                    exercise_type = %combination.exercise_type.code,
                    "No schema registered; specs will fail with unknown_schema"
                );
                break;
            }
        }
        let specs = resolver::to_specs(&combinations, variations_per_combo);
        let report = self.status.seed(&specs)?;
        self.status.flush()?;
        info!(
            combinations = combinations.len(),
            specs = specs.len(),
            inserted = report.inserted,
            existing = report.existing,
            "Status store seeded"
        );
        Ok(SeedSummary {
            combinations: combinations.len(),
            specs: specs.len(),
            inserted: report.inserted,
            existing: report.existing,
        })
    }

    /// Seed, then process batches until drained, cancelled or `max_batches` is hit.
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        if options.dry_run {
            return self.dry_run(options, started);
        }

        let run_id = self.ledger.start_run("run")?;
        info!(run_id = %run_id, batch_size = options.batch_size, concurrency = options.concurrency, "Run started");
        match self.run_batches(&run_id, options, started).await {
            Ok(summary) => {
                let status = if summary.cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
                let value = serde_json::to_value(&summary).ok();
                self.ledger.finish_run(&run_id, status, value, None)?;
                info!(
                    run_id = %run_id,
                    accepted = summary.report.accepted,
                    failed = summary.report.failed,
                    batches = summary.batches,
                    duration_ms = summary.duration_ms,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(err) => {
                if let Err(ledger_err) =
                    self.ledger
                        .finish_run(&run_id, RunStatus::Failed, None, Some(err.to_string()))
                {
                    warn!(run_id = %run_id, error = %ledger_err, "Failed to close run record");
                }
                Err(err)
            }
        }
    }

    async fn run_batches(
        &self,
        run_id: &str,
        options: &RunOptions,
        started: Instant,
    ) -> Result<RunSummary, PipelineError> {
        let seed = self.seed(options.variations_per_combo, &options.filter)?;
        self.ledger.record_event_best_effort(
            run_id,
            "seeded",
            &SeedEventData {
                combinations: seed.combinations,
                inserted: seed.inserted,
                existing: seed.existing,
            },
        );

        let orchestrator = self.orchestrator(options.filter.clone());
        let mut summary = RunSummary {
            run_id: Some(run_id.to_string()),
            seed,
            ..RunSummary::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                info!(run_id = %run_id, "Cancellation requested, stopping run");
                summary.cancelled = true;
                break;
            }
            if options.max_batches.is_some_and(|max| summary.batches >= max) {
                info!(run_id = %run_id, batches = summary.batches, "Batch limit reached");
                break;
            }

            let batch_started = Instant::now();
            let report = orchestrator
                .run_batch(options.batch_size.max(1), options.concurrency.max(1))
                .await?;
            if report.claimed == 0 {
                break;
            }
            summary.batches += 1;
            summary.report.merge(&report);
            self.ledger.record_event_best_effort(
                run_id,
                "batch_finished",
                &BatchEventData {
                    batch: summary.batches,
                    report,
                    duration_ms: Some(batch_started.elapsed().as_millis() as u64),
                },
            );

            if report.accepted + report.retried + report.failed == 0 {
                if report.released > 0 {
                    summary.cancelled = self.cancel.is_cancelled();
                }
                warn!(
                    run_id = %run_id,
                    rolled_back = report.rolled_back,
                    released = report.released,
                    lease_lost = report.lease_lost,
                    "Batch made no progress, stopping run"
                );
                break;
            }
        }

        self.status.flush()?;
        summary.breakdown = orchestrator.status_breakdown()?;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    fn dry_run(&self, options: &RunOptions, started: Instant) -> Result<RunSummary, PipelineError> {
        let combinations = resolver::expand_filtered(&self.catalog, &options.filter)?;
        let specs = combinations.len() * options.variations_per_combo as usize;
        info!(combinations = combinations.len(), specs, "Dry run resolved specs");
        Ok(RunSummary {
            run_id: None,
            dry_run: true,
            seed: SeedSummary {
                combinations: combinations.len(),
                specs,
                ..SeedSummary::default()
            },
            breakdown: self.status_breakdown()?,
            duration_ms: started.elapsed().as_millis() as u64,
            ..RunSummary::default()
        })
    }

    pub fn orchestrator(&self, filter: DimensionFilter) -> Orchestrator {
        Orchestrator::new(
            self.status.clone(),
            self.content.clone(),
            self.producer.clone(),
            self.schemas.clone(),
            ContentValidator::new(self.config.similarity_threshold),
            OrchestratorSettings::from(&self.config),
            self.owner.clone(),
        )
        .with_filter(Some(filter))
        .with_judge(self.judge.clone())
        .with_cancellation(self.cancel.clone())
    }

    pub fn pending_count(&self) -> Result<usize, PipelineError> {
        self.status.pending_count()
    }

    pub fn status_breakdown(&self) -> Result<StatusBreakdown, PipelineError> {
        self.status.breakdown(self.config.max_attempts)
    }

    pub fn preview(
        &self,
        limit: usize,
        filter: &DimensionFilter,
    ) -> Result<Vec<GenerationStatus>, PipelineError> {
        let filter = (!filter.is_empty()).then_some(filter);
        self.status.preview(limit, filter)
    }

    pub fn list(
        &self,
        state: Option<GenerationState>,
        filter: &DimensionFilter,
    ) -> Result<Vec<GenerationStatus>, PipelineError> {
        let filter = (!filter.is_empty()).then_some(filter);
        self.status.list(state, filter)
    }

    /// Reset one spec to pending. Completed specs need `force`, and their stored
    /// record is dropped first so the next run generates fresh content.
    pub async fn reset(&self, key: &SpecKey, force: bool) -> Result<GenerationStatus, PipelineError> {
        let current = self
            .status
            .get(key)?
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;
        if force && current.state == GenerationState::Completed {
            let removed = self.content.remove(key).await?;
            info!(spec_key = %key, removed, "Dropped stored content for forced reset");
        }
        let status = self.status.reset(key, force)?;
        self.status.flush()?;
        Ok(status)
    }

    pub fn reset_failed(&self, filter: &DimensionFilter) -> Result<usize, PipelineError> {
        let filter = (!filter.is_empty()).then_some(filter);
        let count = self.status.reset_failed(filter)?;
        self.status.flush()?;
        Ok(count)
    }
}

/// Open (and create) the sled database directory.
pub fn open_db(path: &Path) -> Result<sled::Db, PipelineError> {
    std::fs::create_dir_all(path).map_err(StorageError::IoError)?;
    let db = sled::Config::new()
        .path(path)
        .flush_every_ms(Some(FLUSH_EVERY.as_millis() as u64))
        .open()
        .map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
    Ok(db)
}

const FLUSH_EVERY: Duration = Duration::from_millis(500);
