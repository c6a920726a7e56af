//! CLI route: single route table and run context. Dispatches to the pipeline service and presentation.

use std::path::PathBuf;

use tracing::info;

use crate::cli::parse::{command_name, Commands};
use crate::cli::presentation::{
    format_catalog_json, format_catalog_text, format_preview_json, format_preview_text,
    format_reset_result, format_run_summary_json, format_run_summary_text, format_runs_text,
    format_schemas_json, format_schemas_text, format_seed_summary, format_status_json,
    format_status_text,
};
use crate::config::{ConfigLoader, CoursegenConfig};
use crate::error::PipelineError;
use crate::orchestrator::CancellationSignal;
use crate::pipeline::{Pipeline, RunOptions};
use crate::resolver::{self, SpecKey};

/// Rendered command result plus the process exit code it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub exit_code: i32,
}

impl CommandOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: 0,
        }
    }
}

/// Runtime context for CLI execution: loaded configuration and the pipeline service.
pub struct RunContext {
    config: CoursegenConfig,
    pipeline: Pipeline,
}

impl RunContext {
    /// Load configuration (explicit file, or layered from the workspace) and open the pipeline.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let mut config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        if config.workspace_root.is_none() {
            config.workspace_root = Some(workspace_root);
        }
        let pipeline = Pipeline::open(&config)?;
        Ok(Self { config, pipeline })
    }

    pub fn from_parts(config: CoursegenConfig, pipeline: Pipeline) -> Self {
        Self { config, pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.pipeline.cancellation()
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<CommandOutput, PipelineError> {
        info!(command = command_name(command), "Executing command");
        match command {
            Commands::Seed { variations, filter } => {
                let variations = variations.unwrap_or(self.config.pipeline.variations_per_combo);
                let summary = self.pipeline.seed(variations, &filter.to_filter())?;
                Ok(CommandOutput::ok(format_seed_summary(&summary)))
            }
            Commands::Run {
                batch_size,
                variations,
                concurrency,
                max_batches,
                filter,
                dry_run,
                format,
            } => {
                let defaults = RunOptions::from_config(&self.config.pipeline);
                let options = RunOptions {
                    batch_size: batch_size.unwrap_or(defaults.batch_size),
                    variations_per_combo: variations.unwrap_or(defaults.variations_per_combo),
                    concurrency: concurrency.unwrap_or(defaults.concurrency),
                    filter: filter.to_filter(),
                    max_batches: *max_batches,
                    dry_run: *dry_run,
                };
                let summary = self.pipeline.run(&options).await?;
                let text = if format == "json" {
                    format_run_summary_json(&summary)
                } else {
                    format_run_summary_text(&summary)
                };
                Ok(CommandOutput {
                    text,
                    exit_code: summary.exit_code(),
                })
            }
            Commands::Status { format } => {
                let breakdown = self.pipeline.status_breakdown()?;
                Ok(CommandOutput::ok(if format == "json" {
                    format_status_json(&breakdown)
                } else {
                    format_status_text(&breakdown)
                }))
            }
            Commands::Pending => {
                let count = self.pipeline.pending_count()?;
                Ok(CommandOutput::ok(format!("{} pending spec(s)", count)))
            }
            Commands::Preview {
                limit,
                filter,
                format,
            } => {
                let rows = self.pipeline.preview(*limit, &filter.to_filter())?;
                Ok(CommandOutput::ok(if format == "json" {
                    format_preview_json(&rows)
                } else {
                    format_preview_text(&rows)
                }))
            }
            Commands::Reset {
                key,
                failed,
                force,
                filter,
            } => self.handle_reset(key.as_deref(), *failed, *force, filter).await,
            Commands::Schemas { format } => {
                let registry = self.pipeline.schemas();
                Ok(CommandOutput::ok(if format == "json" {
                    format_schemas_json(registry)
                } else {
                    format_schemas_text(registry)
                }))
            }
            Commands::Catalog { filter, format } => {
                let catalog = self.pipeline.catalog();
                let combinations = resolver::expand_filtered(catalog, &filter.to_filter())?.len();
                Ok(CommandOutput::ok(if format == "json" {
                    format_catalog_json(catalog, combinations)
                } else {
                    format_catalog_text(catalog, combinations)
                }))
            }
            Commands::Runs { limit } => {
                let runs = self.pipeline.ledger().recent_runs(*limit)?;
                Ok(CommandOutput::ok(format_runs_text(&runs)))
            }
        }
    }

    async fn handle_reset(
        &self,
        key: Option<&str>,
        failed: bool,
        force: bool,
        filter: &crate::cli::parse::FilterArgs,
    ) -> Result<CommandOutput, PipelineError> {
        if let Some(key) = key {
            let status = self.pipeline.reset(&SpecKey::from(key), force).await?;
            return Ok(CommandOutput::ok(format_reset_result(&status)));
        }
        if !failed {
            return Err(PipelineError::Config(
                "reset needs a spec key or --failed".to_string(),
            ));
        }

        if !force {
            use dialoguer::Confirm;
            let confirmed = Confirm::new()
                .with_prompt("Reset every failed spec back to pending?")
                .interact()
                .map_err(|e| PipelineError::Config(format!("Failed to get user input: {}", e)))?;
            if !confirmed {
                return Ok(CommandOutput::ok("Reset cancelled"));
            }
        }
        let count = self.pipeline.reset_failed(&filter.to_filter())?;
        Ok(CommandOutput::ok(format!("Reset {} failed spec(s) to pending", count)))
    }
}
