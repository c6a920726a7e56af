//! CLI parse: clap types for coursegen. No behavior; definitions only.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::resolver::DimensionFilter;

/// coursegen - curriculum content generation pipeline
#[derive(Parser, Debug)]
#[command(name = "coursegen")]
#[command(about = "Generate, validate and track language-course content across the curriculum matrix")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, short = 'q', default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Restrict a command to one slice of the matrix.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Language pair code (e.g. LANG_001)
    #[arg(long)]
    pub language_pair: Option<String>,
    /// Proficiency level code (e.g. LEVEL_B1)
    #[arg(long)]
    pub level: Option<String>,
    /// Content category code (e.g. CAT_GRAMMAR)
    #[arg(long)]
    pub category: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> DimensionFilter {
        DimensionFilter {
            language_pair: self.language_pair.clone(),
            level: self.level.clone(),
            category: self.category.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create pending status rows for every combination and variation
    Seed {
        /// Variations per combination (default from config)
        #[arg(long)]
        variations: Option<u32>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Seed, then generate and validate content until drained or interrupted
    Run {
        /// Specs claimed per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Variations per combination
        #[arg(long)]
        variations: Option<u32>,
        /// Specs processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<usize>,
        #[command(flatten)]
        filter: FilterArgs,
        /// Resolve and count specs without seeding or calling the producer
        #[arg(long)]
        dry_run: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show counts per state, reclaimable leases and failures by reason
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the number of pending specs
    Pending,
    /// Show the next specs in claim order without claiming them
    Preview {
        /// Number of specs to show
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,
        #[command(flatten)]
        filter: FilterArgs,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Reset a spec, or every failed spec, back to pending
    Reset {
        /// Spec key (<combination_id>#<variation>)
        key: Option<String>,
        /// Reset every failed spec (optionally filtered)
        #[arg(long, conflicts_with = "key")]
        failed: bool,
        /// Allow resetting completed specs; skip confirmation
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// List registered content schemas
    Schemas {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show catalog dimensions and the number of resolved combinations
    Catalog {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List recent runs from the run ledger
    Runs {
        /// Number of runs to show
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,
    },
}

/// Stable dotted name used for run records and logs.
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Seed { .. } => "seed",
        Commands::Run { .. } => "run",
        Commands::Status { .. } => "status",
        Commands::Pending => "pending",
        Commands::Preview { .. } => "preview",
        Commands::Reset { .. } => "reset",
        Commands::Schemas { .. } => "schemas",
        Commands::Catalog { .. } => "catalog",
        Commands::Runs { .. } => "runs",
    }
}
