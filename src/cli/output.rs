//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::PipelineError;

/// Exit code for run-level failures (bad config, unreadable catalog, store errors).
pub const EXIT_FATAL: i32 = 1;

/// Map pipeline errors to a message for CLI output, with a hint where one helps.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::Config(_) => format!(
            "{}\n\nCheck config/config.toml or the COURSEGEN__* environment variables.",
            e
        ),
        PipelineError::Catalog(_) => format!("{}\n\nRun 'coursegen catalog' to inspect the loaded catalog.", e),
        PipelineError::NotFound(_) => format!("{}\n\nUse 'coursegen preview' to list spec keys.", e),
        _ => e.to_string(),
    }
}
