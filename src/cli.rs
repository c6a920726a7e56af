//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to the pipeline service.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{map_error, EXIT_FATAL};
pub use parse::{command_name, Cli, Commands, FilterArgs};
pub use presentation::{
    format_catalog_json, format_catalog_text, format_preview_json, format_preview_text,
    format_run_summary_json, format_run_summary_text, format_status_json, format_status_text,
};
pub use route::{CommandOutput, RunContext};
