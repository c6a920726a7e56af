//! coursegen CLI Binary
//!
//! Command-line interface for the curriculum content generation pipeline.

use anyhow::Context;
use clap::Parser;
use coursegen::cli::{map_error, Cli, RunContext, EXIT_FATAL};
use coursegen::config::ConfigLoader;
use coursegen::error::PipelineError;
use coursegen::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Build logging config from CLI args, env vars, and config file
    let logging_config = build_logging_config(&cli);

    // Initialize logging early
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(EXIT_FATAL);
    }

    info!("coursegen CLI starting");

    match run(&cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline_error) => eprintln!("{}", map_error(pipeline_error)),
                None => eprintln!("{:#}", e),
            }
            process::exit(EXIT_FATAL);
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .context("Failed to initialize workspace")?;
    info!("CLI context initialized");

    // Ctrl-C stops claiming new work; in-flight specs finish or time out.
    let cancel = context.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight specs");
            cancel.cancel();
        }
    });

    let output = context.execute(&cli.command).await?;
    info!(exit_code = output.exit_code, "Command completed");
    println!("{}", output.text);
    Ok(output.exit_code)
}

/// Build logging configuration from CLI args, environment, and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    if cli.quiet {
        config.enabled = false;
    }
    if cli.verbose {
        config.level = "debug".to_string();
        if config.output == "file" {
            config.output = "file+stderr".to_string();
        }
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }
    if config.file.is_relative() {
        config.file = cli.workspace.join(&config.file);
    }

    config
}
