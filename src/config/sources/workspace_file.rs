//! Workspace config files: `config/config.toml`, then `config/{profile}.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_PROFILE: &str = "development";

/// Active profile from `COURSEGEN_ENV`; empty values fall back to `development`.
pub fn profile_name() -> String {
    std::env::var("COURSEGEN_ENV")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
}

/// Candidate files in override order. Missing files are skipped by the caller.
pub fn layer_paths(workspace_root: &Path, profile: &str) -> [PathBuf; 2] {
    let config_dir = workspace_root.join("config");
    [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", profile)),
    ]
}

pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let profile = profile_name();
    for path in layer_paths(workspace_root, &profile) {
        if path.exists() {
            debug!(config_path = %path.display(), profile = %profile, "Applying workspace config");
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
    }
    Ok(builder)
}
