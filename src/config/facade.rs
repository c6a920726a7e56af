//! Public loader: assembles the layered sources into a `CoursegenConfig`.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::CoursegenConfig;
use config::{ConfigError, Environment, File};
use std::path::{Path, PathBuf};

/// Loads configuration from defaults, config files and environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the layered configuration for a workspace.
    ///
    /// Order (later wins): defaults, user-level file, `config/config.toml`,
    /// `config/{COURSEGEN_ENV}.toml`, `COURSEGEN__SECTION__KEY` environment variables.
    pub fn load(workspace_root: &Path) -> Result<CoursegenConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            Environment::with_prefix("COURSEGEN")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: CoursegenConfig = builder.build()?.try_deserialize()?;
        if config.workspace_root.is_none() {
            config.workspace_root = Some(workspace_root.to_path_buf());
        }
        Ok(config)
    }

    /// Load a single explicit config file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<CoursegenConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        builder
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Location of the user-level config file, if one can be determined.
    pub fn xdg_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
