//! Lowest layer: defaults taken from the typed config so files may set any subset.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

use crate::config::{JudgeConfig, PipelineConfig, ProducerConfig, StorageConfig};

pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let pipeline = PipelineConfig::default();
    let producer = ProducerConfig::default();
    let storage = StorageConfig::default();
    let judge = JudgeConfig::default();

    Config::builder()
        .set_default(
            "system.storage.store_path",
            storage.store_path.to_string_lossy().into_owned(),
        )?
        .set_default("pipeline.batch_size", pipeline.batch_size as u64)?
        .set_default("pipeline.concurrency", pipeline.concurrency as u64)?
        .set_default(
            "pipeline.variations_per_combo",
            pipeline.variations_per_combo as u64,
        )?
        .set_default("pipeline.max_attempts", pipeline.max_attempts as u64)?
        .set_default("pipeline.lease_ms", pipeline.lease_ms)?
        .set_default("producer.endpoint", producer.endpoint)?
        .set_default("producer.model", producer.model)?
        .set_default("judge.enabled", judge.enabled)?
        .set_default("judge.threshold", judge.threshold)?
        .set_default("logging.level", "info")
}
