//! Configuration system for Mayo.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! explicit config files -> environment -> CLI overrides. Config files may be
//! YAML or TOML, chosen by extension.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MayoError;
use crate::session::CheckpointKey;

/// Top-level configuration for a Mayo session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MayoConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

/// How the execution backend schedules batch work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Fetch each batch when the evaluator asks for it.
    #[default]
    Sequential,
    /// Let the backend prefetch batches ahead of the evaluator.
    Concurrent,
}

/// System-level settings shared by all sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Number of examples per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Backend scheduling mode.
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            execution: ExecutionMode::default(),
            log: LogConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    64
}

/// Progress logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Effective window, in samples, of the throughput moving average.
    #[serde(default = "default_metrics_history_count")]
    pub metrics_history_count: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            metrics_history_count: default_metrics_history_count(),
        }
    }
}

fn default_metrics_history_count() -> usize {
    100
}

/// Checkpoint selection and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint evaluated when none is given explicitly.
    #[serde(default)]
    pub load: CheckpointKey,
    /// Directory holding the checkpoint manifest.
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            load: CheckpointKey::default(),
            directory: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

/// Dataset description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub num_examples_per_epoch: ExamplesPerEpoch,
}

/// Example counts per dataset split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamplesPerEpoch {
    #[serde(default = "default_validate_examples")]
    pub validate: usize,
}

impl Default for ExamplesPerEpoch {
    fn default() -> Self {
        Self {
            validate: default_validate_examples(),
        }
    }
}

fn default_validate_examples() -> usize {
    50_000
}

impl MayoConfig {
    /// Reject settings the evaluator cannot run with.
    pub fn validate(&self) -> Result<(), MayoError> {
        if self.system.batch_size == 0 {
            return Err(MayoError::config("system.batch_size must be at least 1"));
        }
        if self.system.log.metrics_history_count == 0 {
            return Err(MayoError::config(
                "system.log.metrics_history_count must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Individual settings that take precedence over every config source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub batch_size: Option<usize>,
    pub checkpoint: Option<CheckpointKey>,
    pub checkpoint_dir: Option<PathBuf>,
    pub execution: Option<ExecutionMode>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `MAYO_`, nested with `__`)
/// 3. Config files passed in `files`, later files winning
/// 4. User config (`~/.config/mayo/config.{yaml,toml}`)
/// 5. Built-in defaults
pub fn load_config(
    files: &[PathBuf],
    overrides: &ConfigOverrides,
) -> Result<MayoConfig, MayoError> {
    let mut figment = Figment::from(Serialized::defaults(MayoConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("org", "mayo", "mayo") {
        for name in ["config.yaml", "config.toml"] {
            let user_config = dirs.config_dir().join(name);
            if user_config.exists() {
                figment = merge_file(figment, &user_config);
            }
        }
    }

    for file in files {
        if !file.exists() {
            return Err(MayoError::not_found(format!(
                "config file {}",
                file.display()
            )));
        }
        figment = merge_file(figment, file);
    }

    // MAYO_SYSTEM__BATCH_SIZE, MAYO_DATASET__NUM_EXAMPLES_PER_EPOCH__VALIDATE, ...
    figment = figment.merge(Env::prefixed("MAYO_").split("__"));

    if let Some(batch_size) = overrides.batch_size {
        figment = figment.merge(Serialized::default("system.batch_size", batch_size));
    }
    if let Some(key) = &overrides.checkpoint {
        figment = figment.merge(Serialized::default("system.checkpoint.load", key));
    }
    if let Some(dir) = &overrides.checkpoint_dir {
        figment = figment.merge(Serialized::default("system.checkpoint.directory", dir));
    }
    if let Some(mode) = overrides.execution {
        figment = figment.merge(Serialized::default("system.execution", mode));
    }

    let config: MayoConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => figment.merge(Toml::file(path)),
        _ => figment.merge(Yaml::file(path)),
    }
}
