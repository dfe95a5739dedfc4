use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::detector::pipeline::{default_workers, DEFAULT_EXCLUSIONS};
use crate::detector::DetectorKind;
use crate::executable::DEFAULT_TIMEOUT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Root configuration structure, deserialized from `.detectr/config.toml`.
/// Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub detectors: DetectorsConfig,
    pub execution: ExecutionConfig,
    /// Executable overrides keyed by tool name, e.g. `pip = "/opt/py/bin/pip"`.
    pub tools: HashMap<String, PathBuf>,
    pub project: ProjectConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// How many directory levels below the root to search. `0` is root only.
    pub depth: usize,
    /// Directory name globs that are never searched.
    pub exclude: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            depth: 0,
            exclude: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    /// When non-empty, only these detectors run.
    pub include: Vec<DetectorKind>,
    pub exclude: Vec<DetectorKind>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per tool invocation, in seconds.
    pub timeout: u64,
    /// Directories evaluated concurrently. Defaults to the host's parallelism.
    pub workers: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT.as_secs(),
            workers: None,
        }
    }
}

impl ExecutionConfig {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers).max(1)
    }
}

/// Overrides for the name code locations are filed under.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where code location files are written.
    pub directory: PathBuf,
    /// Scratch space for tool output. A temporary directory when unset.
    pub run_directory: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("detectr-output"),
            run_directory: None,
        }
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`: path passed via `--config`
/// 2. `<project_path>/.detectr/config.toml`
/// 3. `~/.config/detectr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".detectr").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("detectr").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
