use std::path::{Path, PathBuf};

use oemwatch_common::config::{load_oem_configs, load_system_config, LlmRouterConfig, OemConfig, SystemConfig};

use super::validation;

/// Complete engine configuration loaded from the config directory (§10.1):
/// `system.toml`, one `OemConfig` per file under `oems/`, and `llm.toml`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub system: SystemConfig,
    pub oems: Vec<OemConfig>,
    pub llm: LlmRouterConfig,
    #[allow(dead_code)]
    pub config_dir: PathBuf,
}

/// Load all configuration from the given config directory.
///
/// Fails loudly with clear error messages if anything is misconfigured.
/// The Engine refuses to start on validation failure (§10.1, §6 CLI/trigger
/// surface: non-zero exit reserved for unrecoverable startup errors).
pub fn load_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    let system = load_system_config(Some(&config_dir.join("system.toml")))
        .map_err(|e| ConfigError::Parse {
            path: config_dir.join("system.toml"),
            detail: e.to_string(),
        })?;

    let oems_dir = config_dir.join("oems");
    let oems = load_oem_configs(&oems_dir).map_err(|e| ConfigError::Parse {
        path: oems_dir,
        detail: e.to_string(),
    })?;

    let llm = load_llm_config(&config_dir.join("llm.toml"))?;

    let config = EngineConfig {
        system,
        oems,
        llm,
        config_dir: config_dir.to_path_buf(),
    };

    validation::validate(&config)?;

    tracing::info!(
        oems = config.oems.len(),
        llm_tasks = config.llm.tasks.len(),
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn load_llm_config(path: &Path) -> Result<LlmRouterConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for oemwatch_common::OemWatchError {
    fn from(e: ConfigError) -> Self {
        oemwatch_common::OemWatchError::Config(e.to_string())
    }
}
