//! Engine configuration loader for Rampart.
//!
//! Reads `config.toml` and deserializes it into [`EngineConfig`]. The lenient
//! loader falls back to defaults when the file is missing or malformed; the
//! strict loader reports why.

use std::path::{Path, PathBuf};

use rampart_core::RetryPolicy;
use rampart_core::error::PolicyError;
use rampart_types::config::EngineConfig;
use thiserror::Error;

/// File name looked up inside a Rampart home directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid retry settings in {}: {source}", .path.display())]
    InvalidRetry {
        path: PathBuf,
        #[source]
        source: PolicyError,
    },
}

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file cannot be read or parsed, logs a warning and returns the default.
/// - Otherwise returns the parsed config, even if its retry section is out of
///   range; building a `RetryPolicy` from it reports that separately.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Load and validate engine configuration. A missing file is still the
/// default configuration; every other problem is an error.
pub async fn load_engine_config_strict(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let config: EngineConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    RetryPolicy::from_config(&config.retry).map_err(|source| ConfigError::InvalidRetry {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Resolve the config file path from environment or platform defaults.
///
/// Priority:
/// 1. `RAMPART_CONFIG` environment variable (path to the file itself)
/// 2. `RAMPART_HOME` environment variable + `config.toml`
/// 3. `~/.rampart/config.toml`
/// 4. `.rampart/config.toml` in the current directory
pub fn resolve_config_path() -> PathBuf {
    config_path_from(
        std::env::var_os("RAMPART_CONFIG").map(PathBuf::from),
        std::env::var_os("RAMPART_HOME").map(PathBuf::from),
        dirs::home_dir(),
    )
}

fn config_path_from(
    explicit: Option<PathBuf>,
    rampart_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Some(dir) = rampart_home {
        return dir.join(CONFIG_FILE_NAME);
    }
    if let Some(home) = home {
        return home.join(".rampart").join(CONFIG_FILE_NAME);
    }
    PathBuf::from(".rampart").join(CONFIG_FILE_NAME)
}
