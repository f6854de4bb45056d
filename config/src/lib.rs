//! `~/.tricode/config.toml` loading and the on-disk locations Tricode uses.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tricode_tools::config::ToolsConfig;

const APP_DIR: &str = ".tricode";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TricodeConfig {
    /// `[tools.*]` sections.
    pub tools: Option<ToolsConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

impl TricodeConfig {
    /// Load the user config. `Ok(None)` when there is no home directory or no
    /// config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Tool settings, with defaults for anything not configured.
    #[must_use]
    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }
}

fn app_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DIR))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join("config.toml"))
}

/// Where per-conversation plan state is kept.
#[must_use]
pub fn state_dir() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join("sessions"))
}

#[must_use]
pub fn log_dir() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join("logs"))
}
