use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::blockchain::DEFAULT_DIFFICULTY;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the block store
    pub data_dir: PathBuf,

    /// Proof-of-work difficulty
    ///
    /// Used when creating a ledger (`DEFAULT_DIFFICULTY` if unset). When set,
    /// an existing ledger must have been created at this difficulty.
    pub difficulty: Option<u32>,

    /// Memo carried by the genesis coinbase input
    pub genesis_memo: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tmp/blocks"),
            difficulty: None,
            genesis_memo: "First Transaction from Genesis".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, or defaults when `path` is `None`
    ///
    /// Fields missing from the file take their default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides on top of the loaded values
    pub fn with_overrides(
        mut self,
        data_dir: Option<PathBuf>,
        difficulty: Option<u32>,
    ) -> Result<Self, ConfigError> {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        if let Some(difficulty) = difficulty {
            self.difficulty = Some(difficulty);
        }

        self.validate()?;
        Ok(self)
    }

    /// Difficulty a new ledger is created at
    pub fn creation_difficulty(&self) -> u32 {
        self.difficulty.unwrap_or(DEFAULT_DIFFICULTY)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(difficulty) = self.difficulty {
            if difficulty == 0 || difficulty > 255 {
                return Err(ConfigError::Invalid(format!(
                    "difficulty must be between 1 and 255, got {}",
                    difficulty
                )));
            }
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
