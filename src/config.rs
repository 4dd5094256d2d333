//! TOML configuration shared by the library and the `roadstore` binary.
//!
//! ```toml
//! [archive]
//! sync_on_save = true
//!
//! [cache]
//! soften_to = "discardable"
//! watermark = { kind = "strong_count", max = 64 }
//!
//! [staging]
//! cell_degrees = 0.5
//! max_open_cells = 128
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{TrackerOptions, Watermark};
use crate::staging::StagingOptions;
use crate::storage::archive::ArchiveOptions;

/// Errors raised while loading or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`StoreConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// Serialization failed.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// Writing the file failed.
    #[error("failed to write config {path}: {source}")]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A value is out of range.
    #[error("invalid [{section}] setting: {reason}")]
    Invalid {
        /// TOML table holding the value.
        section: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Settings for every configurable component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Archive reads and writes.
    pub archive: ArchiveOptions,
    /// Reference tracker.
    pub cache: TrackerOptions,
    /// Ingestion staging.
    pub staging: StagingOptions,
}

impl StoreConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Loads `explicit` if given, else the default path if one exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parses and validates TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Platform config location, e.g. `~/.config/roadstore/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join("roadstore").join("config.toml"))
    }

    /// Rejects settings no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.staging.validate().map_err(|err| ConfigError::Invalid {
            section: "staging",
            reason: err.to_string(),
        })?;
        if self.cache.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                section: "cache",
                reason: "retry.max_attempts must be at least 1".into(),
            });
        }
        if let Watermark::StrongCount { max: 0 } = self.cache.watermark {
            return Err(ConfigError::Invalid {
                section: "cache",
                reason: "strong_count watermark must allow at least one reference".into(),
            });
        }
        Ok(())
    }

    /// Writes the configuration as pretty TOML, creating parent directories.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
