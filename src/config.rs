//! Runtime settings, loaded from an optional TOML file.
//!
//! ```toml
//! cache_path       = "PkgCache.json"
//! timeout_secs     = 30
//! trusted_prefixes = ["http://zeus.dl.playstation.net/"]
//! ```
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::DEFAULT_CACHE_FILE;
use crate::fetch::DEFAULT_TIMEOUT;
use crate::pkg::{ReaderConfig, DEFAULT_TRUSTED_PREFIXES, PKG_SUFFIX};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid settings: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache_path:       PathBuf,
    pub trusted_prefixes: Vec<String>,
    pub timeout_secs:     u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_path:       PathBuf::from(DEFAULT_CACHE_FILE),
            trusted_prefixes: DEFAULT_TRUSTED_PREFIXES.iter().map(|p| p.to_string()).collect(),
            timeout_secs:     DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        let settings = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Settings from `path`, or the defaults when no file is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            trusted_prefixes: self.trusted_prefixes.clone(),
            suffix:           PKG_SUFFIX.to_owned(),
        }
    }

    /// Reject values no reader could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if let Some(bad) = self.trusted_prefixes.iter().find(|p| !p.ends_with('/')) {
            return Err(ConfigError::Invalid(format!("trusted prefix {bad:?} must end with '/'")));
        }
        Ok(())
    }
}
