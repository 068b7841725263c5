//! Configuration loading
//!
//! Layers, lowest priority first: serde defaults, the JSON configuration file, then
//! environment variables prefixed with `INTERCEPTION_PROXY_`. Command line options are
//! applied on top by the binary.

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use log::debug;

use super::defaults;
use super::error::{ConfigError, Result};
use super::types::CoreConfig;

/// Trait for loading configuration
pub trait ConfigLoader {
    /// Load configuration from a file, then apply environment overrides
    ///
    /// # Errors
    ///
    /// Fails when the file does not exist or cannot be parsed.
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self>
    where
        Self: Sized;

    /// Load configuration from a JSON string, without environment overrides
    fn from_json(json: &str) -> Result<Self>
    where
        Self: Sized;

    /// Load configuration from the default locations
    ///
    /// The file named by `INTERCEPTION_PROXY_CONFIG_FILE`, or `config.json`, is used when
    /// it exists; defaults and environment variables apply either way.
    fn auto_load() -> Result<Self>
    where
        Self: Sized;
}

fn environment() -> Environment {
    Environment::with_prefix(defaults::ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl ConfigLoader for CoreConfig {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(true))
            .add_source(environment())
            .build()?
            .try_deserialize::<Self>()?;

        debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn auto_load() -> Result<Self> {
        let path = std::env::var(defaults::CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::DEFAULT_CONFIG_FILE));

        let config = Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Json).required(false))
            .add_source(environment())
            .build()?
            .try_deserialize::<Self>()?;

        if path.exists() {
            debug!("Configuration loaded from {}", path.display());
        } else {
            debug!("Using default configuration with environment variables");
        }
        Ok(config)
    }
}
