//! Configuration management for the CLI
//!
//! Sources, lowest precedence first: built-in defaults, the config file
//! (`--config` or `~/.config/topo/config.toml`), `TOPO_*` environment
//! variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Project used for batches that do not carry one
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Instance name -> application name overrides applied to every batch
    #[serde(default)]
    pub custom_applications: HashMap<String, String>,
}

impl Config {
    /// Load configuration, failing only if an explicit file is unreadable
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().set_default("log_format", "json")?;

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => match Self::config_path() {
                Some(default) => builder.add_source(config::File::from(default).required(false)),
                None => builder,
            },
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TOPO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the default configuration file path
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("topo").join("config.toml"))
    }
}
