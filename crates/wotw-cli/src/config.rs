//! CLI configuration file
//!
//! ```toml
//! definitions = "pointers.json"
//!
//! [engine]
//! version = "V1"
//! poll_interval_ms = 50
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use wotw_core::EngineConfig;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    /// Pointer definitions file; the built-in set when absent
    pub definitions: Option<PathBuf>,
}

impl CliConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Load the configuration, falling back to defaults when the file is
    /// missing. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                warn!("Failed to read config {}: {}, using defaults", path.display(), e);
                return Ok(Self::default());
            }
        };
        let config = Self::parse(&content).with_context(|| format!("in {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
