//! Engine configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! symbol_file = "build/firmware.elf"
//! log_level = "debug"
//! on_load_failure = "retain"
//! duplicate_symbols = "reject"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::symbols::{DuplicatePolicy, FailurePolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbol file loaded at startup
    pub symbol_file: Option<PathBuf>,
    /// `tracing` level for the server
    pub log_level: String,
    pub on_load_failure: FailurePolicy,
    pub duplicate_symbols: DuplicatePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol_file: None,
            log_level: "info".to_string(),
            on_load_failure: FailurePolicy::default(),
            duplicate_symbols: DuplicatePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        // Relative symbol paths are relative to the config file
        if let Some(dir) = path.parent() {
            config.symbol_file = config
                .symbol_file
                .take()
                .map(|file| if file.is_relative() { dir.join(file) } else { file });
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
