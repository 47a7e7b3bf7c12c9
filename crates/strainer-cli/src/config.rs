//! CLI configuration file.
//!
//! ```toml
//! filters_dir = "/var/lib/strainer/filters"
//!
//! [engine]
//! arena_pages = 8
//! fuel_per_call = 5000000
//! call_timeout_ms = 250
//!
//! [engine.abi]
//! byte_order = "little"
//! length_prefix = "u32"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strainer_host::BlueprintConfig;

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where imported blueprints are stored
    pub filters_dir: Option<PathBuf>,

    /// Engine limits and ABI
    pub engine: BlueprintConfig,
}

impl CliConfig {
    /// Read the configuration at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(text)?;
        config
            .engine
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }

    /// Directory holding imported blueprints.
    pub fn filters_dir(&self) -> PathBuf {
        match &self.filters_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join("strainer")
                .join("filters"),
        }
    }

    /// Resolve a blueprint argument: an existing path, or the name of an
    /// imported blueprint.
    pub fn resolve_module(&self, module: &Path) -> Result<PathBuf> {
        if module.exists() {
            return Ok(module.to_path_buf());
        }
        let imported = self.filters_dir().join(module).with_extension("wasm");
        if imported.exists() {
            return Ok(imported);
        }
        anyhow::bail!(
            "Blueprint '{}' not found (also looked in {})",
            module.display(),
            self.filters_dir().display()
        )
    }
}
