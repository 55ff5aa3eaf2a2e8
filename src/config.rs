use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Tunables for the processing engine.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the persisted cache store.
    pub store_dir: PathBuf,
    /// Capacity of the in-memory read cache in front of the store (0 disables it).
    pub memory_cache_entries: usize,
    /// How far from 90° two horizontal components may be and still rotate.
    pub orientation_tolerance_deg: f64,
    /// Damping ratio used for response spectra when a request does not give one.
    pub damping_ratio: f64,
    /// Highest Butterworth order accepted by the filters.
    pub max_filter_order: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./tsprocess_db"),
            memory_cache_entries: 2000,
            orientation_tolerance_deg: 0.1,
            damping_ratio: 0.05,
            max_filter_order: 12,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file. `.json` is parsed as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;

        let config: EngineConfig = match extension(path) {
            "json" => serde_json::from_str(&contents).map_err(|e| Error::Config {
                message: format!("{}: {e}", path.display()),
            })?,
            _ => toml::from_str(&contents).map_err(|e| Error::Config {
                message: format!("{}: {e}", path.display()),
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file, mirroring [`EngineConfig::from_file`].
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = match extension(path) {
            "json" => serde_json::to_string_pretty(self)
                .map_err(|e| Error::serialization("writing config", e))?,
            _ => toml::to_string_pretty(self).map_err(|e| Error::Config {
                message: e.to_string(),
            })?,
        };
        std::fs::write(path, contents)
            .map_err(|e| Error::io(format!("writing config {}", path.display()), e))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.orientation_tolerance_deg >= 0.0 && self.orientation_tolerance_deg < 45.0) {
            return Err(Error::Config {
                message: format!(
                    "orientation_tolerance_deg must be in [0, 45), got {}",
                    self.orientation_tolerance_deg
                ),
            });
        }
        if !(self.damping_ratio > 0.0 && self.damping_ratio < 1.0) {
            return Err(Error::Config {
                message: format!("damping_ratio must be in (0, 1), got {}", self.damping_ratio),
            });
        }
        if self.max_filter_order == 0 {
            return Err(Error::Config {
                message: "max_filter_order must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|s| s.to_str()).unwrap_or("toml")
}
