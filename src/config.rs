use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Tunable pipeline parameters.
///
/// Loaded from an optional `eeg-bids.json` in the working directory (or an
/// explicit `--config` path); every field has a default so the file is only
/// needed to override something.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sample rate written into rewritten sidecars, in Hz.
    pub target_rate: f64,
    /// Bandpass edges handed to the external filter/resample toolbox, in Hz.
    pub bandpass_low: f64,
    pub bandpass_high: f64,
    /// Upper bound on recordings sampled by the signal comparator.
    pub max_compare_files: usize,
    /// Worker count for the converter; 1 means sequential.
    pub jobs: usize,
    /// Whether the comparator renders SVG artifacts alongside the report.
    pub plots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_rate: 100.0,
            bandpass_low: 0.5,
            bandpass_high: 45.0,
            max_compare_files: 10,
            jobs: 1,
            plots: true,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the effective config.
    ///
    /// An explicit path must exist and parse; the default path is optional
    /// and silently falls back to `PipelineConfig::default()` when absent.
    pub fn resolve(path: Option<&str>) -> Result<PipelineConfig, PipelineError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("eeg-bids.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(PipelineConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PipelineError::ConfigParse(err.to_string()))
    }
}
