//! Engine configuration.
//!
//! Configuration is plain serde data with defaults for every key, so a YAML
//! or JSON document only needs the keys it changes:
//!
//! ```yaml
//! process: parallel
//! max_memory_bytes: 536870912
//! summary:
//!   spwchan: true
//!   minrel: 0.1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::process::Process;
use crate::store::MemoryBudget;
use crate::utilities::errors::{FlagError, Result};

/// Merge `config` over `defaults`. Nested objects are merged key by key;
/// any other value in `config` replaces the default.
pub fn process_config(config: &Map<String, Value>, defaults: &Map<String, Value>) -> Map<String, Value> {
    let mut result = defaults.clone();
    for (key, value) in config {
        let merged = match (result.get(key), value) {
            (Some(Value::Object(base)), Value::Object(over)) => Value::Object(process_config(over, base)),
            _ => value.clone(),
        };
        result.insert(key.clone(), merged);
    }
    result
}

// ---------------------------------------------------------------------------
// SummaryConfig
// ---------------------------------------------------------------------------

/// Summary accumulator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Break counts down per (spw, channel).
    pub spwchan: bool,
    /// Break counts down per (spw, correlation).
    pub spwcorr: bool,
    /// Keep the global per-correlation breakdown.
    pub correlation: bool,
    /// Keep the per-baseline breakdown.
    pub basecnt: bool,
    /// Split each buffer's rows over this many threads; `0` or `1` counts
    /// on the calling thread.
    pub parallel_rows: usize,
    /// Smallest flagged fraction a reported bucket may have.
    pub minrel: f64,
    /// Largest flagged fraction a reported bucket may have.
    pub maxrel: f64,
    /// Smallest flagged count a reported bucket may have.
    pub minabs: u64,
    /// Largest flagged count a reported bucket may have; `None` is unbounded.
    pub maxabs: Option<u64>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            spwchan: false,
            spwcorr: false,
            correlation: true,
            basecnt: true,
            parallel_rows: 0,
            minrel: 0.0,
            maxrel: 1.0,
            minabs: 0,
            maxabs: None,
        }
    }
}

impl SummaryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.minrel) || !(0.0..=1.0).contains(&self.maxrel) {
            return Err(FlagError::Config(format!(
                "minrel/maxrel must lie in [0, 1], got {} and {}",
                self.minrel, self.maxrel
            )));
        }
        if self.minrel > self.maxrel {
            return Err(FlagError::Config(format!(
                "minrel {} is larger than maxrel {}",
                self.minrel, self.maxrel
            )));
        }
        if let Some(maxabs) = self.maxabs {
            if self.minabs > maxabs {
                return Err(FlagError::Config(format!(
                    "minabs {} is larger than maxabs {}",
                    self.minabs, maxabs
                )));
            }
        }
        Ok(())
    }

    /// Whether no bucket can be filtered out.
    pub fn is_unfiltered(&self) -> bool {
        self.minrel <= 0.0 && self.maxrel >= 1.0 && self.minabs == 0 && self.maxabs.is_none()
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Run-wide options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// How agents are run over a buffer.
    pub process: Process,
    /// Ceiling for one chunk's flag store, in bytes; `None` is unbounded.
    pub max_memory_bytes: Option<u64>,
    /// Run every agent but never write flags back.
    pub trial: bool,
    pub summary: SummaryConfig,
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        log::debug!("Loading engine configuration from {}", path.display());
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Apply key/value overrides on top of this configuration.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self> {
        let defaults = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(FlagError::Config(format!(
                    "engine configuration serialized to {}, expected an object",
                    other
                )))
            }
        };
        let merged = process_config(overrides, &defaults);
        let config: Self = serde_json::from_value(Value::Object(merged))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.summary.validate()
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        match self.max_memory_bytes {
            Some(bytes) => MemoryBudget::with_ceiling(bytes),
            None => MemoryBudget::unbounded(),
        }
    }
}
