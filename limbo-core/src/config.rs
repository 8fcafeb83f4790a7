//! Runtime Configuration
//!
//! Tuning knobs for the cooperative scheduler. Configs are plain serde
//! structs so an embedder can load them from JSON alongside the rest of its
//! settings; every field has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::YieldPolicy;

fn default_slice_budget_ms() -> u64 {
    5
}

fn default_max_passes_per_idle() -> usize {
    1000
}

/// Configuration for a [`Runtime`](crate::reconciler::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Length of one cooperative time slice in milliseconds.
    #[serde(default = "default_slice_budget_ms")]
    pub slice_budget_ms: u64,

    /// When set, yield after this many fiber units instead of watching the
    /// clock. Deterministic; mostly useful in tests.
    #[serde(default)]
    pub yield_after_units: Option<usize>,

    /// Upper bound on reconciliation passes run by one `run_until_idle`
    /// call. Guards against effects that keep setting state.
    #[serde(default = "default_max_passes_per_idle")]
    pub max_passes_per_idle: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            slice_budget_ms: default_slice_budget_ms(),
            yield_after_units: None,
            max_passes_per_idle: default_max_passes_per_idle(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a config from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_budget_ms == 0 {
            return Err(ConfigError::ZeroSliceBudget);
        }
        Ok(())
    }

    /// The yield policy this config describes.
    pub fn yield_policy(&self) -> YieldPolicy {
        match self.yield_after_units {
            Some(units) => YieldPolicy::AfterUnits(units.max(1)),
            None => YieldPolicy::Deadline(Duration::from_millis(self.slice_budget_ms)),
        }
    }
}
