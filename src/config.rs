// src/config.rs
//! Engine configuration

use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIME_BUDGET_MS: u64 = 250;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soft per-run ceiling, checked between rules. `None` or `0` disables it.
    pub time_budget_ms: Option<u64>,
    /// Larger rule sources are rejected before lexing
    pub max_source_bytes: usize,
    /// Treat any compile warning as a failure
    pub warnings_as_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: Some(DEFAULT_TIME_BUDGET_MS),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            warnings_as_errors: false,
        }
    }
}

impl EngineConfig {
    /// Parse and validate; missing keys take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid engine config: {}", e)))?;
        config.validate().map_err(EngineError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_source_bytes == 0 {
            return Err("max_source_bytes must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
