use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LightEngineError, Result};

/// Upper bound on the number of universes an engine may be configured with.
pub const MAX_UNIVERSES: usize = 64;

/// Upper bound on [`EngineConfig::timing_multiplier`].
pub const MAX_TIMING_MULTIPLIER: f64 = 100.0;

/// How overlapping channel writes from concurrently running functions merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Latest takes precedence: the most recently started instance wins.
    #[default]
    Ltp,
    /// Highest takes precedence: the largest contributed value wins.
    Htp,
}

/// Top-level configuration structure for the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nominal tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Number of logical universes allocated at startup.
    pub universe_count: usize,
    /// Grace period between closing an output line and reopening one.
    pub settle_delay_ms: u64,
    /// A single tick never advances playback by more than this many periods.
    pub max_catch_up_factor: f64,
    pub merge_mode: MergeMode,
    /// Scales every fade and hold time. 2.0 makes playback take twice as long.
    pub timing_multiplier: f64,
    /// Number of diagnostics retained for monitoring.
    pub diagnostics_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 25,
            universe_count: 4,
            settle_delay_ms: 10,
            max_catch_up_factor: 2.0,
            merge_mode: MergeMode::Ltp,
            timing_multiplier: 1.0,
            diagnostics_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), ?config, "loaded engine configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 || self.tick_interval_ms > 1000 {
            return Err(LightEngineError::InvalidInput(
                "tick interval must be between 1 and 1000 ms",
            ));
        }
        if self.universe_count == 0 || self.universe_count > MAX_UNIVERSES {
            return Err(LightEngineError::InvalidInput(
                "universe count must be between 1 and 64",
            ));
        }
        if !(self.max_catch_up_factor >= 1.0 && self.max_catch_up_factor <= 10.0) {
            return Err(LightEngineError::InvalidInput(
                "catch-up factor must be between 1.0 and 10.0",
            ));
        }
        if !(self.timing_multiplier > 0.0 && self.timing_multiplier <= MAX_TIMING_MULTIPLIER) {
            return Err(LightEngineError::InvalidInput(
                "timing multiplier must be greater than 0 and at most 100",
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Largest delta a single tick may advance playback by.
    pub fn max_tick_delta(&self) -> Duration {
        self.tick_interval().mul_f64(self.max_catch_up_factor)
    }
}
