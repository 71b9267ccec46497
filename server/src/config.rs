//! Engine tunables.
//!
//! Every numeric constant of the game (tick interval, capture radius, win
//! score, session duration, seed garrison) lives here so deployments and
//! tests can change them. Values are read from an optional TOML file and may
//! then be overridden from the command line.

use crate::utils::ticks_covering;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the base delay between mirroring retries.
pub const MAX_PERSISTENCE_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between production/scoring ticks
    pub tick_interval_ms: u64,
    /// Score that ends a session immediately
    pub win_score: u64,
    /// Session length before the leader wins by timeout
    pub max_duration_secs: u64,
    /// Capture radius of every region, in metres
    pub capture_radius_m: f64,
    /// Troop pool a player starts with
    pub initial_troops: u32,
    /// Garrison placed in an empty region when it is captured
    pub capture_seed_garrison: u32,
    /// Regions scattered around the capital in addition to it
    pub extra_regions: usize,
    /// Maximum distance of scattered regions from the capital, in metres
    pub region_spread_m: f64,
    /// Fixed seed for region scattering; entropy when unset
    pub region_seed: Option<u64>,
    /// Per-session event buffer; slow subscribers lose the oldest events
    pub event_queue_capacity: usize,
    pub max_sessions: usize,
    pub persistence_retries: u32,
    pub persistence_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            win_score: 100,
            max_duration_secs: 600,
            capture_radius_m: 50.0,
            initial_troops: 5,
            capture_seed_garrison: 1,
            extra_regions: 0,
            region_spread_m: 500.0,
            region_seed: None,
            event_queue_capacity: 64,
            max_sessions: 1024,
            persistence_retries: 3,
            persistence_backoff_ms: 200,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.win_score == 0 {
            return Err(ConfigError::Invalid("win_score must be positive".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be positive".into(),
            ));
        }
        if !(self.capture_radius_m.is_finite() && self.capture_radius_m > 0.0) {
            return Err(ConfigError::Invalid(
                "capture_radius_m must be a positive number".into(),
            ));
        }
        if !(self.region_spread_m.is_finite() && self.region_spread_m >= 0.0) {
            return Err(ConfigError::Invalid(
                "region_spread_m must be a non-negative number".into(),
            ));
        }
        if self.persistence_backoff_ms > MAX_PERSISTENCE_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "persistence_backoff_ms must be at most {}",
                MAX_PERSISTENCE_BACKOFF_MS
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Tick on which an undecided session ends by timeout.
    pub fn max_ticks(&self) -> u64 {
        ticks_covering(self.max_duration(), self.tick_interval())
    }

    pub fn persistence_backoff(&self) -> Duration {
        Duration::from_millis(self.persistence_backoff_ms)
    }
}
