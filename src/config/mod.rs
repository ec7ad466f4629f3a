//! Configuration module for stepflow
//!
//! [`EngineConfig`] holds the defaults a group applies to the looped
//! triggers it creates, the limits of its event channel and checker, and
//! the logging setup for hosts that let the engine install a subscriber.
//!
//! Configs are plain serde structs. Every field has a default, so a config
//! file only needs the keys it changes. Files are TOML or JSON, chosen by
//! extension.
//!
//! # Example
//!
//! ```ignore
//! use stepflow::config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let group = GroupBuilder::new("main").config(config).build()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default looped trigger period in milliseconds
pub const DEFAULT_PERIOD_MS: u64 = 10;

/// Default capacity of a group's event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,stepflow=debug";

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period given to new looped triggers
    pub default_period_ms: u64,

    /// Timing mode given to new looped triggers
    pub default_timing_mode: TimingMode,

    /// Sub-step cap for `Simulated` mode
    pub max_catch_up_steps: u32,

    /// Refuse to start a looped trigger while the checker reports findings
    pub strict_validation: bool,

    /// Capacity of the group event channel
    pub event_capacity: usize,

    /// Warn on the first overrun and every N-th after; the rest log at debug
    pub overrun_warn_every: u64,

    /// In `FixedStep` mode, busy-wait this long before each deadline
    pub spin_threshold_us: u64,

    /// How long the checker waits for a step lock before skipping it
    pub check_lock_timeout_ms: u64,

    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_period_ms: DEFAULT_PERIOD_MS,
            default_timing_mode: TimingMode::RealTime,
            max_catch_up_steps: 10,
            strict_validation: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            overrun_warn_every: 100,
            spin_threshold_us: 1000,
            check_lock_timeout_ms: 5,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a config file, TOML or JSON by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraphError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                GraphError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            Some("toml") | None => Self::from_toml_str(&content)?,
            Some(other) => {
                return Err(GraphError::Config(format!(
                    "Unsupported config extension '{}' for {:?}",
                    other, path
                )))
            }
        };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default engine config: {}", e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GraphError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GraphError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save as TOML or JSON by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GraphError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)
                .map_err(|e| GraphError::Config(format!("Failed to serialize config: {}", e)))?,
            _ => self.to_toml_string()?,
        };

        std::fs::write(path, content).map_err(|e| {
            GraphError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_period_ms == 0 {
            return Err(GraphError::Config(
                "default_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(GraphError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.overrun_warn_every == 0 {
            return Err(GraphError::Config(
                "overrun_warn_every must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings given to a newly created looped trigger.
    pub fn default_loop_settings(&self) -> LoopSettings {
        LoopSettings::new(
            Duration::from_millis(self.default_period_ms),
            self.default_timing_mode,
        )
        .with_max_catch_up(self.max_catch_up_steps)
    }

    pub fn spin_threshold(&self) -> Duration {
        Duration::from_micros(self.spin_threshold_us)
    }

    pub fn check_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.check_lock_timeout_ms)
    }
}

/// Logging configuration, consumed by [`crate::logging::init`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,

    /// Directory for daily-rolling log files; stdout only when unset
    pub directory: Option<PathBuf>,

    /// File name prefix for rolling log files
    pub file_prefix: String,

    /// ANSI colours on the stdout layer
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            file_prefix: "stepflow.log".to_string(),
            ansi: true,
        }
    }
}
