//! Runtime settings that can be modified while a loop is running
//!
//! These are read by a looped trigger's worker at the top of every tick, so
//! a change takes effect on the next tick without restarting the loop.
//!
//! # Timing modes
//!
//! - **RealTime**: `dt` is the measured wall time since the previous tick.
//!   Overruns are logged and the loop continues at best effort.
//! - **FixedStep**: `dt` is always the period. The worker busy-waits the
//!   last stretch before each deadline for tighter tick spacing.
//! - **Simulated**: fixed `dt`, but simulated time tracks wall time by
//!   running several sub-steps per tick when behind, capped at
//!   `max_catch_up`. Sub-steps beyond the cap are dropped.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a looped trigger maps wall time to simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    #[default]
    RealTime,
    FixedStep,
    Simulated,
}

impl TimingMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            TimingMode::RealTime => "Real-time",
            TimingMode::FixedStep => "Fixed step",
            TimingMode::Simulated => "Simulated (bounded catch-up)",
        }
    }
}

/// Period and timing mode of one looped trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Requested tick period
    #[serde(rename = "period_ms", with = "duration_ms")]
    pub period: Duration,

    #[serde(default)]
    pub mode: TimingMode,

    /// Sub-step cap per tick in `Simulated` mode
    #[serde(default = "default_max_catch_up")]
    pub max_catch_up: u32,
}

fn default_max_catch_up() -> u32 {
    10
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(10),
            mode: TimingMode::RealTime,
            max_catch_up: default_max_catch_up(),
        }
    }
}

impl LoopSettings {
    pub fn new(period: Duration, mode: TimingMode) -> Self {
        Self {
            period,
            mode,
            ..Self::default()
        }
    }

    pub fn with_max_catch_up(mut self, max_catch_up: u32) -> Self {
        self.max_catch_up = max_catch_up;
        self
    }

    /// Period as seconds of simulated time.
    pub fn dt(&self) -> f64 {
        self.period.as_secs_f64()
    }
}

/// Serialize a `Duration` as fractional milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_nanos() as f64 / 1e6)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "period must be a non-negative number of milliseconds, got {}",
                ms
            )));
        }
        Ok(Duration::from_nanos((ms * 1e6).round() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_settings_json() {
        let settings = LoopSettings::new(Duration::from_micros(2500), TimingMode::FixedStep);
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains(r#""period_ms":2.5"#));
        assert!(json.contains(r#""mode":"fixed_step""#));
        let back: LoopSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_negative_period_rejected() {
        let err = serde_json::from_str::<LoopSettings>(r#"{"period_ms":-1.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: LoopSettings = serde_json::from_str(r#"{"period_ms":20}"#).unwrap();
        assert_eq!(settings.period, Duration::from_millis(20));
        assert_eq!(settings.mode, TimingMode::RealTime);
        assert_eq!(settings.max_catch_up, 10);
    }
}
