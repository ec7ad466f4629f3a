//! Core observation types shared across the engine
//!
//! These are the read-only views the host process (a viewer, a script
//! driver) polls while loops are running:
//!
//! - [`StepStatus`] - per-step state and last error
//! - [`TriggerState`] - lifecycle of a looped trigger
//! - [`LoopStats`] - timing counters of a looped trigger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a step wants to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepMode {
    /// Recomputes on every tick of the looped trigger it is attached to.
    Looped,
    /// Recomputes only when a trigger fires it, directly or because an
    /// upstream step in the same plan produced data for it.
    #[default]
    Triggered,
}

/// Execution state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepState {
    #[default]
    Stopped,
    /// Driven by at least one running looped trigger.
    Running,
    /// Faulted; skipped by every trigger until reset or reconnected.
    Exception,
}

impl StepState {
    pub fn is_faulted(self) -> bool {
        self == StepState::Exception
    }
}

/// Snapshot of a step's health.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub state: StepState,
    /// Message of the fault that put the step into `Exception`
    pub last_error: Option<String>,
    /// Number of successful computes
    pub computations: u64,
    /// Number of failed computes (errors and panics)
    pub failures: u64,
    /// Number of times a trigger skipped this step because it was faulted
    pub skipped: u64,
}

/// Lifecycle of a looped trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TriggerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl TriggerState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => TriggerState::Starting,
            2 => TriggerState::Running,
            3 => TriggerState::Stopping,
            _ => TriggerState::Stopped,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TriggerState::Stopped => 0,
            TriggerState::Starting => 1,
            TriggerState::Running => 2,
            TriggerState::Stopping => 3,
        }
    }
}

/// Timing statistics of a looped trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStats {
    /// Completed ticks, including handoff kicks
    pub ticks: u64,
    /// Ticks run because an upstream trigger handed off a kick
    pub kicks: u64,
    /// Step computes that succeeded
    pub computed: u64,
    /// Step computes skipped because the step was faulted
    pub skipped: u64,
    /// Step computes that failed
    pub failed: u64,
    /// Duration of the most recent tick's computation
    pub last_compute: Duration,
    /// Running mean of tick computation time
    pub mean_compute: Duration,
    /// Longest tick computation seen
    pub max_compute: Duration,
    /// Time spent waiting before the most recent tick
    pub last_idle: Duration,
    /// Ticks whose computation exceeded the period
    pub overruns: u64,
    /// Sub-steps discarded by the catch-up cap in simulated mode
    pub dropped_steps: u64,
    /// Simulated time in seconds
    pub sim_time: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl LoopStats {
    /// Share of wall time spent computing, 0.0 - 1.0.
    pub fn load(&self) -> f64 {
        let busy = self.last_compute.as_secs_f64();
        let total = busy + self.last_idle.as_secs_f64();
        if total <= 0.0 {
            0.0
        } else {
            busy / total
        }
    }

    pub(crate) fn record_tick(&mut self, compute: Duration, idle: Duration) {
        self.ticks += 1;
        self.last_compute = compute;
        self.last_idle = idle;
        if compute > self.max_compute {
            self.max_compute = compute;
        }
        // incremental mean
        let n = self.ticks as f64;
        let mean = self.mean_compute.as_secs_f64();
        let updated = mean + (compute.as_secs_f64() - mean) / n;
        self.mean_compute = Duration::from_secs_f64(updated.max(0.0));
    }
}
