//! # stepflow: a dataflow execution engine
//!
//! Steps with typed input and output slots are wired into a graph and run
//! by triggers. Looped triggers drive their steps periodically on dedicated
//! worker threads, in real time, fixed-step or simulated time. Groups nest
//! graphs inside graphs and publish selected slots as their own.
//!
//! ## Architecture
//!
//! - **Graph**: steps, connections, triggers and groups (see [`graph`])
//! - **Scheduling**: per-trigger execution plans in dependency order, with
//!   stale-tolerant inputs breaking feedback loops
//! - **Workers**: one thread per running looped trigger; downstream triggers
//!   on other threads receive kicks over crossbeam channels
//! - **Diagnostics**: a read-only consistency checker and an event channel
//!
//! ## Configuration
//!
//! [`EngineConfig`] is loaded from TOML or JSON and handed to a group
//! through its builder. [`logging::init`] installs a `tracing` subscriber for
//! hosts that have none.
//!
//! ## Example
//!
//! ```ignore
//! use stepflow::{ConfigValue, Group, StepParams};
//!
//! fn main() -> stepflow::Result<()> {
//!     let group = Group::new("plant");
//!     let params = StepParams::from([("value".to_string(), ConfigValue::Float(2.0))]);
//!     let source = group.create_step("source", "constant", &params)?;
//!     let gain = group.create_step("gain", "gain", &StepParams::new())?;
//!     group.connect(source, "out", gain, "in")?;
//!
//!     let tick = group.create_looped_trigger("tick")?;
//!     group.attach(tick, source)?;
//!     group.start_trigger(tick)?;
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//!     group.stop_trigger(tick)?;
//!
//!     println!("{:?}", group.output_value(gain, "out")?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, LoggingConfig, LoopSettings, TimingMode};
pub use error::{GraphError, Result, ResultExt, StepError};
pub use graph::{
    ConfigValue, DataValue, FireReport, Finding, Group, GroupBuilder, GraphDescription,
    GraphEvent, StepContext, StepId, StepParams, StepPlugin, StepRegistry, TriggerId, ValueType,
};
pub use types::{LoopStats, StepMode, StepState, StepStatus, TriggerState};
