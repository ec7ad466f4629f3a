//! Dataflow graph: steps, connections, triggers and groups.
//!
//! Steps publish values on output slots; connections make those values
//! visible to input slots of other steps. Triggers decide when steps run:
//! a plain trigger runs its listeners when fired, a looped trigger fires
//! itself periodically on its own worker thread.
//!
//! # Architecture
//!
//! ```text
//!  [LoopedTrigger] ──fire──► plan: [constant] ──► [gain] ──► [recorder]
//!        │                              (dependency order, one tick)
//!        └──downstream──► [Trigger] ──► ...
//! ```
//!
//! # Design
//!
//! - **Enum dispatch for built-ins**: `BuiltinStep` covers the shipped kinds,
//!   `StepPlugin` trait objects cover the rest.
//! - **Arena storage**: `Vec<Option<..>>` indexed by `StepId`/`TriggerId`;
//!   removed entries leave holes so IDs are never reused.
//! - **Per-step locking**: each step sits behind its own mutex; the group's
//!   structural lock is only held for bookkeeping.
//! - **Lazy plans**: trigger plans are compiled on the first fire after an
//!   edit and cached against the structure generation.
//! - **Published values**: slot values are `Arc`s swapped in whole, so a
//!   reader never sees a half-written value.

pub mod checker;
pub mod connection;
pub mod description;
pub mod events;
pub mod group;
pub mod id;
pub mod kind;
pub mod looped;
pub mod plan;
pub mod registry;
pub mod slot;
pub mod snapshot;
pub mod step;
pub mod steps;
pub mod trigger;
pub mod value;

pub use checker::{ConsistencyChecker, ConsistencyReport, Finding};
pub use connection::Connection;
pub use description::{
    ConnectionDescription, ExposureDescription, GraphDescription, StepDescription,
    TriggerDescription,
};
pub use events::{EventBus, GraphEvent};
pub use group::{Group, GroupBuilder};
pub use id::{ConnectionId, SlotId, StepId, TriggerId};
pub use kind::BuiltinKind;
pub use looped::{LoopedTrigger, StopOutcome};
pub use plan::{ExecutionPlan, PlanStats};
pub use registry::StepRegistry;
pub use slot::{SlotDescriptor, SlotDirection};
pub use snapshot::{ExposureInfo, GroupSnapshot, StepInfo, TriggerInfo};
pub use step::{AnyStep, BuiltinStep, StepContext, StepPlugin, TickTime};
pub use trigger::FireReport;
pub use value::{ConfigValue, DataValue, StepParams, ValueType};
