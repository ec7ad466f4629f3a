//! Connection edge records.

use crate::graph::id::{ConnectionId, SlotId, StepId};

/// A directed edge from an output slot to an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    /// Output slot of the producer.
    pub source: SlotId,
    /// Input slot of the consumer.
    pub target: SlotId,
    /// The target input is stale-tolerant; the edge does not constrain
    /// ordering and may carry the previous tick's value.
    pub feedback: bool,
}

impl Connection {
    #[inline]
    pub fn source_step(&self) -> StepId {
        self.source.step()
    }

    #[inline]
    pub fn target_step(&self) -> StepId {
        self.target.step()
    }

    /// Whether either endpoint is `step`.
    pub fn touches(&self, step: StepId) -> bool {
        self.source_step() == step || self.target_step() == step
    }
}
