//! Slot descriptors and the shared value handles behind them.
//!
//! Each step declares its slots once, at construction. An output slot owns a
//! [`SlotHandle`]; connecting it to an input hands the input a clone of that
//! handle, so the consumer reads exactly what the producer last published.
//! An input never owns a value, only a reference to somebody else's handle.

use crate::graph::value::{DataValue, ValueType};
use parking_lot::RwLock;
use std::sync::Arc;

/// Whether a slot is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDirection {
    Input,
    Output,
}

/// Declaration of one slot on a step.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDescriptor {
    pub name: String,
    pub direction: SlotDirection,
    pub value_type: ValueType,
    /// Inputs only. An unconnected required input is reported by the checker.
    pub required: bool,
    /// Inputs only. The step accepts the previous tick's value here, which
    /// makes a connection into this slot a feedback edge.
    pub stale_tolerant: bool,
}

impl SlotDescriptor {
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            direction: SlotDirection::Input,
            value_type,
            required: true,
            stale_tolerant: false,
        }
    }

    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            direction: SlotDirection::Output,
            value_type,
            required: false,
            stale_tolerant: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn stale_tolerant(mut self) -> Self {
        self.stale_tolerant = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == SlotDirection::Input
    }
}

/// Shared reference to the current value of an output.
///
/// Publishing swaps in a whole new `Arc`, so a reader holding the previous
/// value keeps a consistent copy and never sees a half-written one.
#[derive(Clone, Default)]
pub struct SlotHandle(Arc<RwLock<Option<Arc<DataValue>>>>);

impl SlotHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, if one has been published.
    pub fn load(&self) -> Option<Arc<DataValue>> {
        self.0.read().clone()
    }

    pub fn publish(&self, value: DataValue) {
        self.publish_shared(Arc::new(value));
    }

    pub fn publish_shared(&self, value: Arc<DataValue>) {
        *self.0.write() = Some(value);
    }

    /// Revert to "not set".
    pub fn clear(&self) {
        *self.0.write() = None;
    }

    pub fn ptr_eq(&self, other: &SlotHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.load() {
            Some(v) => write!(f, "SlotHandle({})", v),
            None => write!(f, "SlotHandle(unset)"),
        }
    }
}

/// An input slot: a descriptor plus the handle of whatever feeds it.
pub struct InputSlot {
    pub descriptor: SlotDescriptor,
    source: RwLock<Option<SlotHandle>>,
}

impl InputSlot {
    pub fn new(descriptor: SlotDescriptor) -> Self {
        Self {
            descriptor,
            source: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub(crate) fn attach(&self, handle: SlotHandle) {
        *self.source.write() = Some(handle);
    }

    pub(crate) fn detach(&self) -> Option<SlotHandle> {
        self.source.write().take()
    }

    /// Detach only if the current source is `handle`.
    pub(crate) fn detach_if(&self, handle: &SlotHandle) -> bool {
        let mut source = self.source.write();
        if source.as_ref().is_some_and(|h| h.ptr_eq(handle)) {
            *source = None;
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self) -> bool {
        self.source.read().is_some()
    }

    /// Connected and holding a published value.
    pub fn is_valid(&self) -> bool {
        self.value().is_some()
    }

    pub fn value(&self) -> Option<Arc<DataValue>> {
        self.source.read().as_ref().and_then(SlotHandle::load)
    }
}

/// An output slot: a descriptor plus the handle it publishes into.
pub struct OutputSlot {
    pub descriptor: SlotDescriptor,
    pub(crate) handle: SlotHandle,
}

impl OutputSlot {
    pub fn new(descriptor: SlotDescriptor) -> Self {
        Self {
            descriptor,
            handle: SlotHandle::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn value(&self) -> Option<Arc<DataValue>> {
        self.handle.load()
    }

    pub(crate) fn handle(&self) -> SlotHandle {
        self.handle.clone()
    }
}
