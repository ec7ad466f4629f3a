//! Identity types for the graph.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices
//! into their group's storage vectors. Indices are never reused: a removed
//! entry leaves an empty arena slot behind, so a stale ID simply fails to
//! resolve instead of aliasing a newer object.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

arena_id!(
    /// Index into a group's step arena.
    StepId
);

arena_id!(
    /// Index into a group's connection arena.
    ConnectionId
);

arena_id!(
    /// Index into a group's trigger arena.
    TriggerId
);

/// Compact slot identifier. High 20 bits = step index, low 12 bits = slot index.
/// Supports up to ~1M steps with 4096 slots per direction each.
///
/// The direction is implied by where the ID is used: a connection's
/// `source` is always an output slot and its `target` an input slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    const SLOT_BITS: u32 = 12;
    const SLOT_MASK: u32 = (1 << Self::SLOT_BITS) - 1;

    pub fn new(step: StepId, slot_index: u16) -> Self {
        debug_assert!(slot_index < (1 << Self::SLOT_BITS) as u16);
        Self((step.0 << Self::SLOT_BITS) | (slot_index as u32 & Self::SLOT_MASK))
    }

    #[inline]
    pub fn step(self) -> StepId {
        StepId(self.0 >> Self::SLOT_BITS)
    }

    #[inline]
    pub fn slot_index(self) -> u16 {
        (self.0 & Self::SLOT_MASK) as u16
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId(step={}, slot={})", self.step().0, self.slot_index())
    }
}
