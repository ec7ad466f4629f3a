//! Engine events for observers.
//!
//! Emission never blocks a worker: the bus is a bounded crossbeam channel
//! and, when it is full, the oldest event is dropped to make room. Each
//! event is delivered once, to whichever receiver takes it first.

use crate::graph::id::{StepId, TriggerId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Something observers may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A step's compute failed and it is now in `Exception`
    StepFaulted {
        step: StepId,
        name: String,
        message: String,
    },
    /// A faulted step was reset or reconnected
    StepRecovered { step: StepId, name: String },
    TriggerStarted { trigger: TriggerId, name: String },
    TriggerStopped { trigger: TriggerId, name: String },
    /// A tick's computation took longer than the period
    Overrun {
        trigger: TriggerId,
        tick: u64,
        compute: Duration,
        period: Duration,
    },
    /// The structure changed; cached plans were invalidated
    TopologyChanged { generation: u64 },
}

/// Bounded, non-blocking event channel shared by a group and its loops.
pub struct EventBus {
    tx: Sender<GraphEvent>,
    rx: Receiver<GraphEvent>,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn emit(&self, event: GraphEvent) {
        let mut event = event;
        // bounded retries: a concurrent emitter may refill the slot we freed
        for _ in 0..4 {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A receiver for events. Receivers compete for events.
    pub fn subscribe(&self) -> Receiver<GraphEvent> {
        self.rx.clone()
    }

    /// Events discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bus_drops_oldest() {
        let bus = EventBus::new(2);
        for generation in 0..5 {
            bus.emit(GraphEvent::TopologyChanged { generation });
        }
        let rx = bus.subscribe();
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                GraphEvent::TopologyChanged { generation: 3 },
                GraphEvent::TopologyChanged { generation: 4 },
            ]
        );
        assert_eq!(bus.dropped(), 3);
    }
}
