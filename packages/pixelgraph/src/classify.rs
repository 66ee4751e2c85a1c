//! Routing of event kinds to immediate or queued handling.
//!
//! Control and status events must not wait behind a backlog of animations,
//! so they bypass the action queue. Everything else, including kinds
//! pixelgraph does not recognize, is queued; the stage decides what to do
//! with unknown kinds.

use crate::core::EventKind;

/// How an event is handled once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handling {
    /// Applied synchronously to the status board, out of band.
    Immediate,
    /// Becomes an action and waits its turn in the queue.
    Queued,
}

/// Classify an event kind. Pure and total.
pub fn classify(kind: &EventKind) -> Handling {
    match kind {
        EventKind::SystemReady | EventKind::SimulationStart | EventKind::Error => {
            Handling::Immediate
        }
        _ => Handling::Queued,
    }
}

impl EventKind {
    /// Shorthand for [`classify`].
    pub fn handling(&self) -> Handling {
        classify(self)
    }
}
