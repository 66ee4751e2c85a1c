//! Global status line and the immediate dispatcher.
//!
//! Status/control events (`SYSTEM_READY`, `SIMULATION_START`, `ERROR`) are
//! applied here synchronously, out of band, so the presentation layer sees
//! them even while a long backlog of animations is still queued.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{Event, EventKind};
use crate::error::PixelgraphError;

/// Status shown before anything has been received.
pub const INITIAL_STATUS: &str = "Waiting for connection...";

/// Semantic severity of the status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Neutral,
    Success,
    InProgress,
    Failure,
}

impl Severity {
    /// Presentation color as a hex string.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Neutral => "#aaaaaa",
            Self::Success => "#4a9a4a",
            Self::InProgress => "#9a9a4a",
            Self::Failure => "#9a4a4a",
        }
    }
}

/// A short human-readable status plus its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub text: String,
    pub severity: Severity,
}

impl StatusLine {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new(INITIAL_STATUS, Severity::Neutral)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.text)
    }
}

/// Shared holder of the current [`StatusLine`].
///
/// Cheap to clone; all clones see the same line.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    line: Arc<Mutex<StatusLine>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status line.
    pub fn set(&self, text: impl Into<String>, severity: Severity) {
        let line = StatusLine::new(text, severity);
        debug!(status = %line.text, ?severity, "status updated");
        *self.lock() = line;
    }

    /// Current status line.
    pub fn current(&self) -> StatusLine {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatusLine> {
        self.line.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Applies immediate events straight to the status board.
#[derive(Debug, Clone)]
pub struct ImmediateDispatcher {
    status: StatusBoard,
}

impl ImmediateDispatcher {
    pub fn new(status: StatusBoard) -> Self {
        Self { status }
    }

    /// Apply an immediate event. Returns `false` (and changes nothing) for
    /// kinds that are not status/control events.
    pub fn dispatch(&self, event: &Event) -> bool {
        match &event.kind {
            EventKind::SystemReady => {
                self.status.set("Connected! Ready to start.", Severity::Success);
            }
            EventKind::SimulationStart => {
                self.status.set("Simulation running...", Severity::InProgress);
            }
            EventKind::Error => {
                warn!(agent_id = %event.agent_id, error = event.error_message(), "upstream error event");
                self.status
                    .set(format!("Error: {}", event.error_message()), Severity::Failure);
            }
            _ => return false,
        }
        true
    }

    /// Surface a message that could not be parsed.
    pub fn report_malformed(&self, err: &PixelgraphError) {
        warn!(error = %err, "malformed inbound message");
        self.status.set(format!("Error: {err}"), Severity::Failure);
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }
}
