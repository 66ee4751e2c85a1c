//! Testing utilities for pixelgraph engines and presenters.
//!
//! # Feature Flag
//!
//! Available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! pixelgraph = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Recording What Was Drawn
//!
//! ```ignore
//! use pixelgraph::testing::{self, RecordingPresenter, ViewCall};
//!
//! let presenter = RecordingPresenter::new();
//! let handle = EngineBuilder::new(presenter.clone()).build().start();
//!
//! handle.publish(&testing::speak("wizard", "hi"));
//! handle.wait_idle().await;
//!
//! assert!(presenter.calls_for("wizard").iter().any(|c| matches!(c, ViewCall::Speaking { .. })));
//! ```
//!
//! # Waiting for Notices
//!
//! Tests should wait for meaning, not time. [`NoticeLatch`] counts down as
//! notices arrive:
//!
//! ```ignore
//! let latch = shared_latch(2);
//! handle.notices().subscribe({
//!     let latch = latch.clone();
//!     move |n: &StageNotice| if matches!(n, StageNotice::Transition { .. }) { latch.dec() }
//! });
//! handle.publish(&testing::think("a"));
//! handle.publish(&testing::speak("a", "hi"));
//! latch.await_zero().await;
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Notify;

use crate::agent::{Agent, ToolIcon};
use crate::core::{Event, EventKind};
use crate::present::{AgentView, Presenter};

// =============================================================================
// Event Constructors
// =============================================================================

pub fn think(agent_id: &str) -> Event {
    Event::new(EventKind::AgentThinkStart, agent_id)
}

pub fn speak(agent_id: &str, content: &str) -> Event {
    Event::new(EventKind::AgentSpeak, agent_id).with_data("content", content)
}

pub fn tool_start(agent_id: &str, tool_name: &str) -> Event {
    Event::new(EventKind::ToolStart, agent_id).with_data("tool_name", tool_name)
}

pub fn tool_end(agent_id: &str) -> Event {
    Event::new(EventKind::ToolEnd, agent_id)
}

pub fn idle(agent_id: &str) -> Event {
    Event::new(EventKind::AgentIdle, agent_id)
}

pub fn simulation_end(agent_id: &str) -> Event {
    Event::new(EventKind::SimulationEnd, agent_id)
}

pub fn system_ready() -> Event {
    Event::new(EventKind::SystemReady, "system")
}

pub fn simulation_start(input: &str) -> Event {
    Event::new(EventKind::SimulationStart, "system").with_data("input", input)
}

pub fn error(message: &str) -> Event {
    Event::new(EventKind::Error, "system").with_data("error", message)
}

/// An event whose `type` pixelgraph does not recognize.
pub fn unknown(kind: &str, agent_id: &str) -> Event {
    Event::new(kind, agent_id)
}

// =============================================================================
// Recording Presenter
// =============================================================================

/// One call made on a view, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCall {
    Created { agent_id: String, slot: usize },
    Idle { agent_id: String },
    Thinking { agent_id: String },
    Speaking {
        agent_id: String,
        text: String,
        duration: Duration,
    },
    Tool {
        agent_id: String,
        icon: ToolIcon,
        name: String,
    },
    ClearTool { agent_id: String },
    IdleReset { agent_id: String },
    Focus { agent_id: String, focused: bool },
}

impl ViewCall {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Created { agent_id, .. }
            | Self::Idle { agent_id }
            | Self::Thinking { agent_id }
            | Self::Speaking { agent_id, .. }
            | Self::Tool { agent_id, .. }
            | Self::ClearTool { agent_id }
            | Self::IdleReset { agent_id }
            | Self::Focus { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Debug, Default)]
struct Recording {
    calls: Mutex<Vec<ViewCall>>,
    failing: Mutex<HashSet<String>>,
}

impl Recording {
    fn record(&self, call: ViewCall) -> Result<()> {
        if self.failing.lock().unwrap().contains(call.agent_id()) {
            bail!("injected presenter failure for agent {}", call.agent_id());
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

/// Presenter that records every view call for assertions.
///
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    recording: Arc<Recording>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call, across all agents.
    pub fn calls(&self) -> Vec<ViewCall> {
        self.recording.calls.lock().unwrap().clone()
    }

    /// Calls made for one agent.
    pub fn calls_for(&self, agent_id: &str) -> Vec<ViewCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.agent_id() == agent_id)
            .collect()
    }

    /// Texts passed to `render_speaking`, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ViewCall::Speaking { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Make every call for `agent_id` fail from now on.
    pub fn fail_agent(&self, agent_id: &str) {
        self.recording
            .failing
            .lock()
            .unwrap()
            .insert(agent_id.to_string());
    }

    /// Stop failing calls for `agent_id`.
    pub fn heal_agent(&self, agent_id: &str) {
        self.recording.failing.lock().unwrap().remove(agent_id);
    }

    pub fn clear(&self) {
        self.recording.calls.lock().unwrap().clear();
    }
}

impl Presenter for RecordingPresenter {
    fn create_view(&self, agent: &Agent, slot: usize) -> Result<Box<dyn AgentView>> {
        self.recording.record(ViewCall::Created {
            agent_id: agent.id.clone(),
            slot,
        })?;
        Ok(Box::new(RecordingView {
            agent_id: agent.id.clone(),
            recording: self.recording.clone(),
        }))
    }
}

struct RecordingView {
    agent_id: String,
    recording: Arc<Recording>,
}

impl RecordingView {
    fn id(&self) -> String {
        self.agent_id.clone()
    }
}

impl AgentView for RecordingView {
    fn render_idle(&mut self) -> Result<()> {
        self.recording.record(ViewCall::Idle { agent_id: self.id() })
    }

    fn render_thinking(&mut self) -> Result<()> {
        self.recording
            .record(ViewCall::Thinking { agent_id: self.id() })
    }

    fn render_speaking(&mut self, text: &str, duration: Duration) -> Result<()> {
        self.recording.record(ViewCall::Speaking {
            agent_id: self.id(),
            text: text.to_string(),
            duration,
        })
    }

    fn render_tool(&mut self, icon: ToolIcon, name: &str) -> Result<()> {
        self.recording.record(ViewCall::Tool {
            agent_id: self.id(),
            icon,
            name: name.to_string(),
        })
    }

    fn clear_tool(&mut self) -> Result<()> {
        self.recording
            .record(ViewCall::ClearTool { agent_id: self.id() })
    }

    fn render_idle_reset(&mut self) -> Result<()> {
        self.recording
            .record(ViewCall::IdleReset { agent_id: self.id() })
    }

    fn render_focus(&mut self, focused: bool) -> Result<()> {
        self.recording.record(ViewCall::Focus {
            agent_id: self.id(),
            focused,
        })
    }
}

// =============================================================================
// Notice Latch
// =============================================================================

/// Countdown that lets a test wait for an exact number of occurrences.
#[derive(Debug)]
pub struct NoticeLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl NoticeLatch {
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Count one occurrence.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("NoticeLatch decremented below zero - more notices than expected");
        }
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero.
    pub async fn await_zero(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

/// `Arc::new(NoticeLatch::new(expected))`.
pub fn shared_latch(expected: usize) -> Arc<NoticeLatch> {
    Arc::new(NoticeLatch::new(expected))
}
