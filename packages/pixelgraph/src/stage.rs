//! Agent visual state machine.
//!
//! The [`Stage`] is the action handler behind the queue. Each queued event
//! becomes one time-extended step:
//!
//! ```text
//!            ┌──────── synchronous, under the stage lock ────────┐
//! action ──► get-or-create agent ──► focus pass ──► transition ──► notices
//!                                                                    │
//!            ┌──────────── awaited by the queue ─────────────┐       │
//!            └──────────────── sleep(delay) ◄────────────────┘◄──────┘
//! ```
//!
//! Every mutation happens before the first suspension point, so an event
//! enqueued while an action sleeps can never interleave with a half-applied
//! transition.
//!
//! # Transitions
//!
//! | Event               | Effect                                          | Delay          |
//! |---------------------|-------------------------------------------------|----------------|
//! | `AGENT_THINK_START` | agent → thinking                                | `think`        |
//! | `AGENT_SPEAK`       | agent → speaking, bubble shows content          | speak duration |
//! | `TOOL_START`        | agent → using_tool, tool icon shown             | `tool_start`   |
//! | `TOOL_END`          | tool cleared, agent → thinking                  | `tool_end`     |
//! | `AGENT_IDLE`        | every agent → idle at full prominence           | `idle`         |
//! | `SIMULATION_END`    | every agent → idle at full prominence           | none           |
//! | anything else       | no transition, diagnostic recorded              | none           |
//!
//! Before any of these, the focus pass marks the event's agent focused and
//! every other agent unfocused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentState, Prominence, ToolDisplay, ToolIcon};
use crate::bus::EventBus;
use crate::core::{Event, EventKind};
use crate::present::{AgentView, Presenter};
use crate::queue::{Action, ActionHandler};
use crate::status::{Severity, StatusBoard};

// =============================================================================
// Timings
// =============================================================================

/// Transition delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Pause after entering `thinking`.
    pub think: Duration,
    /// Pause after a tool icon appears.
    pub tool_start: Duration,
    /// Pause after a tool icon is cleared.
    pub tool_end: Duration,
    /// Pause after everyone returns to idle.
    pub idle: Duration,
    /// Shortest time a speech bubble is shown.
    pub speak_base: Duration,
    /// Extra display time per character of speech.
    pub speak_per_char: Duration,
    /// Longest time a speech bubble is shown.
    pub speak_max: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            think: Duration::from_millis(500),
            tool_start: Duration::from_millis(800),
            tool_end: Duration::from_millis(300),
            idle: Duration::from_millis(200),
            speak_base: Duration::from_millis(1000),
            speak_per_char: Duration::from_millis(50),
            speak_max: Duration::from_millis(5000),
        }
    }
}

impl Timings {
    /// All delays zero.
    pub fn instant() -> Self {
        Self {
            think: Duration::ZERO,
            tool_start: Duration::ZERO,
            tool_end: Duration::ZERO,
            idle: Duration::ZERO,
            speak_base: Duration::ZERO,
            speak_per_char: Duration::ZERO,
            speak_max: Duration::ZERO,
        }
    }

    /// How long `content` stays on screen.
    ///
    /// `min(speak_base + chars × speak_per_char, speak_max)`: non-decreasing
    /// in length and never above `speak_max`.
    pub fn speak_duration(&self, content: &str) -> Duration {
        let chars = u32::try_from(content.chars().count()).unwrap_or(u32::MAX);
        self.speak_base
            .saturating_add(self.speak_per_char.saturating_mul(chars))
            .min(self.speak_max)
    }

    /// Play `factor` times faster. Non-positive or non-finite factors
    /// leave the timings unchanged; delays that would overflow saturate at
    /// [`Duration::MAX`].
    pub fn scaled(&self, factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return *self;
        }
        let scale = |d: Duration| {
            Duration::try_from_secs_f64(d.as_secs_f64() / factor).unwrap_or(Duration::MAX)
        };
        Self {
            think: scale(self.think),
            tool_start: scale(self.tool_start),
            tool_end: scale(self.tool_end),
            idle: scale(self.idle),
            speak_base: scale(self.speak_base),
            speak_per_char: scale(self.speak_per_char),
            speak_max: scale(self.speak_max),
        }
    }
}

// =============================================================================
// Notices and Diagnostics
// =============================================================================

/// Published on [`Stage::notices`] as transitions happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum StageNotice {
    /// An agent was created.
    Joined {
        agent_id: String,
        display_name: String,
    },
    /// The focus pass ran for this agent.
    Focused { agent_id: String },
    /// An agent's visual state changed.
    Transition {
        agent_id: String,
        from: AgentState,
        to: AgentState,
    },
    /// A queued event had no transition.
    Unrecognized { agent_id: String, kind: String },
}

/// Record of a queued event the stage had no transition for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub event_id: String,
    pub agent_id: String,
    pub kind: String,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Stage
// =============================================================================

struct Slot {
    agent: Agent,
    view: Box<dyn AgentView>,
}

impl Slot {
    fn set_state(&mut self, to: AgentState, notices: &mut Vec<StageNotice>) {
        let from = self.agent.state;
        self.agent.state = to;
        if from != to {
            notices.push(StageNotice::Transition {
                agent_id: self.agent.id.clone(),
                from,
                to,
            });
        }
    }
}

#[derive(Default)]
struct StageState {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    diagnostics: Vec<Diagnostic>,
}

/// Owner of every agent's visual state.
pub struct Stage {
    state: Mutex<StageState>,
    presenter: Arc<dyn Presenter>,
    timings: Timings,
    status: StatusBoard,
    notices: EventBus<StageNotice>,
}

impl Stage {
    pub fn new(presenter: Arc<dyn Presenter>, status: StatusBoard, timings: Timings) -> Self {
        Self {
            state: Mutex::new(StageState::default()),
            presenter,
            timings,
            status,
            notices: EventBus::new(),
        }
    }

    /// Put an agent on stage ahead of its first event, with a display name.
    ///
    /// Renames the agent if it already exists.
    pub fn seed(&self, agent_id: &str, display_name: &str) -> Result<()> {
        let mut notices = Vec::new();
        let result = {
            let mut state = self.lock();
            match state.index.get(agent_id).copied() {
                Some(idx) => {
                    state.slots[idx].agent.display_name = display_name.to_string();
                    Ok(())
                }
                None => self
                    .create_slot(&mut state, agent_id, display_name, &mut notices)
                    .map(|_| ()),
            }
        };
        self.publish(&notices);
        result
    }

    /// Apply the synchronous part of a queued event and return how long the
    /// action should last.
    pub fn apply(&self, event: &Event) -> Result<Duration> {
        let mut notices = Vec::new();
        let result = {
            let mut state = self.lock();
            self.apply_locked(&mut state, event, &mut notices)
        };
        self.publish(&notices);
        result
    }

    fn apply_locked(
        &self,
        state: &mut StageState,
        event: &Event,
        notices: &mut Vec<StageNotice>,
    ) -> Result<Duration> {
        let idx = match state.index.get(&event.agent_id).copied() {
            Some(idx) => idx,
            None => self.create_slot(state, &event.agent_id, &event.agent_id, notices)?,
        };
        focus(state, idx, notices);

        let delay = match &event.kind {
            EventKind::AgentThinkStart => {
                let slot = &mut state.slots[idx];
                slot.view.render_thinking()?;
                slot.agent.speech = None;
                slot.set_state(AgentState::Thinking, notices);
                self.timings.think
            }
            EventKind::AgentSpeak => {
                let content = event.content();
                let duration = self.timings.speak_duration(content);
                let slot = &mut state.slots[idx];
                slot.view.render_speaking(content, duration)?;
                slot.agent.speech = Some(content.to_string());
                slot.set_state(AgentState::Speaking, notices);
                duration
            }
            EventKind::ToolStart => {
                let name = event.tool_name();
                let icon = ToolIcon::from_tool_name(name);
                let slot = &mut state.slots[idx];
                slot.view.render_tool(icon, name)?;
                slot.agent.tool = Some(ToolDisplay {
                    name: name.to_string(),
                    icon,
                });
                slot.set_state(AgentState::UsingTool, notices);
                self.status
                    .set(format!("Using tool: {name}"), Severity::InProgress);
                self.timings.tool_start
            }
            EventKind::ToolEnd => {
                let slot = &mut state.slots[idx];
                slot.view.clear_tool()?;
                slot.agent.tool = None;
                slot.set_state(AgentState::Thinking, notices);
                self.status.set("Tool complete", Severity::InProgress);
                self.timings.tool_end
            }
            EventKind::AgentIdle => {
                reset_all(state, notices);
                self.timings.idle
            }
            EventKind::SimulationEnd => {
                reset_all(state, notices);
                self.status.set("Simulation complete!", Severity::Success);
                Duration::ZERO
            }
            other => {
                // Immediate kinds only get here if a caller bypassed the classifier
                warn!(
                    event_id = %event.event_id,
                    agent_id = %event.agent_id,
                    kind = %other,
                    "no stage transition for event kind"
                );
                state.diagnostics.push(Diagnostic {
                    event_id: event.event_id.clone(),
                    agent_id: event.agent_id.clone(),
                    kind: other.to_string(),
                    recorded_at: Utc::now(),
                });
                notices.push(StageNotice::Unrecognized {
                    agent_id: event.agent_id.clone(),
                    kind: other.to_string(),
                });
                Duration::ZERO
            }
        };

        debug!(
            event_id = %event.event_id,
            agent_id = %event.agent_id,
            kind = %event.kind,
            delay_ms = delay.as_millis() as u64,
            "transition applied"
        );
        Ok(delay)
    }

    fn create_slot(
        &self,
        state: &mut StageState,
        agent_id: &str,
        display_name: &str,
        notices: &mut Vec<StageNotice>,
    ) -> Result<usize> {
        let agent = Agent::new(agent_id, display_name);
        let idx = state.slots.len();
        let view = self.presenter.create_view(&agent, idx)?;

        info!(agent_id, display_name, slot = idx, "agent created");
        notices.push(StageNotice::Joined {
            agent_id: agent_id.to_string(),
            display_name: display_name.to_string(),
        });
        state.index.insert(agent_id.to_string(), idx);
        state.slots.push(Slot { agent, view });
        Ok(idx)
    }

    fn publish(&self, notices: &[StageNotice]) {
        for notice in notices {
            self.notices.publish(notice);
        }
    }

    // -------------------------------------------------------------------------
    // Read-only queries
    // -------------------------------------------------------------------------

    /// Snapshot of one agent.
    pub fn agent(&self, agent_id: &str) -> Option<Agent> {
        let state = self.lock();
        state
            .index
            .get(agent_id)
            .map(|&idx| state.slots[idx].agent.clone())
    }

    /// Snapshot of every agent, in creation order.
    pub fn agents(&self) -> Vec<Agent> {
        self.lock()
            .slots
            .iter()
            .map(|slot| slot.agent.clone())
            .collect()
    }

    /// Id of the focused agent, if any.
    pub fn focused(&self) -> Option<String> {
        self.lock()
            .slots
            .iter()
            .find(|slot| slot.agent.focused)
            .map(|slot| slot.agent.id.clone())
    }

    /// Events that had no transition.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().diagnostics.clone()
    }

    pub fn agent_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Bus of [`StageNotice`]s for rendering collaborators.
    pub fn notices(&self) -> &EventBus<StageNotice> {
        &self.notices
    }

    fn lock(&self) -> MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ActionHandler for Stage {
    async fn handle(&self, action: Action) -> Result<()> {
        let delay = self.apply(action.event())?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("agent_count", &self.agent_count())
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

/// Focus `idx`, de-emphasize everyone else.
///
/// A view that fails to redraw is logged and skipped. The focus flags are
/// committed for every agent regardless, so exactly one agent is focused.
fn focus(state: &mut StageState, idx: usize, notices: &mut Vec<StageNotice>) {
    for (i, slot) in state.slots.iter_mut().enumerate() {
        if let Err(e) = slot.view.render_focus(i == idx) {
            warn!(agent_id = %slot.agent.id, error = %e, "focus render failed");
        }
    }
    for (i, slot) in state.slots.iter_mut().enumerate() {
        let focused = i == idx;
        slot.agent.focused = focused;
        slot.agent.prominence = if focused {
            Prominence::Emphasized
        } else {
            Prominence::Dimmed
        };
    }
    notices.push(StageNotice::Focused {
        agent_id: state.slots[idx].agent.id.clone(),
    });
}

/// Every agent back to idle at full prominence.
///
/// Failing views are logged and skipped; the reset itself always lands.
fn reset_all(state: &mut StageState, notices: &mut Vec<StageNotice>) {
    for slot in &mut state.slots {
        let rendered = slot
            .view
            .render_idle()
            .and_then(|()| slot.view.render_idle_reset());
        if let Err(e) = rendered {
            warn!(agent_id = %slot.agent.id, error = %e, "idle render failed");
        }
        let from = slot.agent.state;
        slot.agent.reset();
        if from != AgentState::Idle {
            notices.push(StageNotice::Transition {
                agent_id: slot.agent.id.clone(),
                from,
                to: AgentState::Idle,
            });
        }
    }
}
