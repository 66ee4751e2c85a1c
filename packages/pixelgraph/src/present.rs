//! Presentation backend interface.
//!
//! The stage never draws anything itself. For every agent it asks the
//! [`Presenter`] for an [`AgentView`] and drives that view through a small
//! capability set. One presenter implementation exists per backend (a
//! sprite renderer, a terminal, a structured log, a test recorder).
//!
//! Every call is synchronous and made while the stage applies a transition.
//! Returning `Err` aborts the current action; the action queue logs the
//! fault and moves on to the next event.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::agent::{Agent, ToolIcon};

/// Factory for per-agent views.
pub trait Presenter: Send + Sync + 'static {
    /// Create the view for an agent the stage has just met.
    ///
    /// `slot` is the agent's position in creation order, for layout.
    fn create_view(&self, agent: &Agent, slot: usize) -> Result<Box<dyn AgentView>>;
}

/// Rendering capabilities for one agent.
pub trait AgentView: Send {
    /// Clear bubbles and tool icons, show the resting pose.
    fn render_idle(&mut self) -> Result<()>;

    /// Show the thinking bubble.
    fn render_thinking(&mut self) -> Result<()>;

    /// Show a speech bubble with `text` for `duration`.
    fn render_speaking(&mut self, text: &str, duration: Duration) -> Result<()>;

    /// Show a tool icon.
    fn render_tool(&mut self, icon: ToolIcon, name: &str) -> Result<()>;

    /// Remove the tool icon.
    fn clear_tool(&mut self) -> Result<()>;

    /// Restore full size and opacity.
    fn render_idle_reset(&mut self) -> Result<()>;

    /// Emphasize (`true`) or de-emphasize (`false`) the agent.
    fn render_focus(&mut self, focused: bool) -> Result<()>;
}

// =============================================================================
// Tracing Presenter
// =============================================================================

/// Backend that renders by emitting structured `tracing` events.
///
/// Used by the replay CLI, and handy for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn create_view(&self, agent: &Agent, slot: usize) -> Result<Box<dyn AgentView>> {
        info!(agent_id = %agent.id, display_name = %agent.display_name, slot, "agent enters stage");
        Ok(Box::new(TracingView {
            agent_id: agent.id.clone(),
            display_name: agent.display_name.clone(),
        }))
    }
}

struct TracingView {
    agent_id: String,
    display_name: String,
}

impl AgentView for TracingView {
    fn render_idle(&mut self) -> Result<()> {
        info!(agent_id = %self.agent_id, "{} is idle", self.display_name);
        Ok(())
    }

    fn render_thinking(&mut self) -> Result<()> {
        info!(agent_id = %self.agent_id, "{} is thinking...", self.display_name);
        Ok(())
    }

    fn render_speaking(&mut self, text: &str, duration: Duration) -> Result<()> {
        info!(
            agent_id = %self.agent_id,
            duration_ms = duration.as_millis() as u64,
            "{} says: {}",
            self.display_name,
            text
        );
        Ok(())
    }

    fn render_tool(&mut self, icon: ToolIcon, name: &str) -> Result<()> {
        info!(agent_id = %self.agent_id, tool = name, "{} {} uses {}", icon.glyph(), self.display_name, name);
        Ok(())
    }

    fn clear_tool(&mut self) -> Result<()> {
        info!(agent_id = %self.agent_id, "{} puts the tool away", self.display_name);
        Ok(())
    }

    fn render_idle_reset(&mut self) -> Result<()> {
        debug!(agent_id = %self.agent_id, "prominence restored");
        Ok(())
    }

    fn render_focus(&mut self, focused: bool) -> Result<()> {
        debug!(agent_id = %self.agent_id, focused, "focus changed");
        Ok(())
    }
}
