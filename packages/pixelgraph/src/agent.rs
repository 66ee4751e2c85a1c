//! Per-agent visual state.

use std::fmt;

use serde::Serialize;

/// Visual state of one agent. `Idle` is initial, and every other state
/// eventually returns to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Thinking,
    Speaking,
    UsingTool,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::UsingTool => "using_tool",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How visually prominent an agent is drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prominence {
    /// The focused agent: scaled up.
    Emphasized,
    /// Normal size and opacity.
    #[default]
    Full,
    /// Unfocused while another agent acts: faded.
    Dimmed,
}

/// Icon shown above an agent while it uses a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolIcon {
    Search,
    WebSearch,
    Calculator,
    Code,
    File,
    /// Fallback for tool names without a dedicated icon.
    Generic,
}

impl ToolIcon {
    /// Map a tool name (case-insensitive) to its icon.
    pub fn from_tool_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "search" => Self::Search,
            "web_search" => Self::WebSearch,
            "calculator" => Self::Calculator,
            "code" => Self::Code,
            "file" => Self::File,
            _ => Self::Generic,
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Search => "\u{1F50D}",
            Self::WebSearch => "\u{1F310}",
            Self::Calculator => "\u{1F9EE}",
            Self::Code => "\u{1F4BB}",
            Self::File => "\u{1F4C4}",
            Self::Generic => "\u{1F527}",
        }
    }
}

/// Tool currently displayed by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDisplay {
    pub name: String,
    pub icon: ToolIcon,
}

/// Snapshot of one agent on stage.
///
/// Agents are created lazily the first time an event names them and live
/// for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub state: AgentState,
    /// Advisory: marks the agent the latest queued event was about.
    pub focused: bool,
    pub prominence: Prominence,
    pub tool: Option<ToolDisplay>,
    pub speech: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            state: AgentState::Idle,
            focused: false,
            prominence: Prominence::Full,
            tool: None,
            speech: None,
        }
    }

    /// Reset to idle at full prominence, clearing speech and tool.
    /// The focus flag is left alone.
    pub(crate) fn reset(&mut self) {
        self.state = AgentState::Idle;
        self.prominence = Prominence::Full;
        self.tool = None;
        self.speech = None;
    }
}
