//! Inbound event model.
//!
//! An [`Event`] is an immutable fact emitted upstream by the agent backend:
//! "agent `a` started thinking", "tool `search` finished", and so on. Events
//! arrive as one JSON object per message:
//!
//! ```text
//! { "event_id": "...", "timestamp": "...", "type": "AGENT_SPEAK",
//!   "agent_id": "wizard", "data": { "content": "hi" } }
//! ```
//!
//! # Arrival Order Is Authoritative
//!
//! `timestamp` is advisory only. Nothing in pixelgraph sorts by it; the order
//! in which events are published is the order in which they are played.
//!
//! # Open Payloads
//!
//! `data` is an open mapping whose shape depends on `type`. Missing or
//! wrongly-typed keys are never errors: the typed accessors
//! ([`Event::content`], [`Event::tool_name`], ...) fall back to defaults.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PixelgraphError;

/// Speech shown when an `AGENT_SPEAK` event carries no content.
pub const DEFAULT_SPEECH: &str = "Hello!";

/// Tool label used when a `TOOL_START` event does not name its tool.
pub const DEFAULT_TOOL_NAME: &str = "tool";

/// Message used when an `ERROR` event does not carry one.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

// =============================================================================
// Event Kind
// =============================================================================

/// The closed set of recognized event kinds.
///
/// Any other `type` string is accepted and preserved as
/// [`EventKind::Unknown`]; it is never rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    AgentThinkStart,
    AgentSpeak,
    AgentIdle,
    ToolStart,
    ToolEnd,
    SystemReady,
    SimulationStart,
    SimulationEnd,
    Error,
    /// A `type` string pixelgraph does not recognize.
    Unknown(String),
}

impl EventKind {
    /// Every recognized kind, in wire-protocol order.
    pub const RECOGNIZED: [EventKind; 9] = [
        EventKind::AgentThinkStart,
        EventKind::AgentSpeak,
        EventKind::AgentIdle,
        EventKind::ToolStart,
        EventKind::ToolEnd,
        EventKind::SystemReady,
        EventKind::SimulationStart,
        EventKind::SimulationEnd,
        EventKind::Error,
    ];

    /// Parse a wire `type` string.
    pub fn parse(value: &str) -> Self {
        match value {
            "AGENT_THINK_START" => Self::AgentThinkStart,
            "AGENT_SPEAK" => Self::AgentSpeak,
            "AGENT_IDLE" => Self::AgentIdle,
            "TOOL_START" => Self::ToolStart,
            "TOOL_END" => Self::ToolEnd,
            "SYSTEM_READY" => Self::SystemReady,
            "SIMULATION_START" => Self::SimulationStart,
            "SIMULATION_END" => Self::SimulationEnd,
            "ERROR" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The wire `type` string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentThinkStart => "AGENT_THINK_START",
            Self::AgentSpeak => "AGENT_SPEAK",
            Self::AgentIdle => "AGENT_IDLE",
            Self::ToolStart => "TOOL_START",
            Self::ToolEnd => "TOOL_END",
            Self::SystemReady => "SYSTEM_READY",
            Self::SimulationStart => "SIMULATION_START",
            Self::SimulationEnd => "SIMULATION_END",
            Self::Error => "ERROR",
            Self::Unknown(other) => other,
        }
    }

    /// Returns `false` only for [`EventKind::Unknown`].
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match Self::parse(&value) {
            Self::Unknown(_) => Self::Unknown(value),
            known => known,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable, typed notification of something that happened upstream.
///
/// Listeners and handlers only ever see `&Event` or an owned clone, so an
/// event cannot be altered once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique per event; used for keying in presentation, not for ordering.
    pub event_id: String,
    /// Advisory ISO-8601 timestamp. Empty when the producer omitted it.
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Target agent. May name an agent the stage has never seen.
    pub agent_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Create an event with a fresh id and the current UTC time.
    pub fn new(kind: impl Into<EventKind>, agent_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            kind: kind.into(),
            agent_id: agent_id.into(),
            data: Map::new(),
        }
    }

    /// Add a payload entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Parse one inbound message.
    pub fn from_json(raw: &str) -> Result<Self, PixelgraphError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize back to the wire format.
    pub fn to_json(&self) -> Result<String, PixelgraphError> {
        serde_json::to_string(self).map_err(PixelgraphError::Encode)
    }

    /// The advisory timestamp, if it parses as RFC 3339.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// A string payload entry. Absent or non-string values read as `None`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Speech content of an `AGENT_SPEAK` event.
    pub fn content(&self) -> &str {
        non_empty(self.data_str("content")).unwrap_or(DEFAULT_SPEECH)
    }

    /// Tool named by a `TOOL_START` event.
    pub fn tool_name(&self) -> &str {
        non_empty(self.data_str("tool_name")).unwrap_or(DEFAULT_TOOL_NAME)
    }

    /// Optional result preview of a `TOOL_END` event.
    pub fn result_preview(&self) -> Option<&str> {
        non_empty(self.data_str("result_preview"))
    }

    /// User input echoed by a `SIMULATION_START` event.
    pub fn input(&self) -> &str {
        self.data_str("input").unwrap_or("")
    }

    /// Message carried by an `ERROR` event.
    pub fn error_message(&self) -> &str {
        non_empty(self.data_str("error")).unwrap_or(DEFAULT_ERROR_MESSAGE)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_message() {
        let raw = r#"{
            "event_id": "e-1",
            "timestamp": "2024-05-01T12:00:00Z",
            "type": "AGENT_SPEAK",
            "agent_id": "wizard",
            "data": {"content": "The answer is 42."}
        }"#;

        let event = Event::from_json(raw).unwrap();
        assert_eq!(event.event_id, "e-1");
        assert_eq!(event.kind, EventKind::AgentSpeak);
        assert_eq!(event.agent_id, "wizard");
        assert_eq!(event.content(), "The answer is 42.");
        assert!(event.timestamp_utc().is_some());
    }

    #[test]
    fn test_unknown_type_is_accepted() {
        let raw = r#"{"event_id":"e","timestamp":"","type":"UNKNOWN_FOO","agent_id":"a","data":{}}"#;
        let event = Event::from_json(raw).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("UNKNOWN_FOO".to_string()));
        assert!(!event.kind.is_recognized());
        assert_eq!(event.kind.to_string(), "UNKNOWN_FOO");
    }

    #[test]
    fn test_missing_data_and_timestamp_default() {
        let raw = r#"{"event_id":"e","type":"TOOL_START","agent_id":"a"}"#;
        let event = Event::from_json(raw).unwrap();
        assert!(event.data.is_empty());
        assert_eq!(event.timestamp, "");
        assert!(event.timestamp_utc().is_none());
        assert_eq!(event.tool_name(), DEFAULT_TOOL_NAME);
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let raw = r#"{"event_id":"e","type":"AGENT_IDLE"}"#;
        let err = Event::from_json(raw).unwrap_err();
        assert!(matches!(err, PixelgraphError::MalformedEvent(_)));

        let err = Event::from_json("not json").unwrap_err();
        assert!(matches!(err, PixelgraphError::MalformedEvent(_)));
    }

    #[test]
    fn test_accessor_defaults() {
        let event = Event::new(EventKind::AgentSpeak, "a")
            .with_data("content", "")
            .with_data("error", json!(17));

        assert_eq!(event.content(), DEFAULT_SPEECH);
        assert_eq!(event.error_message(), DEFAULT_ERROR_MESSAGE);
        assert_eq!(event.input(), "");
        assert_eq!(event.result_preview(), None);
    }

    #[test]
    fn test_kind_wire_names_are_stable() {
        for kind in EventKind::RECOGNIZED {
            assert!(kind.is_recognized());
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_serialize_uses_type_key() {
        let event = Event::new(EventKind::SimulationStart, "system").with_data("input", "hi");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "SIMULATION_START");
        assert_eq!(value["data"]["input"], "hi");
    }

    #[test]
    fn test_new_generates_unique_ids() {
        let a = Event::new(EventKind::AgentIdle, "a");
        let b = Event::new(EventKind::AgentIdle, "a");
        assert_ne!(a.event_id, b.event_id);
        assert!(a.timestamp_utc().is_some());
    }
}
