//! Bounded, categorized log of every inbound event.
//!
//! The log observes the bus directly, so it records events in publish order
//! regardless of whether they are applied immediately or wait in the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{Event, EventKind};

/// Default number of entries kept.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Presentation category of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Speak,
    Think,
    Tool,
    Error,
    System,
    Default,
}

impl LogCategory {
    pub fn of(kind: &EventKind) -> Self {
        match kind {
            EventKind::AgentSpeak => Self::Speak,
            EventKind::AgentThinkStart => Self::Think,
            EventKind::ToolStart | EventKind::ToolEnd => Self::Tool,
            EventKind::Error => Self::Error,
            EventKind::SystemReady | EventKind::SimulationStart | EventKind::SimulationEnd => {
                Self::System
            }
            _ => Self::Default,
        }
    }
}

/// One-line human summary of an event.
pub fn summarize(event: &Event) -> String {
    match &event.kind {
        EventKind::AgentSpeak => event.data_str("content").unwrap_or_default().to_string(),
        EventKind::AgentThinkStart => "Processing...".to_string(),
        EventKind::ToolStart => format!("Using {}...", event.tool_name()),
        EventKind::ToolEnd => format!("Result: {}", event.result_preview().unwrap_or("Done")),
        EventKind::Error => event.error_message().to_string(),
        EventKind::SystemReady => "System ready!".to_string(),
        EventKind::SimulationStart => format!("Input: \"{}\"", event.input()),
        EventKind::SimulationEnd => "Simulation complete".to_string(),
        EventKind::AgentIdle | EventKind::Unknown(_) => {
            serde_json::Value::Object(event.data.clone()).to_string()
        }
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub event_id: String,
    pub agent_id: String,
    pub kind: String,
    pub category: LogCategory,
    pub summary: String,
    pub received_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.event_id.clone(),
            agent_id: event.agent_id.clone(),
            kind: event.kind.to_string(),
            category: LogCategory::of(&event.kind),
            summary: summarize(event),
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.agent_id, self.kind, self.summary)
    }
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    total: u64,
}

/// Ring buffer of [`LogEntry`]s. Oldest entries are evicted first.
///
/// Cheap to clone; all clones share the same buffer.
#[derive(Debug, Clone)]
pub struct EventLog {
    state: Arc<Mutex<LogState>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                capacity,
                total: 0,
            })),
        }
    }

    /// Append an entry for `event`, evicting the oldest if full.
    pub fn record(&self, event: &Event) -> LogEntry {
        let entry = LogEntry::from_event(event);
        let mut state = self.lock();
        state.total += 1;
        if state.capacity == 0 {
            return entry;
        }
        while state.entries.len() >= state.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry.clone());
        entry
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let state = self.lock();
        let skip = state.entries.len().saturating_sub(n);
        state.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Events recorded since creation, evicted ones included.
    pub fn total_recorded(&self) -> u64 {
        self.lock().total
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_categories() {
        assert_eq!(LogCategory::of(&EventKind::AgentSpeak), LogCategory::Speak);
        assert_eq!(LogCategory::of(&EventKind::AgentThinkStart), LogCategory::Think);
        assert_eq!(LogCategory::of(&EventKind::ToolEnd), LogCategory::Tool);
        assert_eq!(LogCategory::of(&EventKind::Error), LogCategory::Error);
        assert_eq!(LogCategory::of(&EventKind::SimulationEnd), LogCategory::System);
        assert_eq!(LogCategory::of(&EventKind::AgentIdle), LogCategory::Default);
        assert_eq!(
            LogCategory::of(&EventKind::parse("UNKNOWN_FOO")),
            LogCategory::Default
        );
    }

    #[test]
    fn test_summaries() {
        assert_eq!(summarize(&testing::speak("a", "hi there")), "hi there");
        assert_eq!(summarize(&Event::new(EventKind::AgentSpeak, "a")), "");
        assert_eq!(summarize(&testing::think("a")), "Processing...");
        assert_eq!(summarize(&testing::tool_start("a", "search")), "Using search...");
        assert_eq!(summarize(&testing::tool_end("a")), "Result: Done");
        assert_eq!(
            summarize(&testing::tool_end("a").with_data("result_preview", "42")),
            "Result: 42"
        );
        assert_eq!(summarize(&testing::error("boom")), "boom");
        assert_eq!(summarize(&testing::system_ready()), "System ready!");
        assert_eq!(summarize(&testing::simulation_start("2+2")), "Input: \"2+2\"");
        assert_eq!(summarize(&testing::simulation_end("a")), "Simulation complete");
        assert_eq!(
            summarize(&testing::unknown("UNKNOWN_FOO", "a").with_data("x", 1)),
            r#"{"x":1}"#
        );
    }

    #[test]
    fn test_bounded_eviction() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.record(&testing::speak("a", &format!("m{i}")));
        }

        let summaries: Vec<String> = log.entries().into_iter().map(|e| e.summary).collect();
        assert_eq!(summaries, vec!["m2", "m3", "m4"]);
        assert_eq!(log.total_recorded(), 5);
        assert_eq!(log.tail(2).len(), 2);
        assert_eq!(log.tail(2)[1].summary, "m4");
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let log = EventLog::new(0);
        log.record(&testing::think("a"));
        assert!(log.is_empty());
        assert_eq!(log.total_recorded(), 1);
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry::from_event(&testing::tool_start("wizard", "code"));
        assert_eq!(entry.to_string(), "[wizard] TOOL_START Using code...");
    }
}
