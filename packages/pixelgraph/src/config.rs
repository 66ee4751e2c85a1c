//! Engine configuration from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::PixelgraphError;
use crate::log::DEFAULT_LOG_CAPACITY;
use crate::queue::{QueueConfig, DEFAULT_ACTION_TIMEOUT};
use crate::stage::Timings;

/// Roster used when `PIXELGRAPH_AGENTS` is unset.
pub const DEFAULT_ROSTER: &str = "wizard=Wizard";

/// An agent placed on stage before any event names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
}

impl FromStr for RosterEntry {
    type Err = PixelgraphError;

    /// Parse `id` or `id=Display Name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = match s.split_once('=') {
            Some((id, name)) => (id.trim(), name.trim()),
            None => (s.trim(), s.trim()),
        };
        if id.is_empty() {
            return Err(PixelgraphError::config(
                "PIXELGRAPH_AGENTS",
                format!("empty agent id in {s:?}"),
            ));
        }
        Ok(Self {
            id: id.to_string(),
            display_name: (if name.is_empty() { id } else { name }).to_string(),
        })
    }
}

/// Parse a comma-separated roster. Blank items are skipped.
pub fn parse_roster(value: &str) -> Result<Vec<RosterEntry>, PixelgraphError> {
    value
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub timings: Timings,
    pub queue: QueueConfig,
    pub log_capacity: usize,
    pub roster: Vec<RosterEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            queue: QueueConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            roster: vec![RosterEntry {
                id: "wizard".into(),
                display_name: "Wizard".into(),
            }],
        }
    }
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// if present.
    pub fn from_env() -> Result<Self, PixelgraphError> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PixelgraphError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Timings::default();
        let millis = |key: &str, default: Duration| -> Result<Duration, PixelgraphError> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let timings = Timings {
            think: millis("PIXELGRAPH_THINK_MS", defaults.think)?,
            tool_start: millis("PIXELGRAPH_TOOL_START_MS", defaults.tool_start)?,
            tool_end: millis("PIXELGRAPH_TOOL_END_MS", defaults.tool_end)?,
            idle: millis("PIXELGRAPH_IDLE_MS", defaults.idle)?,
            speak_base: millis("PIXELGRAPH_SPEAK_BASE_MS", defaults.speak_base)?,
            speak_per_char: millis("PIXELGRAPH_SPEAK_PER_CHAR_MS", defaults.speak_per_char)?,
            speak_max: millis("PIXELGRAPH_SPEAK_MAX_MS", defaults.speak_max)?,
        };

        // 0 disables the timeout
        let action_timeout = match parse_var::<u64>(&lookup, "PIXELGRAPH_ACTION_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(DEFAULT_ACTION_TIMEOUT),
        };

        let log_capacity =
            parse_var::<usize>(&lookup, "PIXELGRAPH_LOG_CAPACITY")?.unwrap_or(DEFAULT_LOG_CAPACITY);

        let roster = parse_roster(
            &lookup("PIXELGRAPH_AGENTS").unwrap_or_else(|| DEFAULT_ROSTER.to_string()),
        )?;

        Ok(Self {
            timings,
            queue: QueueConfig { action_timeout },
            log_capacity,
            roster,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, PixelgraphError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PixelgraphError::config(key, format!("{raw:?}: {e}"))),
    }
}
