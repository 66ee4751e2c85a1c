//! Outbound control messages.
//!
//! The only message the viewer ever sends upstream asks the backend to start
//! a run with the user's input:
//!
//! ```text
//! {"type":"START_SIMULATION","input":"What is 2+2?"}
//! ```
//!
//! The transport itself (socket, reconnect policy) lives outside pixelgraph
//! behind the [`Transport`] trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PixelgraphError;

/// Message sent from the viewer to the agent backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    StartSimulation { input: String },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, PixelgraphError> {
        serde_json::to_string(self).map_err(PixelgraphError::Encode)
    }
}

/// Connection lifecycle as seen by the viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// Short label for a heads-up display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "CONNECTED",
            Self::Connecting | Self::Closed => "CONNECTING...",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outbound half of the upstream connection.
#[async_trait]
pub trait Transport: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Send one serialized message.
    async fn send(&self, payload: String) -> anyhow::Result<()>;
}

/// What [`submit_input`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Sent,
    SkippedEmpty,
    SkippedNotOpen,
}

/// Ask the backend to start a run with `input`.
///
/// The input is trimmed; nothing is sent when it is empty or the transport
/// is not open.
pub async fn submit_input<T>(transport: &T, input: &str) -> Result<Submission, PixelgraphError>
where
    T: Transport + ?Sized,
{
    let input = input.trim();
    if input.is_empty() {
        debug!("empty input, nothing to submit");
        return Ok(Submission::SkippedEmpty);
    }
    let state = transport.state();
    if state != ConnectionState::Open {
        debug!(?state, "transport not open, input not submitted");
        return Ok(Submission::SkippedNotOpen);
    }

    let payload = ControlMessage::StartSimulation {
        input: input.to_string(),
    }
    .to_json()?;
    transport
        .send(payload)
        .await
        .map_err(PixelgraphError::Transport)?;

    info!(input, "simulation requested");
    Ok(Submission::Sent)
}
