//! Structured error types for pixelgraph.
//!
//! `PixelgraphError` provides pattern-matchable errors at the crate's public
//! seams (parsing, configuration, transport, queue outcomes).
//!
//! # The Error Boundary Rule
//!
//! > **No error in this crate is fatal to the process.**
//!
//! - `anyhow` is internal transport for handler and presenter results
//! - A failed action is logged at the queue boundary and the drain moves on
//! - A malformed message becomes an error status line, not a crash
//!
//! # Example
//!
//! ```ignore
//! use pixelgraph::{EngineHandle, PixelgraphError};
//!
//! match handle.ingest(&line) {
//!     Ok(notified) => tracing::debug!(notified, "event published"),
//!     Err(PixelgraphError::MalformedEvent(e)) => tracing::warn!(error = %e, "dropped message"),
//!     Err(other) => tracing::warn!(error = %other, "ingest failed"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by pixelgraph APIs.
#[derive(Debug, Error)]
pub enum PixelgraphError {
    /// An inbound message failed to parse as the event schema.
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// A value failed to serialize to the wire format.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// An action did not settle within the configured limit and was abandoned.
    #[error("action #{sequence} did not settle within {limit:?}")]
    ActionTimedOut { sequence: u64, limit: Duration },

    /// An action panicked while running.
    #[error("action #{sequence} panicked: {message}")]
    ActionPanicked { sequence: u64, message: String },

    /// The transport collaborator failed to send a control message.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// A configuration value could not be interpreted.
    #[error("invalid configuration for {key}: {message}")]
    Config { key: String, message: String },
}

impl PixelgraphError {
    /// Build a configuration error for `key`.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised while running a queued action.
    pub fn is_action_fault(&self) -> bool {
        matches!(
            self,
            Self::ActionTimedOut { .. } | Self::ActionPanicked { .. }
        )
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PixelgraphError::ActionTimedOut {
            sequence: 7,
            limit: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "action #7 did not settle within 250ms");
        assert!(err.is_action_fault());

        let err = PixelgraphError::config("PIXELGRAPH_THINK_MS", "expected an integer");
        assert_eq!(
            err.to_string(),
            "invalid configuration for PIXELGRAPH_THINK_MS: expected an integer"
        );
        assert!(!err.is_action_fault());
    }

    #[test]
    fn test_malformed_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PixelgraphError = serde_err.into();
        assert!(err.to_string().starts_with("malformed event:"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
