//! # Pixelgraph
//!
//! An event sequencing engine that replays a live stream of agent execution
//! events as animated characters on a stage.
//!
//! ## Core Concepts
//!
//! Upstream, an agent backend emits [`Event`]s as fast as it likes. Pixelgraph
//! splits them in two:
//! - **Immediate** events (`SYSTEM_READY`, `SIMULATION_START`, `ERROR`) update
//!   the status line right away, even while animations are backed up
//! - **Queued** events become time-extended actions, played one at a time in
//!   arrival order, each running to completion before the next starts
//!
//! ## Architecture
//!
//! ```text
//! transport
//!     │
//!     ▼ publish() / ingest()
//! EventBus<Event> ───────────────► EventLog
//!     │
//!     ▼ classify()
//!     ├─► Immediate ──► ImmediateDispatcher ──► StatusBoard
//!     │
//!     └─► Queued ─────► ActionQueue ──► run() loop ──► Stage::handle()
//!                                                         │
//!                                      ┌──────────────────┤
//!                                      ▼                  ▼
//!                                 AgentView         EventBus<StageNotice>
//! ```
//!
//! ## Guarantees
//!
//! - **Total order**: publish order is play order. Timestamps are advisory.
//! - **One action in flight**: a slow animation for one agent delays every
//!   later event, for every agent.
//! - **Nothing is fatal**: malformed messages, unknown kinds, failing or
//!   panicking presenters, and stuck actions are logged and skipped.
//!
//! ## Example
//!
//! ```ignore
//! use pixelgraph::{Config, EngineBuilder, TracingPresenter};
//!
//! let config = Config::from_env()?;
//! let handle = EngineBuilder::new(TracingPresenter)
//!     .with_config(&config)
//!     .build()
//!     .start();
//!
//! handle.ingest(r#"{"event_id":"1","type":"AGENT_SPEAK","agent_id":"wizard","data":{"content":"Hi"}}"#)?;
//! handle.wait_idle().await;
//! println!("{}", handle.status());
//! handle.shutdown().await;
//! ```

// Core modules
mod agent;
mod bus;
mod classify;
mod config;
mod control;
mod core;
mod engine;
mod error;
mod log;
mod present;
mod queue;
mod stage;
mod status;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export the event model
pub use crate::core::{
    Event, EventKind, DEFAULT_ERROR_MESSAGE, DEFAULT_SPEECH, DEFAULT_TOOL_NAME,
};

// Re-export error types
pub use crate::error::PixelgraphError;

// Re-export bus types
pub use bus::{EventBus, Listener, SubscriptionId};

// Re-export routing
pub use classify::{classify, Handling};

// Re-export queue types
pub use queue::{
    handler_fn, Action, ActionHandler, ActionQueue, FnHandler, QueueConfig, QueueStats,
    DEFAULT_ACTION_TIMEOUT,
};

// Re-export stage and presentation types
pub use agent::{Agent, AgentState, Prominence, ToolDisplay, ToolIcon};
pub use present::{AgentView, Presenter, TracingPresenter};
pub use stage::{Diagnostic, Stage, StageNotice, Timings};

// Re-export status types
pub use status::{ImmediateDispatcher, Severity, StatusBoard, StatusLine, INITIAL_STATUS};

// Re-export the event log
pub use log::{summarize, EventLog, LogCategory, LogEntry, DEFAULT_LOG_CAPACITY};

// Re-export control channel types
pub use control::{submit_input, ConnectionState, ControlMessage, Submission, Transport};

// Re-export configuration
pub use config::{parse_roster, Config, RosterEntry, DEFAULT_ROSTER};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineHandle};

// Re-export commonly used external types
pub use async_trait::async_trait;
