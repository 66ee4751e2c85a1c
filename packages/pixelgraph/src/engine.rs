//! Pixelgraph engine - wires the bus, classifier, dispatcher, queue and stage.
//!
//! ```text
//!                        ┌──► EventLog (every event)
//! publish() ──► EventBus ┤
//!                        └──► classify ──► Immediate ──► ImmediateDispatcher ──► StatusBoard
//!                                     └──► Queued ────► ActionQueue ──► Stage ──► AgentView
//!                                                                         │
//!                                                                         └──► EventBus<StageNotice>
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pixelgraph::{EngineBuilder, TracingPresenter};
//!
//! let handle = EngineBuilder::new(TracingPresenter)
//!     .with_agent("wizard", "Wizard")
//!     .build()
//!     .start();
//!
//! for line in lines {
//!     if let Err(e) = handle.ingest(&line) {
//!         tracing::warn!(error = %e, "skipping message");
//!     }
//! }
//!
//! handle.wait_idle().await;
//! handle.shutdown().await;
//! ```
//!
//! # Ordering
//!
//! `publish` is synchronous: by the time it returns, an immediate event has
//! already updated the status line and a queued event is already at the tail
//! of the queue. Publish order is therefore the total order of the system.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::classify::{classify, Handling};
use crate::config::{Config, RosterEntry};
use crate::core::Event;
use crate::error::PixelgraphError;
use crate::log::{EventLog, DEFAULT_LOG_CAPACITY};
use crate::present::Presenter;
use crate::queue::{ActionQueue, QueueConfig, QueueStats};
use crate::stage::{Diagnostic, Stage, StageNotice, Timings};
use crate::status::{ImmediateDispatcher, StatusBoard, StatusLine};

// =============================================================================
// Engine Builder
// =============================================================================

/// Builder for an [`Engine`].
///
/// # Example
///
/// ```ignore
/// let engine = EngineBuilder::new(RecordingPresenter::new())
///     .with_timings(Timings::default().scaled(4.0))
///     .with_queue_config(QueueConfig { action_timeout: None })
///     .with_agent("wizard", "Wizard")
///     .build();
/// ```
pub struct EngineBuilder {
    presenter: Arc<dyn Presenter>,
    bus: EventBus<Event>,
    timings: Timings,
    queue_config: QueueConfig,
    log_capacity: usize,
    roster: Vec<RosterEntry>,
}

impl EngineBuilder {
    pub fn new<P: Presenter>(presenter: P) -> Self {
        Self::with_arc(Arc::new(presenter))
    }

    /// Create a builder around an already shared presenter.
    pub fn with_arc(presenter: Arc<dyn Presenter>) -> Self {
        Self {
            presenter,
            bus: EventBus::new(),
            timings: Timings::default(),
            queue_config: QueueConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            roster: Vec::new(),
        }
    }

    /// Apply timings, queue settings, log capacity and roster from `config`.
    pub fn with_config(self, config: &Config) -> Self {
        self.with_timings(config.timings)
            .with_queue_config(config.queue.clone())
            .with_log_capacity(config.log_capacity)
            .with_roster(config.roster.clone())
    }

    /// Use an existing inbound bus, e.g. one a transport already publishes on.
    pub fn with_bus(mut self, bus: EventBus<Event>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Put an agent on stage before any event names it.
    pub fn with_agent(mut self, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.roster.push(RosterEntry {
            id: id.into(),
            display_name: display_name.into(),
        });
        self
    }

    /// Replace the roster.
    pub fn with_roster(mut self, roster: Vec<RosterEntry>) -> Self {
        self.roster = roster;
        self
    }

    /// Build the engine and connect its listeners to the bus.
    ///
    /// Does not spawn anything; see [`Engine::start`].
    pub fn build(self) -> Engine {
        let status = StatusBoard::new();
        let dispatcher = ImmediateDispatcher::new(status.clone());
        let stage = Arc::new(Stage::new(self.presenter, status, self.timings));
        let queue = ActionQueue::new(self.queue_config);
        let log = EventLog::new(self.log_capacity);

        for entry in &self.roster {
            if let Err(e) = stage.seed(&entry.id, &entry.display_name) {
                warn!(agent_id = %entry.id, error = %e, "failed to seed agent");
            }
        }

        queue.set_shared_handler(stage.clone());

        // The log subscribes first so it records before routing
        {
            let log = log.clone();
            self.bus.subscribe(move |event: &Event| {
                log.record(event);
            });
        }
        {
            let dispatcher = dispatcher.clone();
            let queue = queue.clone();
            self.bus.subscribe(move |event: &Event| match classify(&event.kind) {
                Handling::Immediate => {
                    dispatcher.dispatch(event);
                }
                Handling::Queued => queue.enqueue(event.clone()),
            });
        }

        Engine {
            bus: self.bus,
            queue,
            stage,
            dispatcher,
            log,
        }
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("timings", &self.timings)
            .field("queue_config", &self.queue_config)
            .field("roster", &self.roster)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A wired-up engine whose drain loop has not started yet.
///
/// Events published before [`start`](Engine::start) wait in the queue.
pub struct Engine {
    bus: EventBus<Event>,
    queue: ActionQueue,
    stage: Arc<Stage>,
    dispatcher: ImmediateDispatcher,
    log: EventLog,
}

impl Engine {
    pub fn builder<P: Presenter>(presenter: P) -> EngineBuilder {
        EngineBuilder::new(presenter)
    }

    pub fn bus(&self) -> &EventBus<Event> {
        &self.bus
    }

    pub fn publish(&self, event: &Event) -> usize {
        self.bus.publish(event)
    }

    /// Spawn the drain loop and return a handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> EngineHandle {
        info!(agents = self.stage.agent_count(), "starting pixelgraph engine");
        let drain = tokio::spawn(self.queue.clone().run());

        EngineHandle {
            bus: self.bus,
            queue: self.queue,
            stage: self.stage,
            dispatcher: self.dispatcher,
            log: self.log,
            drain,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("queue", &self.queue)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Handle to a running engine.
///
/// Inbound events go in through [`publish`](EngineHandle::publish) or
/// [`ingest`](EngineHandle::ingest); everything else is read-only
/// observation.
pub struct EngineHandle {
    bus: EventBus<Event>,
    queue: ActionQueue,
    stage: Arc<Stage>,
    dispatcher: ImmediateDispatcher,
    log: EventLog,
    drain: JoinHandle<()>,
}

impl EngineHandle {
    /// Publish a typed event. Returns the number of bus listeners notified.
    pub fn publish(&self, event: &Event) -> usize {
        debug!(event_id = %event.event_id, kind = %event.kind, agent_id = %event.agent_id, "publishing event");
        self.bus.publish(event)
    }

    /// Parse one raw inbound message and publish it.
    ///
    /// A message that does not parse is surfaced as an error status and
    /// returned as `Err`; the pipeline keeps running.
    pub fn ingest(&self, raw: &str) -> Result<usize, PixelgraphError> {
        match Event::from_json(raw) {
            Ok(event) => Ok(self.publish(&event)),
            Err(e) => {
                self.dispatcher.report_malformed(&e);
                Err(e)
            }
        }
    }

    /// Inbound event bus, for extra observers.
    pub fn bus(&self) -> &EventBus<Event> {
        &self.bus
    }

    /// Stage notices (transitions, focus changes, unrecognized events).
    pub fn notices(&self) -> &EventBus<StageNotice> {
        self.stage.notices()
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.stage.agents()
    }

    pub fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.stage.agent(agent_id)
    }

    pub fn focused(&self) -> Option<String> {
        self.stage.focused()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.stage.diagnostics()
    }

    pub fn status(&self) -> StatusLine {
        self.dispatcher.status().current()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_processing(&self) -> bool {
        self.queue.is_processing()
    }

    /// Drop every pending action. The in-flight action finishes normally.
    pub fn clear_pending(&self) -> usize {
        self.queue.clear()
    }

    /// Wait until nothing is pending and nothing is in flight.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// Stop the drain loop once the in-flight action settles, and wait for
    /// it to exit. Pending actions are not played.
    pub async fn shutdown(self) {
        self.queue.close();
        if let Err(e) = self.drain.await {
            warn!(error = %e, "drain task ended abnormally");
        }
        info!("pixelgraph engine stopped");
    }

    /// Abort the drain task without waiting for the in-flight action.
    pub fn abort(&self) {
        self.drain.abort();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
