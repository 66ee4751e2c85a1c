//! Ordered, single-consumer action queue.
//!
//! The queue is the producer/consumer seam between a fast, bursty event
//! stream and time-extended visual actions:
//!
//! ```text
//! publish() ──► enqueue() ──► [e5 e4 e3 e2] ──► run() loop ──► handler(e1)
//!   (sync)        (sync)          pending          (one task)    (awaited)
//! ```
//!
//! # Guarantees
//!
//! - **Strict FIFO**: events are handled in enqueue order. No priority, no
//!   per-agent interleaving; a slow action for one agent blocks the next
//!   event for every agent.
//! - **One in flight**: the next handler call starts only after the previous
//!   one has settled.
//! - **Fault isolation**: a handler that returns `Err`, panics, or exceeds
//!   the configured timeout is logged and the drain moves on. The in-flight
//!   flag is always cleared.
//! - **Never blocks producers**: `enqueue` takes a short lock and returns.
//!
//! # Driving the Queue
//!
//! [`ActionQueue::run`] is the drain loop. Spawn it once:
//!
//! ```ignore
//! let queue = ActionQueue::new(QueueConfig::default());
//! queue.set_handler(handler_fn(|action| async move {
//!     tracing::info!(kind = %action.event().kind, "playing");
//!     Ok(())
//! }));
//! tokio::spawn(queue.clone().run());
//!
//! queue.enqueue(event);
//! queue.wait_idle().await;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::core::Event;
use crate::error::{panic_message, PixelgraphError};

/// Default upper bound on how long a single action may stay in flight.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Action
// =============================================================================

/// A unit of work derived 1:1 from a queued event.
#[derive(Debug, Clone)]
pub struct Action {
    sequence: u64,
    event: Event,
}

impl Action {
    /// Position of this action in dequeue order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The source event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Take the source event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

/// The single asynchronous function invoked for each dequeued event.
///
/// The returned future is awaited to settlement before the next action
/// starts. Returning `Err` is a non-fatal incident.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn handle(&self, action: Action) -> Result<()>;
}

/// Adapter that turns an async closure into an [`ActionHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, action: Action) -> Result<()> {
        (self.0)(action).await
    }
}

// =============================================================================
// Queue Config / Stats
// =============================================================================

/// Queue tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Abandon an action that has not settled after this long.
    /// `None` waits forever.
    pub action_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            action_timeout: Some(DEFAULT_ACTION_TIMEOUT),
        }
    }
}

/// Point-in-time queue diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Events waiting to be dequeued.
    pub pending: usize,
    /// Whether an action is currently executing.
    pub in_flight: bool,
    /// Actions that settled successfully.
    pub completed: u64,
    /// Actions that failed, panicked, or timed out.
    pub failed: u64,
}

// =============================================================================
// Action Queue
// =============================================================================

struct QueueState {
    pending: VecDeque<Event>,
    handler: Option<Arc<dyn ActionHandler>>,
    in_flight: bool,
    draining: bool,
    closed: bool,
    next_sequence: u64,
    completed: u64,
    failed: u64,
}

impl QueueState {
    fn take_next(&mut self) -> Option<(Action, Arc<dyn ActionHandler>)> {
        if self.in_flight {
            return None;
        }
        let handler = self.handler.clone()?;
        let event = self.pending.pop_front()?;

        self.in_flight = true;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some((Action { sequence, event }, handler))
    }

    fn is_settled(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Wakes the drain loop (enqueue, handler change, close).
    wake: Notify,
    /// Wakes `wait_idle` callers when the queue may have gone idle.
    settled: Notify,
    config: QueueConfig,
}

/// FIFO execution pipeline with exactly one action in flight.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

impl ActionQueue {
    /// Create an empty queue with no handler.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    handler: None,
                    in_flight: false,
                    draining: false,
                    closed: false,
                    next_sequence: 0,
                    completed: 0,
                    failed: 0,
                }),
                wake: Notify::new(),
                settled: Notify::new(),
                config,
            }),
        }
    }

    /// Append an event to the tail and wake the drain loop.
    ///
    /// Never blocks on in-flight work. Events enqueued after [`close`]
    /// are dropped.
    ///
    /// [`close`]: ActionQueue::close
    pub fn enqueue(&self, event: Event) {
        let mut state = self.state();
        if state.closed {
            warn!(
                event_id = %event.event_id,
                kind = %event.kind,
                "action queue closed, dropping event"
            );
            return;
        }

        debug!(
            event_id = %event.event_id,
            kind = %event.kind,
            agent_id = %event.agent_id,
            pending = state.pending.len() + 1,
            "event enqueued"
        );
        state.pending.push_back(event);
        drop(state);

        self.inner.wake.notify_one();
    }

    /// Install the handler invoked for each dequeued event.
    ///
    /// Replacing the handler mid-drain does not affect the in-flight action;
    /// the new handler is used from the next dequeued event on.
    pub fn set_handler<H: ActionHandler>(&self, handler: H) {
        self.set_shared_handler(Arc::new(handler));
    }

    /// Install an already shared handler.
    pub fn set_shared_handler(&self, handler: Arc<dyn ActionHandler>) {
        self.state().handler = Some(handler);
        self.inner.wake.notify_one();
    }

    /// Discard every pending event. The in-flight action is unaffected.
    ///
    /// Returns the number of events discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let discarded = state.pending.len();
        state.pending.clear();
        let settled = state.is_settled();
        drop(state);

        if discarded > 0 {
            debug!(discarded, "cleared pending actions");
        }
        if settled {
            self.inner.settled.notify_waiters();
        }
        discarded
    }

    /// Stop the drain loop after the in-flight action settles.
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.wake.notify_one();
        self.inner.settled.notify_waiters();
    }

    /// Number of events waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    /// Returns `true` if nothing is waiting to be dequeued.
    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    /// Returns `true` while an action is executing.
    pub fn is_processing(&self) -> bool {
        self.state().in_flight
    }

    /// Returns `true` once a handler has been installed.
    pub fn has_handler(&self) -> bool {
        self.state().handler.is_some()
    }

    /// Point-in-time diagnostics.
    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight,
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Wait until nothing is pending and nothing is in flight.
    ///
    /// Requires a running drain loop and an installed handler if events are
    /// pending; otherwise it waits until they appear.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state().is_settled() {
                return;
            }
            notified.await;
        }
    }

    /// Drain loop. Runs until [`close`](ActionQueue::close) is called.
    ///
    /// Only one drain loop may run per queue; a second concurrent call
    /// returns immediately.
    pub async fn run(self) {
        {
            let mut state = self.state();
            if state.draining {
                warn!("action queue drain already running");
                return;
            }
            state.draining = true;
        }
        info!(
            action_timeout = ?self.inner.config.action_timeout,
            "action queue drain starting"
        );

        loop {
            let next = {
                let mut state = self.state();
                if state.closed {
                    break;
                }
                state.take_next()
            };

            match next {
                Some((action, handler)) => self.execute(action, handler).await,
                None => {
                    self.inner.settled.notify_waiters();
                    self.inner.wake.notified().await;
                }
            }
        }

        self.state().draining = false;
        self.inner.settled.notify_waiters();
        info!("action queue drain stopped");
    }

    async fn execute(&self, action: Action, handler: Arc<dyn ActionHandler>) {
        let sequence = action.sequence;
        let kind = action.event.kind.clone();
        let agent_id = action.event.agent_id.clone();
        debug!(sequence, %kind, %agent_id, "action started");

        let settled = AssertUnwindSafe(handler.handle(action)).catch_unwind();
        let outcome = match self.inner.config.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, settled).await {
                Ok(result) => flatten_panic(result, sequence),
                Err(_) => Err(PixelgraphError::ActionTimedOut { sequence, limit }.into()),
            },
            None => flatten_panic(settled.await, sequence),
        };

        let succeeded = outcome.is_ok();
        match outcome {
            Ok(()) => debug!(sequence, %kind, %agent_id, "action settled"),
            Err(e) if is_fault(&e) => {
                error!(sequence, %kind, %agent_id, error = %e, "action faulted, continuing with next event")
            }
            Err(e) => {
                warn!(sequence, %kind, %agent_id, error = %e, "action failed, continuing with next event")
            }
        }

        let mut state = self.state();
        state.in_flight = false;
        if succeeded {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        let settled = state.is_settled();
        drop(state);

        if settled {
            self.inner.settled.notify_waiters();
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ActionQueue")
            .field("pending", &stats.pending)
            .field("in_flight", &stats.in_flight)
            .finish_non_exhaustive()
    }
}

fn flatten_panic(
    result: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>>,
    sequence: u64,
) -> Result<()> {
    match result {
        Ok(inner) => inner,
        Err(payload) => Err(PixelgraphError::ActionPanicked {
            sequence,
            message: panic_message(payload.as_ref()),
        }
        .into()),
    }
}

/// Panics and timeouts, as opposed to a handler returning `Err`.
fn is_fault(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PixelgraphError>()
        .is_some_and(PixelgraphError::is_action_fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn event(agent: &str) -> Event {
        Event::new(EventKind::AgentSpeak, agent)
    }

    fn spawn_drain(queue: &ActionQueue) -> tokio::task::JoinHandle<()> {
        tokio::spawn(queue.clone().run())
    }

    fn recording_handler(log: Arc<Mutex<Vec<String>>>) -> impl ActionHandler {
        handler_fn(move |action: Action| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(action.event().agent_id.clone());
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_in_enqueue_order_one_at_a_time() {
        let queue = ActionQueue::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicBool::new(false));
        let overlap = Arc::new(AtomicBool::new(false));

        {
            let log = log.clone();
            let active = active.clone();
            let overlap = overlap.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let log = log.clone();
                let active = active.clone();
                let overlap = overlap.clone();
                async move {
                    if active.swap(true, Ordering::SeqCst) {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    // Later events are faster, so any overlap would reorder them
                    let delay = 100 - action.sequence() * 10;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(action.event().agent_id.clone());
                    active.store(false, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        for i in 0..8 {
            queue.enqueue(event(&format!("agent-{i}")));
        }
        queue.wait_idle().await;

        let expected: Vec<String> = (0..8).map(|i| format!("agent-{i}")).collect();
        assert_eq!(*log.lock().unwrap(), expected);
        assert!(!overlap.load(Ordering::SeqCst));
        assert_eq!(queue.stats().completed, 8);
    }

    #[tokio::test]
    async fn test_enqueue_then_clear_before_drain_starts() {
        let queue = ActionQueue::default();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            queue.set_handler(handler_fn(move |_action: Action| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        // No await between these, so the drain task has not run yet
        queue.enqueue(event("a"));
        assert_eq!(queue.clear(), 1);

        queue.wait_idle().await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());

        // Queue still works afterwards
        queue.enqueue(event("b"));
        queue.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_handler_faulting_still_drains() {
        let queue = ActionQueue::default();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("render failed for {}", action.event().agent_id)
                }
            }));
        }
        spawn_drain(&queue);

        for i in 0..5 {
            queue.enqueue(event(&format!("a{i}")));
        }
        queue.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_processing());
        let stats = queue.stats();
        assert_eq!(stats.failed, 5);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let queue = ActionQueue::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = log.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let log = log.clone();
                async move {
                    if action.event().agent_id == "bad" {
                        panic!("sprite missing");
                    }
                    log.lock().unwrap().push(action.event().agent_id.clone());
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        queue.enqueue(event("a"));
        queue.enqueue(event("bad"));
        queue.enqueue(event("c"));
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
        assert_eq!(queue.stats().failed, 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_action_times_out() {
        let queue = ActionQueue::new(QueueConfig {
            action_timeout: Some(Duration::from_millis(250)),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = log.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let log = log.clone();
                async move {
                    if action.event().agent_id == "stuck" {
                        std::future::pending::<()>().await;
                    }
                    log.lock().unwrap().push(action.event().agent_id.clone());
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        let started = tokio::time::Instant::now();
        queue.enqueue(event("stuck"));
        queue.enqueue(event("next"));
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["next"]);
        assert_eq!(queue.stats().failed, 1);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_enqueue_during_drain_runs_after_existing() {
        let queue = ActionQueue::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = log.clone();
            let queue_inner = queue.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let log = log.clone();
                let queue_inner = queue_inner.clone();
                async move {
                    let id = action.event().agent_id.clone();
                    if id == "first" {
                        queue_inner.enqueue(event("late"));
                    }
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(id);
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        queue.enqueue(event("first"));
        queue.enqueue(event("second"));
        queue.enqueue(event("third"));
        queue.wait_idle().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "second", "third", "late"]
        );
    }

    #[tokio::test]
    async fn test_handler_installed_after_enqueue() {
        let queue = ActionQueue::default();
        spawn_drain(&queue);

        queue.enqueue(event("early"));
        tokio::task::yield_now().await;
        assert_eq!(queue.len(), 1);
        assert!(!queue.has_handler());

        let log = Arc::new(Mutex::new(Vec::new()));
        queue.set_handler(recording_handler(log.clone()));
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["early"]);
    }

    #[tokio::test]
    async fn test_replacing_handler_mid_drain() {
        let queue = ActionQueue::default();
        let release = Arc::new(Notify::new());
        let first_log = Arc::new(Mutex::new(Vec::new()));
        {
            let release = release.clone();
            let first_log = first_log.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let release = release.clone();
                let first_log = first_log.clone();
                async move {
                    release.notified().await;
                    first_log.lock().unwrap().push(action.event().agent_id.clone());
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        queue.enqueue(event("a"));
        queue.enqueue(event("b"));
        tokio::task::yield_now().await;
        assert!(queue.is_processing());
        assert_eq!(queue.len(), 1);

        let second_log = Arc::new(Mutex::new(Vec::new()));
        queue.set_handler(recording_handler(second_log.clone()));
        release.notify_one();
        queue.wait_idle().await;

        assert_eq!(*first_log.lock().unwrap(), vec!["a"]);
        assert_eq!(*second_log.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_clear_does_not_touch_in_flight() {
        let queue = ActionQueue::default();
        let release = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let release = release.clone();
            let log = log.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let release = release.clone();
                let log = log.clone();
                async move {
                    release.notified().await;
                    log.lock().unwrap().push(action.event().agent_id.clone());
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        queue.enqueue(event("in-flight"));
        queue.enqueue(event("pending-1"));
        queue.enqueue(event("pending-2"));
        tokio::task::yield_now().await;

        assert!(queue.is_processing());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_processing());

        release.notify_one();
        queue.wait_idle().await;
        assert_eq!(*log.lock().unwrap(), vec!["in-flight"]);
    }

    #[tokio::test]
    async fn test_second_run_returns_immediately() {
        let queue = ActionQueue::default();
        let first = spawn_drain(&queue);
        tokio::task::yield_now().await;

        // Returns without looping
        queue.clone().run().await;

        queue.close();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_drain_and_drops_new_events() {
        let queue = ActionQueue::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.set_handler(recording_handler(log.clone()));
        let drain = spawn_drain(&queue);

        queue.enqueue(event("a"));
        queue.wait_idle().await;
        queue.close();
        drain.await.unwrap();

        queue.enqueue(event("after-close"));
        assert_eq!(queue.len(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_sequences_are_contiguous() {
        let queue = ActionQueue::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            queue.set_handler(handler_fn(move |action: Action| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(action.sequence());
                    Ok(())
                }
            }));
        }
        spawn_drain(&queue);

        for _ in 0..4 {
            queue.enqueue(event("a"));
        }
        queue.wait_idle().await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_panics_and_timeouts_are_faults() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("sprite missing");
        let panicked = flatten_panic(Err(payload), 3).unwrap_err();
        assert!(is_fault(&panicked));
        assert!(panicked.to_string().contains("sprite missing"));

        let timed_out: anyhow::Error = PixelgraphError::ActionTimedOut {
            sequence: 4,
            limit: Duration::from_millis(250),
        }
        .into();
        assert!(is_fault(&timed_out));

        assert!(!is_fault(&anyhow::anyhow!("render failed")));
        assert!(!is_fault(&PixelgraphError::config("k", "v").into()));
    }

    #[test]
    fn test_debug_impl() {
        let queue = ActionQueue::default();
        queue.enqueue(event("a"));
        let debug_str = format!("{:?}", queue);
        assert!(debug_str.contains("pending: 1"));
        assert!(debug_str.contains("in_flight: false"));
    }
}
