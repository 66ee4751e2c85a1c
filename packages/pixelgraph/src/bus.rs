//! Synchronous publish/subscribe bus.
//!
//! # Guarantees
//!
//! - **Synchronous**: `publish` runs every listener on the caller's execution
//!   context before returning. The bus never spawns or buffers.
//! - **Subscription order**: listeners run in the order they subscribed.
//! - **At-most-once**: with no listeners, a published event is dropped.
//! - **Stable passes**: the listener list is snapshotted when a pass starts,
//!   so subscribing or unsubscribing mid-pass (even from inside a listener)
//!   only affects later passes.
//!
//! The bus is an explicitly constructed, explicitly owned value. Clone it to
//! hand it to collaborators; all clones share the same listener list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::error::panic_message;

/// A listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct BusInner<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

/// Publish/subscribe channel over events of type `E`.
///
/// # Example
///
/// ```ignore
/// let bus: EventBus<Event> = EventBus::new();
///
/// let id = bus.subscribe(|event| {
///     tracing::info!(kind = %event.kind, "observed");
/// });
///
/// bus.publish(&Event::new(EventKind::AgentIdle, "wizard"));
/// bus.unsubscribe(id);
/// ```
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> EventBus<E> {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. It receives every event published from now on.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Notify every current listener, in subscription order.
    ///
    /// Returns the number of listeners notified. A panicking listener is
    /// logged and skipped; the rest of the pass still runs.
    pub fn publish(&self, event: &E) -> usize {
        let snapshot: Vec<(SubscriptionId, Listener<E>)> = self.listeners().clone();

        for (id, listener) in &snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(
                    subscription = ?id,
                    panic = %panic_message(payload.as_ref()),
                    "bus listener panicked"
                );
            }
        }

        snapshot.len()
    }

    /// Returns the number of active listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners().len()
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Listener<E>)>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
