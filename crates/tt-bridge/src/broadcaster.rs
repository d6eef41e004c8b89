//! Single-subscriber broadcaster with replay of the current value.
//!
//! At most one subscriber is attached at a time. Subscribing replays the
//! current value before any live value; publishing without a subscriber only
//! updates the current value.
//!
//! # Delivery
//!
//! ```text
//! publish (any thread) ──▶ [value | handle | outbox] ──▶ drain on DeliveryContext ──▶ on_value
//!                              one mutex                   lock released per call
//! ```
//!
//! Units enter the outbox under the lock, so outbox order is publish order.
//! The drain pops one unit at a time and calls the subscriber without holding
//! the lock; a subscriber may publish, subscribe or unsubscribe from inside
//! its callback. Replacing or removing the subscriber clears the outbox, so a
//! delivery queued for an old subscriber never reaches it.

use crate::delivery::DeliveryContext;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receives values on the delivery context.
pub trait Subscriber<T>: Send + Sync + 'static {
    fn on_value(&self, value: T);
}

impl<T, F> Subscriber<T> for F
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_value(&self, value: T) {
        self(value)
    }
}

/// Global subscription ID counter
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one `subscribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// The attached subscriber.
pub(crate) struct Handle<T> {
    pub(crate) id: SubscriptionId,
    pub(crate) sink: Arc<dyn Subscriber<T>>,
}

impl<T> Handle<T> {
    pub(crate) fn new<S: Subscriber<T>>(subscriber: S) -> Self {
        Self {
            id: SubscriptionId::next(),
            sink: Arc::new(subscriber),
        }
    }
}

struct Slot<T> {
    value: T,
    handle: Option<Handle<T>>,
    outbox: VecDeque<T>,
}

impl<T: Clone> Slot<T> {
    /// Store a new current value. Returns true if a delivery was queued.
    fn store(&mut self, value: T) -> bool {
        self.value = value.clone();
        if self.handle.is_some() {
            self.outbox.push_back(value);
            true
        } else {
            false
        }
    }
}

/// Single-subscriber broadcaster.
///
/// Cheap to clone; clones share the same value and subscriber.
pub struct Broadcaster<T> {
    name: &'static str,
    slot: Arc<Mutex<Slot<T>>>,
    context: DeliveryContext,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            slot: Arc::clone(&self.slot),
            context: self.context.clone(),
        }
    }
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Create a broadcaster holding `initial`.
    ///
    /// `name` only appears in logs.
    pub fn new(name: &'static str, initial: T, context: DeliveryContext) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(Slot {
                value: initial,
                handle: None,
                outbox: VecDeque::new(),
            })),
            context,
        }
    }

    /// Current value.
    pub fn current(&self) -> T {
        self.slot.lock().value.clone()
    }

    /// Is a subscriber attached?
    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().handle.is_some()
    }

    /// Attach `subscriber`, replacing any previous one.
    ///
    /// The current value is delivered first, ahead of any later publish.
    pub fn subscribe<S: Subscriber<T>>(&self, subscriber: S) -> SubscriptionId {
        let handle = Handle::new(subscriber);
        let id = handle.id;

        {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.handle.replace(handle) {
                debug!("{}: {} replaced by {}", self.name, previous.id, id);
            }
            slot.outbox.clear();
            let current = slot.value.clone();
            slot.outbox.push_back(current);
        }

        debug!("{}: {} subscribed", self.name, id);
        self.schedule_drain();
        id
    }

    /// Detach the subscriber. Pending deliveries are discarded.
    ///
    /// Returns false if nothing was attached.
    pub fn unsubscribe(&self) -> bool {
        let previous = {
            let mut slot = self.slot.lock();
            slot.outbox.clear();
            slot.handle.take()
        };

        match previous {
            Some(handle) => {
                debug!("{}: {} unsubscribed", self.name, handle.id);
                true
            }
            None => false,
        }
    }

    /// Set the current value and deliver it to the subscriber, if any.
    pub fn publish(&self, value: T) {
        let queued = self.slot.lock().store(value);
        if queued {
            self.schedule_drain();
        }
    }

    /// Like [`publish`](Self::publish), but a no-op when `value` equals the
    /// current value. The comparison and the update are atomic.
    ///
    /// Returns true if the value changed.
    pub fn publish_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let queued = {
            let mut slot = self.slot.lock();
            if slot.value == value {
                return false;
            }
            slot.store(value)
        };

        if queued {
            self.schedule_drain();
        }
        true
    }

    fn schedule_drain(&self) {
        let slot = Arc::clone(&self.slot);
        self.context.run(move || drain(&slot));
    }
}

/// Deliver queued units in order, one lock acquisition per unit.
fn drain<T: 'static>(slot: &Mutex<Slot<T>>) {
    loop {
        let (sink, value) = {
            let mut guard = slot.lock();
            let Some(value) = guard.outbox.pop_front() else {
                return;
            };
            match &guard.handle {
                Some(handle) => (Arc::clone(&handle.sink), value),
                None => {
                    guard.outbox.clear();
                    return;
                }
            }
        };

        sink.on_value(value);
    }
}
