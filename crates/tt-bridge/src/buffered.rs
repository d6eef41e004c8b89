//! Single-subscriber broadcaster that buffers while detached.
//!
//! Used for the diagnostic record stream: every record published while no
//! subscriber is attached is kept, in order, and flushed to the next
//! subscriber before any live record.
//!
//! Backlog, outbox and handle share one mutex, so an append racing a
//! subscribe-flush lands either in the flushed batch or after it, never
//! both and never neither. A record leaves the broadcaster only when it is
//! handed to a live subscriber: records still queued in the outbox when the
//! subscriber goes away are put back at the front of the backlog.
//!
//! There is no bound on the backlog.

use crate::broadcaster::{Handle, Subscriber, SubscriptionId};
use crate::delivery::DeliveryContext;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tracing::debug;

struct Slot<T> {
    handle: Option<Handle<T>>,
    /// Records waiting for a subscriber
    backlog: VecDeque<T>,
    /// Records handed to the current subscriber, not yet delivered
    outbox: VecDeque<T>,
}

impl<T> Slot<T> {
    /// Move undelivered outbox records back to the head of the backlog.
    fn reclaim_outbox(&mut self) -> usize {
        let mut undelivered = mem::take(&mut self.outbox);
        let reclaimed = undelivered.len();
        undelivered.append(&mut self.backlog);
        self.backlog = undelivered;
        reclaimed
    }
}

/// Buffered single-subscriber broadcaster.
///
/// Cheap to clone; clones share the same backlog and subscriber.
pub struct BufferedBroadcaster<T> {
    name: &'static str,
    slot: Arc<Mutex<Slot<T>>>,
    context: DeliveryContext,
}

impl<T> Clone for BufferedBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            slot: Arc::clone(&self.slot),
            context: self.context.clone(),
        }
    }
}

impl<T> BufferedBroadcaster<T>
where
    T: Send + 'static,
{
    /// Create an empty broadcaster. `name` only appears in logs.
    pub fn new(name: &'static str, context: DeliveryContext) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(Slot {
                handle: None,
                backlog: VecDeque::new(),
                outbox: VecDeque::new(),
            })),
            context,
        }
    }

    /// Number of records waiting for a subscriber.
    pub fn backlog_len(&self) -> usize {
        self.slot.lock().backlog.len()
    }

    /// Is a subscriber attached?
    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().handle.is_some()
    }

    /// Attach `subscriber`, replacing any previous one, and flush the backlog
    /// to it in arrival order.
    pub fn subscribe<S: Subscriber<T>>(&self, subscriber: S) -> SubscriptionId {
        let handle = Handle::new(subscriber);
        let id = handle.id;

        let flushed = {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.handle.replace(handle) {
                debug!("{}: {} replaced by {}", self.name, previous.id, id);
            }
            // Undelivered records of a replaced subscriber stay ahead of the backlog
            let backlog = mem::take(&mut slot.backlog);
            slot.outbox.extend(backlog);
            slot.outbox.len()
        };

        debug!("{}: {} subscribed, flushing {} records", self.name, id, flushed);
        if flushed > 0 {
            self.schedule_drain();
        }
        id
    }

    /// Detach the subscriber and go back to buffering.
    ///
    /// Returns false if nothing was attached.
    pub fn unsubscribe(&self) -> bool {
        let (previous, reclaimed) = {
            let mut slot = self.slot.lock();
            let previous = slot.handle.take();
            (previous, slot.reclaim_outbox())
        };

        match previous {
            Some(handle) => {
                debug!(
                    "{}: {} unsubscribed, {} undelivered records kept",
                    self.name, handle.id, reclaimed
                );
                true
            }
            None => false,
        }
    }

    /// Forward `value` to the subscriber, or buffer it if there is none.
    pub fn publish(&self, value: T) {
        self.publish_with(|| value);
    }

    /// Like [`publish`](Self::publish), but builds the value inside the
    /// critical section, so anything `make` numbers follows queue order.
    pub fn publish_with<F>(&self, make: F)
    where
        F: FnOnce() -> T,
    {
        let queued = {
            let mut slot = self.slot.lock();
            let value = make();
            if slot.handle.is_some() {
                slot.outbox.push_back(value);
                true
            } else {
                slot.backlog.push_back(value);
                false
            }
        };

        if queued {
            self.schedule_drain();
        }
    }

    fn schedule_drain(&self) {
        let slot = Arc::clone(&self.slot);
        self.context.run(move || drain(&slot));
    }
}

fn drain<T: 'static>(slot: &Mutex<Slot<T>>) {
    loop {
        let (sink, value) = {
            let mut guard = slot.lock();
            let Some(handle) = &guard.handle else {
                return;
            };
            let sink = Arc::clone(&handle.sink);
            let Some(value) = guard.outbox.pop_front() else {
                return;
            };
            (sink, value)
        };

        sink.on_value(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryThread;
    use crossbeam_channel::{unbounded, Receiver};
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_context() -> (DeliveryContext, DeliveryThread) {
        DeliveryContext::spawn("buffered-test").unwrap()
    }

    fn recorder<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + 'static, Receiver<T>) {
        let (tx, rx) = unbounded();
        (move |value| tx.send(value).unwrap(), rx)
    }

    fn collect<T>(rx: &Receiver<T>, count: usize) -> Vec<T> {
        (0..count).map(|_| rx.recv_timeout(WAIT).unwrap()).collect()
    }

    #[test]
    fn test_backlog_flushed_then_live() {
        let (ctx, _thread) = spawn_context();
        let logs = BufferedBroadcaster::new("logs", ctx);

        logs.publish("A");
        logs.publish("B");
        assert_eq!(logs.backlog_len(), 2);

        let (sink, rx) = recorder();
        logs.subscribe(sink);
        assert_eq!(collect(&rx, 2), vec!["A", "B"]);

        logs.publish("C");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "C");
        assert_eq!(logs.backlog_len(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_large_backlog_no_loss_no_duplicates() {
        let (ctx, _thread) = spawn_context();
        let logs = BufferedBroadcaster::new("logs", ctx);

        for i in 0..1000u32 {
            logs.publish(i);
        }

        let (sink, rx) = recorder();
        logs.subscribe(sink);
        for i in 1000..1010u32 {
            logs.publish(i);
        }

        assert_eq!(collect(&rx, 1010), (0..1010).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_unsubscribe_reverts_to_buffering() {
        let (ctx, _thread) = spawn_context();
        let logs = BufferedBroadcaster::new("logs", ctx);

        let (first, first_rx) = recorder();
        logs.subscribe(first);
        logs.publish(1u32);
        assert_eq!(first_rx.recv_timeout(WAIT).unwrap(), 1);

        assert!(logs.unsubscribe());
        logs.publish(2);
        logs.publish(3);
        assert_eq!(logs.backlog_len(), 2);

        // Already delivered history is not replayed
        let (second, second_rx) = recorder();
        logs.subscribe(second);
        assert_eq!(collect(&second_rx, 2), vec![2, 3]);
        assert!(first_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_undelivered_records_survive_unsubscribe() {
        let (ctx, pump) = DeliveryContext::attached("ui");
        let logs = BufferedBroadcaster::new("logs", ctx);

        let (first, first_rx) = recorder();
        logs.subscribe(first);

        // Queued by the engine thread, not yet drained
        let remote = logs.clone();
        thread::spawn(move || {
            remote.publish("X");
            remote.publish("Y");
        })
        .join()
        .unwrap();

        logs.unsubscribe();
        logs.publish("Z");
        pump.run_pending();
        assert!(first_rx.try_recv().is_err());
        assert_eq!(logs.backlog_len(), 3);

        let (second, second_rx) = recorder();
        logs.subscribe(second);
        pump.run_pending();
        assert_eq!(second_rx.try_iter().collect::<Vec<_>>(), vec!["X", "Y", "Z"]);
    }

    #[test]
    fn test_replacing_subscriber_hands_over_pending_records() {
        let (ctx, pump) = DeliveryContext::attached("ui");
        let logs = BufferedBroadcaster::new("logs", ctx);

        let (first, first_rx) = recorder();
        logs.subscribe(first);

        let remote = logs.clone();
        thread::spawn(move || remote.publish(1u32)).join().unwrap();

        let (second, second_rx) = recorder();
        logs.subscribe(second);
        logs.publish(2);
        pump.run_pending();

        assert!(first_rx.try_recv().is_err());
        assert_eq!(second_rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_publish_racing_subscribe() {
        let (ctx, _thread) = spawn_context();
        let logs = BufferedBroadcaster::new("logs", ctx);

        let producer = {
            let logs = logs.clone();
            thread::spawn(move || {
                for i in 0..5000u32 {
                    logs.publish(i);
                }
            })
        };

        thread::sleep(Duration::from_millis(1));
        let (sink, rx) = recorder();
        logs.subscribe(sink);
        producer.join().unwrap();

        assert_eq!(collect(&rx, 5000), (0..5000).collect::<Vec<_>>());
        assert_eq!(logs.backlog_len(), 0);
    }

    #[test]
    fn test_cycling_subscribers_no_loss_no_duplicates() {
        const RECORDS: u32 = 20_000;
        let (ctx, _thread) = spawn_context();
        let logs = BufferedBroadcaster::new("logs", ctx);

        let producer = {
            let logs = logs.clone();
            thread::spawn(move || {
                for i in 0..RECORDS {
                    logs.publish(i);
                }
            })
        };

        // Every subscriber feeds the same channel, so the channel sees the
        // whole stream as handed out across subscribers
        let (tx, rx) = unbounded();
        for _ in 0..2000 {
            let tx = tx.clone();
            logs.subscribe(move |value: u32| {
                let _ = tx.send(value);
            });
            logs.unsubscribe();
        }
        logs.subscribe(move |value: u32| {
            let _ = tx.send(value);
        });
        producer.join().unwrap();

        assert_eq!(
            collect(&rx, RECORDS as usize),
            (0..RECORDS).collect::<Vec<_>>()
        );
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(logs.backlog_len(), 0);
    }
}
