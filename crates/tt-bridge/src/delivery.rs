//! Delivery context: the single thread consumer callbacks run on.
//!
//! Engine callbacks arrive on arbitrary threads. Everything the consumer
//! observes is funneled through one FIFO queue drained by one thread, either
//! a dedicated thread ([`DeliveryContext::spawn`]) or a host-owned loop
//! ([`DeliveryContext::attached`] + [`DeliveryPump`]).

use crate::error::BridgeError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Envelope {
    Run(Task),
    Shutdown,
}

struct Shared {
    name: String,
    owner: ThreadId,
    tx: Sender<Envelope>,
}

/// Handle to a delivery context.
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct DeliveryContext {
    inner: Arc<Shared>,
}

impl DeliveryContext {
    /// Spawn a dedicated delivery thread.
    pub fn spawn(name: &str) -> Result<(Self, DeliveryThread), BridgeError> {
        let (tx, rx) = unbounded();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!("Delivery thread {} started", thread_name);
                run_delivery_loop(&thread_name, rx);
                debug!("Delivery thread {} stopped", thread_name);
            })
            .map_err(BridgeError::Spawn)?;

        let context = Self {
            inner: Arc::new(Shared {
                name: name.to_string(),
                owner: handle.thread().id(),
                tx,
            }),
        };
        let thread = DeliveryThread {
            context: context.clone(),
            handle: Some(handle),
        };
        Ok((context, thread))
    }

    /// Bind a delivery context to the calling thread.
    ///
    /// The caller drains queued tasks through the returned pump, e.g. from
    /// its UI loop.
    pub fn attached(name: &str) -> (Self, DeliveryPump) {
        let (tx, rx) = unbounded();
        let context = Self {
            inner: Arc::new(Shared {
                name: name.to_string(),
                owner: thread::current().id(),
                tx,
            }),
        };
        let pump = DeliveryPump {
            context: context.clone(),
            rx,
            _not_send: PhantomData,
        };
        (context, pump)
    }

    /// Context name (the thread name for spawned contexts).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Is the caller running on this context?
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    /// Run `task` on the context.
    ///
    /// Executes inline when already on the context, otherwise enqueues
    /// behind every task submitted before it.
    pub fn run<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            task();
            return;
        }

        if self.inner.tx.send(Envelope::Run(Box::new(task))).is_err() {
            debug!("Delivery context {} closed, dropping task", self.inner.name);
        }
    }

    fn request_shutdown(&self) -> bool {
        self.inner.tx.send(Envelope::Shutdown).is_ok()
    }
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("name", &self.inner.name)
            .field("owner", &self.inner.owner)
            .finish()
    }
}

/// Owner of a spawned delivery thread.
///
/// Dropping it stops the thread after the tasks already queued have run.
pub struct DeliveryThread {
    context: DeliveryContext,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryThread {
    /// The context this thread drains.
    pub fn context(&self) -> &DeliveryContext {
        &self.context
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if !self.context.request_shutdown() {
            debug!("Delivery thread {} already gone", self.context.name());
        }

        // A task that drops its own thread handle cannot wait for itself.
        if self.context.is_current() {
            return;
        }

        if handle.join().is_err() {
            error!("Delivery thread {} terminated abnormally", self.context.name());
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains an attached delivery context on its owning thread.
pub struct DeliveryPump {
    context: DeliveryContext,
    rx: Receiver<Envelope>,
    // Bound to the owning thread.
    _not_send: PhantomData<*const ()>,
}

impl DeliveryPump {
    /// The context this pump drains.
    pub fn context(&self) -> &DeliveryContext {
        &self.context
    }

    /// Run every queued task without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Run(task) = envelope {
                run_isolated(self.context.name(), task);
                ran += 1;
            }
        }
        ran
    }

    /// Run tasks as they arrive until `timeout` elapses. Returns how many ran.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Envelope::Run(task)) => {
                    run_isolated(self.context.name(), task);
                    ran += 1;
                }
                Ok(Envelope::Shutdown) => {}
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }
}

/// Main delivery loop.
fn run_delivery_loop(name: &str, rx: Receiver<Envelope>) {
    loop {
        let task = match rx.recv() {
            Ok(Envelope::Run(task)) => task,
            Ok(Envelope::Shutdown) => {
                debug!("Delivery thread {} received shutdown", name);
                break;
            }
            Err(_) => {
                debug!("Delivery thread {} channel closed", name);
                break;
            }
        };

        run_isolated(name, task);
    }
}

/// Run one task; a panicking consumer callback must not take the context down.
fn run_isolated(name: &str, task: Task) {
    if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(
            "Delivery task on {} panicked: {}",
            name,
            panic_message(&*panic_info)
        );
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
