//! Shutdown is coordinated in two stages: a begin signal tells the source to
//! wind down, and a completion token dropped by the source tells us it did.
//! Sources that miss the deadline get a force trigger instead.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::ready;
use tokio::time::{Instant, timeout_at};
use tracing::error;

struct Shared {
    closed: AtomicBool,
    cancelled: AtomicBool,

    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn wake_all(&self) {
        self.wakers
            .lock()
            .expect("waker map lock poisoned")
            .drain()
            .for_each(|(_id, waker)| waker.wake());
    }
}

pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Cancel all associated tripwires, making them resolve immediately.
    pub fn cancel(self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake_all();
    }

    /// Resolve the tripwires without marking them cancelled.
    pub fn disable(self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake_all();
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake_all();
    }
}

/// A clonable future that resolves once its [`Trigger`] fires or is dropped.
pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Tripwire {
    pub fn new() -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            wakers: Mutex::new(HashMap::new()),
        });

        (
            Trigger {
                shared: Arc::clone(&shared),
            },
            Tripwire {
                id: shared.next_id(),
                shared,
            },
        )
    }
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_id();

        Self { shared, id }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared
            .wakers
            .lock()
            .expect("waker map lock poisoned")
            .remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.shared.cancelled.load(Ordering::SeqCst)
            || self.shared.closed.load(Ordering::SeqCst)
        {
            return Poll::Ready(());
        }

        self.shared
            .wakers
            .lock()
            .expect("waker map lock poisoned")
            .insert(self.id, cx.waker().clone());

        // The trigger may have fired between the load and the insert, check
        // again so the stored waker cannot be missed.
        if self.shared.closed.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

/// When this struct goes out of scope and its internal refcount goes to 0 it
/// is a signal that its corresponding source has completed executing and may
/// be cleaned up. It is the responsibility of the source to ensure that at
/// least one copy of this handle remains alive for its entire lifetime.
#[derive(Clone)]
pub struct ShutdownSignalToken {
    _complete: Arc<Trigger>,
}

impl ShutdownSignalToken {
    fn new(trigger: Trigger) -> Self {
        Self {
            _complete: Arc::new(trigger),
        }
    }
}

/// Passed to the source to coordinate the shutdown process.
///
/// Resolves once shutdown has begun; the yielded token must be held until the
/// source has actually finished.
#[derive(Clone)]
pub struct ShutdownSignal {
    begin: Option<Tripwire>,

    /// Optional only so that `poll()` can move the handle out and return it.
    completed: Option<ShutdownSignalToken>,
}

impl Future for ShutdownSignal {
    type Output = ShutdownSignalToken;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.begin {
            Some(tripwire) => {
                ready!(Pin::new(tripwire).poll(cx));
                this.begin = None;

                match this.completed.take() {
                    Some(token) => Poll::Ready(token),
                    None => Poll::Pending,
                }
            }
            // Polled after ready, the token is already handed out.
            None => Poll::Pending,
        }
    }
}

impl ShutdownSignal {
    pub fn new(tripwire: Tripwire, trigger: Trigger) -> Self {
        Self {
            begin: Some(tripwire),
            completed: Some(ShutdownSignalToken::new(trigger)),
        }
    }

    #[cfg(test)]
    pub fn noop() -> Self {
        let (trigger, tripwire) = Tripwire::new();
        Self {
            begin: Some(tripwire),
            completed: Some(ShutdownSignalToken::new(trigger)),
        }
    }

    #[cfg(test)]
    pub fn new_wired() -> (Trigger, ShutdownSignal, Tripwire) {
        let (trigger_shutdown, tripwire) = Tripwire::new();
        let (trigger, shutdown_done) = Tripwire::new();
        let shutdown = ShutdownSignal::new(tripwire, trigger);

        (trigger_shutdown, shutdown, shutdown_done)
    }
}

/// Wires up and later drives the shutdown of the one source this agent runs.
#[derive(Default)]
pub struct ShutdownCoordinator {
    begun_trigger: Option<Trigger>,
    force_trigger: Option<Trigger>,
    complete_tripwire: Option<Tripwire>,
}

impl ShutdownCoordinator {
    /// Create the necessary trigger and tripwires for coordinating shutdown
    /// of the source. Returns the [`ShutdownSignal`] for the source as well
    /// as a [`Tripwire`] that will be notified if the source should be
    /// forcibly shut down.
    pub fn register_source(&mut self) -> (ShutdownSignal, Tripwire) {
        let (begun_trigger, begun_tripwire) = Tripwire::new();
        let (force_trigger, force_tripwire) = Tripwire::new();
        let (complete_trigger, complete_tripwire) = Tripwire::new();

        self.begun_trigger = Some(begun_trigger);
        self.force_trigger = Some(force_trigger);
        self.complete_tripwire = Some(complete_tripwire);

        let signal = ShutdownSignal::new(begun_tripwire, complete_trigger);

        (signal, force_tripwire)
    }

    /// Resolves once the source has finished on its own.
    pub fn sources_finished(&self) -> Option<Tripwire> {
        self.complete_tripwire.clone()
    }

    /// Signal the source to begin shutting down and wait for it to finish.
    /// Returns whether it finished before `deadline`; past the deadline the
    /// force trigger is fired instead.
    pub async fn shutdown_source(self, deadline: Instant) -> bool {
        let (Some(begun_trigger), Some(force_trigger), Some(complete_tripwire)) =
            (self.begun_trigger, self.force_trigger, self.complete_tripwire)
        else {
            return true;
        };

        begun_trigger.cancel();

        if timeout_at(deadline, complete_tripwire).await.is_ok() {
            force_trigger.disable();
            true
        } else {
            error!(message = "source failed to shutdown before deadline, forcing shutdown");

            force_trigger.cancel();
            false
        }
    }
}
