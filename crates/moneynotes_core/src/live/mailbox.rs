//! Single-slot delivery queue with a dedicated listener thread.
//!
//! # Responsibility
//! - Decouple listener execution from the writer and the dispatcher.
//! - Coalesce undelivered values: a newer post overwrites an older one.
//!
//! # Invariants
//! - Values are delivered in post order; at most one listener call runs at a time.
//! - Liveness is checked under the delivery gate before every listener call.
//! - A failing or panicking listener deactivates only its own mailbox.
//! - `close` called from a delivery thread never waits on a gate, so
//!   listeners may unsubscribe themselves or each other.

use crate::live::{Listener, ListenerError, LiveResult, SubscriptionId};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

thread_local! {
    /// Set on every mailbox delivery thread.
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

struct Slot<T> {
    pending: Option<T>,
    closed: bool,
}

struct MailboxShared<T> {
    id: SubscriptionId,
    slot: Mutex<Slot<T>>,
    slot_ready: Condvar,
    /// Held for the whole duration of a listener call.
    gate: Mutex<()>,
    active: AtomicBool,
    delivered: Mutex<T>,
    delivered_changed: Condvar,
}

/// Handle to a subscription's delivery queue. Cheap to clone.
pub(crate) struct Mailbox<T> {
    shared: Arc<MailboxShared<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Mailbox<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Starts the delivery thread. `initial` counts as already delivered.
    pub(crate) fn spawn(id: SubscriptionId, initial: T, listener: Listener<T>) -> LiveResult<Self> {
        let shared = Arc::new(MailboxShared {
            id,
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
            }),
            slot_ready: Condvar::new(),
            gate: Mutex::new(()),
            active: AtomicBool::new(true),
            delivered: Mutex::new(initial),
            delivered_changed: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("moneynotes-sub-{id}"))
            .spawn(move || run_delivery(worker_shared, listener))?;

        Ok(Self { shared })
    }

    /// Queues `value`, replacing any value not yet delivered.
    ///
    /// Returns `false` once the mailbox is closed.
    pub(crate) fn post(&self, value: T) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.closed {
            return false;
        }
        if slot.pending.replace(value).is_some() {
            debug!(
                "event=mailbox_coalesce module=live status=ok subscription={}",
                self.shared.id
            );
        }
        self.shared.slot_ready.notify_one();
        true
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Deactivates the mailbox and stops its thread.
    ///
    /// Outside delivery threads, waits for an in-progress listener call to
    /// finish before returning. From inside a listener it returns at once:
    /// the closed mailbox makes no further calls, but one already running
    /// on another delivery thread may still complete.
    pub(crate) fn close(&self) {
        self.shared.deactivate();
        if !DELIVERING.with(Cell::get) {
            drop(self.shared.gate.lock());
        }
    }

    pub(crate) fn delivered(&self) -> T {
        self.shared.delivered.lock().clone()
    }

    /// Blocks until the last delivered value satisfies `predicate` or
    /// `timeout` elapses. Returns whether the predicate held.
    pub(crate) fn wait_for(&self, mut predicate: impl FnMut(&T) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut delivered = self.shared.delivered.lock();
        loop {
            if predicate(&delivered) {
                return true;
            }
            if !self.is_active() {
                return false;
            }
            if self
                .shared
                .delivered_changed
                .wait_until(&mut delivered, deadline)
                .timed_out()
            {
                return predicate(&delivered);
            }
        }
    }
}

impl<T> MailboxShared<T> {
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        let mut slot = self.slot.lock();
        slot.closed = true;
        slot.pending = None;
        self.slot_ready.notify_all();
        drop(slot);
        // Wake `wait_for` callers so they observe the closed state.
        let _delivered = self.delivered.lock();
        self.delivered_changed.notify_all();
    }
}

fn run_delivery<T>(shared: Arc<MailboxShared<T>>, mut listener: Listener<T>)
where
    T: Clone + PartialEq + Send + 'static,
{
    DELIVERING.with(|delivering| delivering.set(true));
    loop {
        let value = {
            let mut slot = shared.slot.lock();
            loop {
                if slot.closed {
                    return;
                }
                if let Some(value) = slot.pending.take() {
                    break value;
                }
                shared.slot_ready.wait(&mut slot);
            }
        };

        let _gate = shared.gate.lock();
        if !shared.active.load(Ordering::Acquire) {
            return;
        }

        {
            let mut delivered = shared.delivered.lock();
            if *delivered == value {
                continue;
            }
            *delivered = value.clone();
            shared.delivered_changed.notify_all();
        }

        let failure = match catch_unwind(AssertUnwindSafe(|| listener(&value))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(ListenerError::new("listener panicked")),
        };

        if let Some(err) = failure {
            warn!(
                "event=listener_failed module=live status=error subscription={} error={}",
                shared.id, err
            );
            shared.deactivate();
            return;
        }
    }
}

/// Owner of a set of mailboxes that can drop one by id.
pub(crate) trait SubscriptionRegistry: Send + Sync {
    fn remove(&self, id: SubscriptionId);
}

/// Guard for a live subscription.
///
/// Holds the initial snapshot and the last delivered value. Dropping the
/// guard unsubscribes.
pub struct Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    id: SubscriptionId,
    initial: T,
    mailbox: Mailbox<T>,
    registry: Weak<dyn SubscriptionRegistry>,
}

impl<T> Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub(crate) fn new(
        id: SubscriptionId,
        initial: T,
        mailbox: Mailbox<T>,
        registry: Weak<dyn SubscriptionRegistry>,
    ) -> Self {
        Self {
            id,
            initial,
            mailbox,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Value computed when the subscription was registered.
    pub fn initial(&self) -> &T {
        &self.initial
    }

    /// Last value handed to the listener, or the initial value before any push.
    pub fn latest(&self) -> T {
        self.mailbox.delivered()
    }

    /// Whether pushes are still being delivered.
    pub fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    /// Waits until the latest delivered value satisfies `predicate`.
    pub fn wait_for(&self, predicate: impl FnMut(&T) -> bool, timeout: Duration) -> bool {
        self.mailbox.wait_for(predicate, timeout)
    }

    /// Stops delivery. Idempotent.
    pub fn unsubscribe(&self) {
        self.mailbox.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl<T> Drop for Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
