//! Subscription broker: re-evaluates live queries after each commit.
//!
//! # Responsibility
//! - Register query + listener pairs and return their initial snapshot.
//! - Receive commit notices from the store and fan updated values out to
//!   per-subscription mailboxes.
//!
//! # Invariants
//! - The store's writer only enqueues a commit notice; query evaluation runs
//!   on the dispatcher thread, listener calls on mailbox threads.
//! - Queued commit notices are coalesced into one evaluation round.
//! - A value equal to the last one posted for a subscription is not posted.
//! - Subscriptions are registered atomically with their initial evaluation,
//!   so no commit between the two can be missed.

use crate::live::mailbox::{Mailbox, Subscription, SubscriptionRegistry};
use crate::live::{Listener, ListenerResult, LiveResult, SubscriptionId};
use crate::repo::commit::{Commit, CommitObserver, CommitSeq, ObserverId};
use crate::repo::ledger_repo::{LedgerResult, LedgerStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Query re-evaluated against the store after every commit.
pub type QueryFn<T> = Box<dyn Fn(&dyn LedgerStore) -> LedgerResult<T> + Send + Sync + 'static>;

enum DispatchMessage {
    Commit(CommitSeq),
    Shutdown,
}

/// Commit observer that only forwards the sequence number.
struct CommitSignal {
    tx: Mutex<Sender<DispatchMessage>>,
}

impl CommitObserver for CommitSignal {
    fn on_commit(&self, commit: &Commit) {
        // A closed channel means the broker is gone; nothing left to notify.
        let _ = self.tx.lock().send(DispatchMessage::Commit(commit.seq));
    }
}

/// Type-erased registered query.
trait Route: Send + Sync {
    fn refresh(&self, store: &dyn LedgerStore, seq: CommitSeq);
    fn is_active(&self) -> bool;
    fn close(&self);
}

struct QueryRoute<T> {
    id: SubscriptionId,
    query: QueryFn<T>,
    last_posted: Mutex<T>,
    mailbox: Mailbox<T>,
}

impl<T> Route for QueryRoute<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn refresh(&self, store: &dyn LedgerStore, seq: CommitSeq) {
        let value = match (self.query)(store) {
            Ok(value) => value,
            Err(err) => {
                // Retried on the next commit; the previous value stays current.
                warn!(
                    "event=broker_refresh module=live status=error subscription={} seq={} error={}",
                    self.id, seq, err
                );
                return;
            }
        };

        let mut last_posted = self.last_posted.lock();
        if *last_posted == value {
            return;
        }
        *last_posted = value.clone();
        self.mailbox.post(value);
    }

    fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    fn close(&self) {
        self.mailbox.close();
    }
}

struct BrokerShared {
    store: Arc<dyn LedgerStore>,
    routes: Mutex<BTreeMap<SubscriptionId, Arc<dyn Route>>>,
    next_id: AtomicU64,
}

impl BrokerShared {
    fn dispatch(&self, seq: CommitSeq) {
        let started_at = Instant::now();
        let routes: Vec<Arc<dyn Route>> = {
            let mut routes = self.routes.lock();
            routes.retain(|_, route| route.is_active());
            routes.values().cloned().collect()
        };

        for route in &routes {
            route.refresh(self.store.as_ref(), seq);
        }

        debug!(
            "event=broker_dispatch module=live status=ok seq={} routes={} duration_ms={}",
            seq,
            routes.len(),
            started_at.elapsed().as_millis()
        );
    }
}

impl SubscriptionRegistry for BrokerShared {
    fn remove(&self, id: SubscriptionId) {
        let removed = self.routes.lock().remove(&id);
        if let Some(route) = removed {
            route.close();
            info!(
                "event=broker_unsubscribe module=live status=ok subscription={}",
                id
            );
        }
    }
}

/// Tracks live queries over one ledger store and pushes changed values.
pub struct Broker {
    shared: Arc<BrokerShared>,
    tx: Mutex<Sender<DispatchMessage>>,
    dispatcher: Option<JoinHandle<()>>,
    observer: ObserverId,
}

impl Broker {
    /// Creates a broker bound to `store` and starts its dispatcher thread.
    ///
    /// # Side effects
    /// - Registers a commit observer on the store; dropping the broker
    ///   removes it again.
    pub fn new(store: Arc<dyn LedgerStore>) -> LiveResult<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(BrokerShared {
            store: Arc::clone(&store),
            routes: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        });

        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("moneynotes-broker".to_string())
            .spawn(move || run_dispatcher(dispatcher_shared, rx))?;

        let observer = store.register_observer(Arc::new(CommitSignal {
            tx: Mutex::new(tx.clone()),
        }));

        Ok(Self {
            shared,
            tx: Mutex::new(tx),
            dispatcher: Some(dispatcher),
            observer,
        })
    }

    /// The store this broker evaluates queries against.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.shared.store
    }

    /// Registers `query` and returns the subscription guard holding its
    /// initial value.
    ///
    /// `listener` runs on the subscription's own thread for every later
    /// change. Returning an error (or panicking) ends the subscription.
    pub fn subscribe<T, Q, L>(&self, query: Q, listener: L) -> LiveResult<Subscription<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        Q: Fn(&dyn LedgerStore) -> LedgerResult<T> + Send + Sync + 'static,
        L: FnMut(&T) -> ListenerResult + Send + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<T> = Box::new(listener);

        let mut routes = self.shared.routes.lock();
        let initial = query(self.shared.store.as_ref())?;
        let mailbox = Mailbox::spawn(id, initial.clone(), listener)?;
        routes.insert(
            id,
            Arc::new(QueryRoute {
                id,
                query: Box::new(query),
                last_posted: Mutex::new(initial.clone()),
                mailbox: mailbox.clone(),
            }),
        );
        let live_routes = routes.len();
        drop(routes);

        info!(
            "event=broker_subscribe module=live status=ok subscription={} live={}",
            id, live_routes
        );
        let shared: Weak<_> = Arc::downgrade(&self.shared);
        let registry: Weak<dyn SubscriptionRegistry> = shared;
        Ok(Subscription::new(id, initial, mailbox, registry))
    }

    /// Stops delivery for `id`. Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.remove(id);
    }

    /// Number of subscriptions still delivering.
    pub fn live_subscriptions(&self) -> usize {
        self.shared
            .routes
            .lock()
            .values()
            .filter(|route| route.is_active())
            .count()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shared.store.unregister_observer(self.observer);
        let _ = self.tx.lock().send(DispatchMessage::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("event=broker_shutdown module=live status=error reason=dispatcher_panicked");
            }
        }

        let routes: Vec<Arc<dyn Route>> = {
            let mut routes = self.shared.routes.lock();
            std::mem::take(&mut *routes).into_values().collect()
        };
        for route in &routes {
            route.close();
        }
        info!(
            "event=broker_shutdown module=live status=ok closed_routes={}",
            routes.len()
        );
    }
}

fn run_dispatcher(shared: Arc<BrokerShared>, rx: Receiver<DispatchMessage>) {
    while let Ok(message) = rx.recv() {
        let DispatchMessage::Commit(mut seq) = message else {
            return;
        };

        let mut shutdown = false;
        for queued in rx.try_iter() {
            match queued {
                DispatchMessage::Commit(next) => seq = seq.max(next),
                DispatchMessage::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        shared.dispatch(seq);
        if shutdown {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::model::transaction::{NewTransaction, TransactionKind};
    use crate::query::engine;
    use crate::repo::ledger_repo::SqliteLedgerStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn broker() -> Broker {
        let store: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedgerStore::new(open_db_in_memory().unwrap()));
        Broker::new(store).unwrap()
    }

    #[test]
    fn dropped_subscription_leaves_registry() {
        let broker = broker();
        let subscription = broker
            .subscribe(
                |store: &dyn LedgerStore| engine::sum_by_kind(store, TransactionKind::Income),
                |_: &Decimal| Ok(()),
            )
            .unwrap();
        assert_eq!(broker.live_subscriptions(), 1);

        drop(subscription);
        assert_eq!(broker.live_subscriptions(), 0);
    }

    #[test]
    fn broker_can_be_dropped_with_live_subscriptions() {
        let broker = broker();
        let subscription = broker
            .subscribe(
                |store: &dyn LedgerStore| engine::sum_by_kind(store, TransactionKind::Expense),
                |_: &Decimal| Ok(()),
            )
            .unwrap();
        broker
            .store()
            .insert(&NewTransaction::expense("Tagihan", dec!(10)))
            .unwrap();
        assert!(subscription.wait_for(|total| *total == dec!(10), WAIT));

        drop(broker);
        assert!(!subscription.is_active());
    }

    #[test]
    fn dropped_broker_deregisters_its_commit_observer() {
        let sqlite = Arc::new(SqliteLedgerStore::new(open_db_in_memory().unwrap()));
        for _ in 0..3 {
            let broker = Broker::new(sqlite.clone()).unwrap();
            assert_eq!(sqlite.observer_count(), 1);
            drop(broker);
        }
        assert_eq!(sqlite.observer_count(), 0);
    }
}
