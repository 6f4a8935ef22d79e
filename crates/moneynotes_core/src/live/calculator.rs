//! Aggregate calculator: publishes balance without torn reads.
//!
//! # Responsibility
//! - Listen to the income and expense totals as two broker subscriptions.
//! - On either push, re-derive both totals from the store in one read and
//!   publish projections of the resulting `AggregateView`.
//!
//! # Invariants
//! - Published views always come from one committed state; upstream pushed
//!   values are used only as triggers, never combined.
//! - Recomputation is serialized, so published views follow commit order.
//! - Trigger values carry the store's commit sequence, so every dispatch
//!   round after a commit wakes the calculator even when a kind total
//!   returns to an earlier value.

use crate::live::broker::Broker;
use crate::live::mailbox::{Mailbox, Subscription, SubscriptionRegistry};
use crate::live::{Listener, ListenerResult, LiveResult, SubscriptionId};
use crate::model::aggregate::AggregateView;
use crate::model::transaction::TransactionKind;
use crate::query::engine;
use crate::repo::commit::CommitSeq;
use crate::repo::ledger_repo::{LedgerResult, LedgerStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Kind total paired with the commit it was read after.
type TriggerValue = (Decimal, CommitSeq);

/// Maps the aggregate view to the value one output publishes.
pub type Projection<T> = Box<dyn Fn(&AggregateView) -> T + Send + Sync + 'static>;

trait ViewOutput: Send + Sync {
    fn publish(&self, view: &AggregateView);
    fn is_active(&self) -> bool;
    fn close(&self);
}

struct ProjectedOutput<T> {
    project: Projection<T>,
    last_posted: Mutex<T>,
    mailbox: Mailbox<T>,
}

impl<T> ViewOutput for ProjectedOutput<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn publish(&self, view: &AggregateView) {
        let value = (self.project)(view);
        let mut last_posted = self.last_posted.lock();
        if *last_posted != value {
            *last_posted = value.clone();
            self.mailbox.post(value);
        }
    }

    fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    fn close(&self) {
        self.mailbox.close();
    }
}

struct CalculatorState {
    current: AggregateView,
    outputs: BTreeMap<SubscriptionId, Arc<dyn ViewOutput>>,
}

struct CalculatorShared {
    store: Arc<dyn LedgerStore>,
    state: Mutex<CalculatorState>,
    next_id: AtomicU64,
}

impl CalculatorShared {
    /// Re-reads both totals and publishes if they moved.
    fn recompute(&self) {
        let mut state = self.state.lock();
        if let Err(err) = self.refresh_locked(&mut state) {
            // The next upstream push retries from fresh state.
            warn!(
                "event=calculator_publish module=live status=error error={}",
                err
            );
        }
    }

    fn refresh_locked(&self, state: &mut CalculatorState) -> LedgerResult<()> {
        let view = engine::aggregate_view(self.store.as_ref())?;
        if view == state.current {
            return Ok(());
        }
        state.current = view;
        state.outputs.retain(|_, output| output.is_active());
        for output in state.outputs.values() {
            output.publish(&view);
        }
        debug!(
            "event=calculator_publish module=live status=ok outputs={}",
            state.outputs.len()
        );
        Ok(())
    }
}

impl SubscriptionRegistry for CalculatorShared {
    fn remove(&self, id: SubscriptionId) {
        let removed = self.state.lock().outputs.remove(&id);
        if let Some(output) = removed {
            output.close();
        }
    }
}

/// Republishes balance (and the full aggregate view) derived from the
/// income and expense totals tracked by a [`Broker`].
pub struct AggregateCalculator {
    shared: Arc<CalculatorShared>,
    income_trigger: Subscription<TriggerValue>,
    expense_trigger: Subscription<TriggerValue>,
}

impl AggregateCalculator {
    /// Subscribes to both kind totals on `broker`.
    pub fn new(broker: &Broker) -> LiveResult<Self> {
        let store = Arc::clone(broker.store());
        let initial = engine::aggregate_view(store.as_ref())?;
        let shared = Arc::new(CalculatorShared {
            store,
            state: Mutex::new(CalculatorState {
                current: initial,
                outputs: BTreeMap::new(),
            }),
            next_id: AtomicU64::new(1),
        });

        let income_trigger = subscribe_trigger(broker, &shared, TransactionKind::Income)?;
        let expense_trigger = subscribe_trigger(broker, &shared, TransactionKind::Expense)?;
        info!(
            "event=calculator_start module=live status=ok income_subscription={} expense_subscription={}",
            income_trigger.id(),
            expense_trigger.id()
        );

        Ok(Self {
            shared,
            income_trigger,
            expense_trigger,
        })
    }

    /// Last view the calculator published.
    pub fn current(&self) -> AggregateView {
        self.shared.state.lock().current
    }

    /// Registers an output publishing `project(view)` on every change of
    /// that projection.
    pub fn subscribe<T, P, L>(&self, project: P, listener: L) -> LiveResult<Subscription<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        P: Fn(&AggregateView) -> T + Send + Sync + 'static,
        L: FnMut(&T) -> ListenerResult + Send + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<T> = Box::new(listener);

        let mut state = self.shared.state.lock();
        // Start from the store's present state, not a view still waiting on
        // an upstream push.
        self.shared.refresh_locked(&mut state)?;
        let initial = project(&state.current);
        let mailbox = Mailbox::spawn(id, initial.clone(), listener)?;
        state.outputs.insert(
            id,
            Arc::new(ProjectedOutput {
                project: Box::new(project),
                last_posted: Mutex::new(initial.clone()),
                mailbox: mailbox.clone(),
            }),
        );
        drop(state);

        let shared: Weak<_> = Arc::downgrade(&self.shared);
        let registry: Weak<dyn SubscriptionRegistry> = shared;
        Ok(Subscription::new(id, initial, mailbox, registry))
    }

    /// Live balance (`total_income - total_expense`).
    pub fn subscribe_balance<L>(&self, listener: L) -> LiveResult<Subscription<Decimal>>
    where
        L: FnMut(&Decimal) -> ListenerResult + Send + 'static,
    {
        self.subscribe(|view: &AggregateView| view.balance, listener)
    }

    /// Live income, expense and balance as one consistent value.
    pub fn subscribe_view<L>(&self, listener: L) -> LiveResult<Subscription<AggregateView>>
    where
        L: FnMut(&AggregateView) -> ListenerResult + Send + 'static,
    {
        self.subscribe(|view: &AggregateView| *view, listener)
    }

    /// Whether both upstream total subscriptions are still delivering.
    pub fn is_running(&self) -> bool {
        self.income_trigger.is_active() && self.expense_trigger.is_active()
    }
}

impl Drop for AggregateCalculator {
    fn drop(&mut self) {
        self.income_trigger.unsubscribe();
        self.expense_trigger.unsubscribe();
        let outputs = std::mem::take(&mut self.shared.state.lock().outputs);
        for output in outputs.values() {
            output.close();
        }
    }
}

fn subscribe_trigger(
    broker: &Broker,
    shared: &Arc<CalculatorShared>,
    kind: TransactionKind,
) -> LiveResult<Subscription<TriggerValue>> {
    let calculator = Arc::downgrade(shared);
    broker.subscribe(
        move |store: &dyn LedgerStore| {
            let total = engine::sum_by_kind(store, kind)?;
            Ok((total, store.last_commit()))
        },
        move |_: &TriggerValue| {
            if let Some(calculator) = calculator.upgrade() {
                calculator.recompute();
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::model::transaction::NewTransaction;
    use crate::repo::ledger_repo::SqliteLedgerStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup() -> (Broker, AggregateCalculator) {
        let store: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedgerStore::new(open_db_in_memory().unwrap()));
        let broker = Broker::new(store).unwrap();
        let calculator = AggregateCalculator::new(&broker).unwrap();
        (broker, calculator)
    }

    #[test]
    fn initial_view_reflects_existing_rows() {
        let store: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedgerStore::new(open_db_in_memory().unwrap()));
        store.insert(&NewTransaction::income("Bonus", dec!(40))).unwrap();
        let broker = Broker::new(store).unwrap();
        let calculator = AggregateCalculator::new(&broker).unwrap();

        let balance = calculator.subscribe_balance(|_: &Decimal| Ok(())).unwrap();
        assert_eq!(*balance.initial(), dec!(40));
        assert_eq!(calculator.current().total_income, dec!(40));
    }

    #[test]
    fn balance_output_suppresses_unchanged_balance() {
        let (broker, calculator) = setup();
        let pushes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pushes);
        let balance = calculator
            .subscribe_balance(move |value: &Decimal| {
                sink.lock().push(*value);
                Ok(())
            })
            .unwrap();
        let view = calculator.subscribe_view(|_: &AggregateView| Ok(())).unwrap();

        broker.store().insert(&NewTransaction::income("Gaji", dec!(10))).unwrap();
        assert!(balance.wait_for(|value| *value == dec!(10), WAIT));
        broker.store().insert(&NewTransaction::income("Bonus", dec!(5))).unwrap();
        broker.store().insert(&NewTransaction::expense("Makanan", dec!(5))).unwrap();
        assert!(view.wait_for(
            |view| view.total_income == dec!(15) && view.total_expense == dec!(5),
            WAIT
        ));
        assert!(balance.wait_for(|value| *value == dec!(10), WAIT));

        let seen = pushes.lock().clone();
        assert_eq!(seen.first(), Some(&dec!(10)));
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert!(calculator.is_running());
    }
}
