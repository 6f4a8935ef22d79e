use moneynotes_core::db::open_db_in_memory;
use moneynotes_core::live::broker::Broker;
use moneynotes_core::live::ListenerError;
use moneynotes_core::model::transaction::{NewTransaction, TransactionKind};
use moneynotes_core::query::engine;
use moneynotes_core::repo::ledger_repo::{LedgerStore, SqliteLedgerStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn broker() -> Broker {
    let store: Arc<dyn LedgerStore> =
        Arc::new(SqliteLedgerStore::new(open_db_in_memory().unwrap()));
    Broker::new(store).unwrap()
}

fn income_total(store: &dyn LedgerStore) -> moneynotes_core::LedgerResult<Decimal> {
    engine::sum_by_kind(store, TransactionKind::Income)
}

fn record_count(store: &dyn LedgerStore) -> moneynotes_core::LedgerResult<usize> {
    engine::list_all(store).map(|records| records.len())
}

#[test]
fn subscribe_returns_current_value_as_initial() {
    let broker = broker();
    broker
        .store()
        .insert(&NewTransaction::income("Gaji", dec!(300)))
        .unwrap();

    let subscription = broker.subscribe(income_total, |_: &Decimal| Ok(())).unwrap();
    assert_eq!(*subscription.initial(), dec!(300));
    assert_eq!(subscription.latest(), dec!(300));
}

#[test]
fn unchanged_values_are_not_pushed() {
    let broker = broker();
    let (tx, rx) = mpsc::channel();
    let subscription = broker
        .subscribe(income_total, move |total: &Decimal| {
            tx.send(*total)
                .map_err(|err| ListenerError::new(err.to_string()))
        })
        .unwrap();

    broker
        .store()
        .insert(&NewTransaction::expense("Makanan", dec!(20)))
        .unwrap();
    broker
        .store()
        .insert(&NewTransaction::income("Gaji", dec!(10)))
        .unwrap();
    assert!(subscription.wait_for(|total| *total == dec!(10), WAIT));

    let pushed: Vec<Decimal> = rx.try_iter().collect();
    assert_eq!(pushed, vec![dec!(10)]);
}

#[test]
fn pushes_follow_commit_order() {
    let broker = broker();
    let (tx, rx) = mpsc::channel();
    let subscription = broker
        .subscribe(record_count, move |count: &usize| {
            tx.send(*count)
                .map_err(|err| ListenerError::new(err.to_string()))
        })
        .unwrap();

    for minute in 0..20 {
        broker
            .store()
            .insert(&NewTransaction::expense("Transport", dec!(1)).at(minute * 60_000))
            .unwrap();
    }
    assert!(subscription.wait_for(|count| *count == 20, WAIT));

    let pushed: Vec<usize> = rx.try_iter().collect();
    assert!(!pushed.is_empty());
    assert!(pushed.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(pushed.last(), Some(&20));
}

#[test]
fn unsubscribe_is_idempotent_and_stops_delivery() {
    let broker = broker();
    let (tx, rx) = mpsc::channel();
    let subscription = broker
        .subscribe(income_total, move |total: &Decimal| {
            let _ = tx.send(*total);
            Ok(())
        })
        .unwrap();
    let witness = broker.subscribe(income_total, |_: &Decimal| Ok(())).unwrap();

    subscription.unsubscribe();
    subscription.unsubscribe();
    broker.unsubscribe(subscription.id());
    assert!(!subscription.is_active());

    broker
        .store()
        .insert(&NewTransaction::income("Bonus", dec!(5)))
        .unwrap();
    assert!(witness.wait_for(|total| *total == dec!(5), WAIT));
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.live_subscriptions(), 1);
}

#[test]
fn failing_listener_does_not_affect_other_subscriptions() {
    let broker = broker();
    let failing = broker
        .subscribe(income_total, |_: &Decimal| Err(ListenerError::new("ui gone")))
        .unwrap();
    let healthy = broker.subscribe(income_total, |_: &Decimal| Ok(())).unwrap();

    broker
        .store()
        .insert(&NewTransaction::income("Gaji", dec!(1)))
        .unwrap();
    assert!(healthy.wait_for(|total| *total == dec!(1), WAIT));
    assert!(!failing.wait_for(|_| false, WAIT));
    assert!(!failing.is_active());

    broker
        .store()
        .insert(&NewTransaction::income("Gaji", dec!(2)))
        .unwrap();
    assert!(healthy.wait_for(|total| *total == dec!(3), WAIT));
    assert!(healthy.is_active());
}

#[test]
fn panicking_listener_is_isolated() {
    let broker = broker();
    let panicking = broker
        .subscribe(record_count, |count: &usize| {
            if *count > 0 {
                panic!("listener bug");
            }
            Ok(())
        })
        .unwrap();
    let healthy = broker.subscribe(record_count, |_: &usize| Ok(())).unwrap();

    broker
        .store()
        .insert(&NewTransaction::expense("Hiburan", dec!(9)))
        .unwrap();
    assert!(healthy.wait_for(|count| *count == 1, WAIT));
    assert!(!panicking.wait_for(|_| false, WAIT));
}

#[test]
fn dropping_subscription_guard_unsubscribes() {
    let broker = broker();
    {
        let _subscription = broker.subscribe(record_count, |_: &usize| Ok(())).unwrap();
        assert_eq!(broker.live_subscriptions(), 1);
    }
    assert_eq!(broker.live_subscriptions(), 0);
}
