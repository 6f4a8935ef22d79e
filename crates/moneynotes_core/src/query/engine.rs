//! Query engine over a ledger store.
//!
//! Every function re-reads the store, so results always correspond to some
//! committed state. Sums default to zero when no records match.

use crate::model::aggregate::AggregateView;
use crate::model::transaction::{Transaction, TransactionKind};
use crate::repo::ledger_repo::{LedgerResult, LedgerStore, ScanFilter};
use rust_decimal::Decimal;

/// All live records, most recent first.
pub fn list_all(store: &dyn LedgerStore) -> LedgerResult<Vec<Transaction>> {
    store.scan(&ScanFilter::all())
}

/// Live records of one kind, most recent first.
pub fn list_by_kind(store: &dyn LedgerStore, kind: TransactionKind) -> LedgerResult<Vec<Transaction>> {
    store.scan(&ScanFilter::by_kind(kind))
}

/// The newest `limit` records across both kinds.
pub fn recent(store: &dyn LedgerStore, limit: u32) -> LedgerResult<Vec<Transaction>> {
    store.scan(&ScanFilter::all().limited(limit))
}

/// Total amount of one kind. Zero, not an error, when the ledger holds none.
pub fn sum_by_kind(store: &dyn LedgerStore, kind: TransactionKind) -> LedgerResult<Decimal> {
    store.sum_amounts(kind)
}

/// Income, expense and balance read together from one committed state.
pub fn aggregate_view(store: &dyn LedgerStore) -> LedgerResult<AggregateView> {
    store.totals()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::model::transaction::NewTransaction;
    use crate::repo::ledger_repo::SqliteLedgerStore;
    use rust_decimal_macros::dec;

    #[test]
    fn sum_matches_listed_amounts() {
        let store = SqliteLedgerStore::new(open_db_in_memory().unwrap());
        store.insert(&NewTransaction::expense("Makanan", dec!(12.50))).unwrap();
        store.insert(&NewTransaction::expense("Transport", dec!(7.25))).unwrap();
        store.insert(&NewTransaction::income("Gaji", dec!(100))).unwrap();

        let listed: Decimal = list_by_kind(&store, TransactionKind::Expense)
            .unwrap()
            .iter()
            .map(|record| record.amount)
            .sum();
        assert_eq!(listed, dec!(19.75));
        assert_eq!(sum_by_kind(&store, TransactionKind::Expense).unwrap(), listed);
    }

    #[test]
    fn recent_caps_result_count() {
        let store = SqliteLedgerStore::new(open_db_in_memory().unwrap());
        for minute in 0..5 {
            store
                .insert(&NewTransaction::expense("Belanja", dec!(1)).at(minute * 60_000))
                .unwrap();
        }

        let newest = recent(&store, 2).unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].occurred_at_ms, 4 * 60_000);
        assert_eq!(newest[1].occurred_at_ms, 3 * 60_000);
    }
}
