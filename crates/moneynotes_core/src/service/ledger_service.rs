//! Money-notes use-case facade.
//!
//! # Responsibility
//! - Own one ledger store together with the broker and aggregate calculator
//!   observing it.
//! - Expose insert/delete plus live streams of records, totals and balance.
//!
//! # Invariants
//! - Every stream observes the same store instance the writes go through.
//! - The calculator is torn down before the broker it subscribes to.

use crate::config::CoreConfig;
use crate::db::{open_db_in_memory, open_db_with_timeout, DbError};
use crate::live::broker::Broker;
use crate::live::calculator::AggregateCalculator;
use crate::live::{ListenerResult, LiveError, Subscription};
use crate::logging::{init_logging, LoggingError};
use crate::model::aggregate::AggregateView;
use crate::model::transaction::{NewTransaction, Transaction, TransactionId, TransactionKind};
use crate::query::engine;
use crate::repo::ledger_repo::{LedgerResult, LedgerStore, SqliteLedgerStore};
use log::info;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Reasons a ledger could not be opened.
#[derive(Debug)]
pub enum OpenError {
    Logging(LoggingError),
    Storage(DbError),
    Live(LiveError),
}

impl Display for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(err) => write!(f, "logging setup failed: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Live(err) => write!(f, "live query setup failed: {err}"),
        }
    }
}

impl Error for OpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Logging(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Live(err) => Some(err),
        }
    }
}

impl From<LoggingError> for OpenError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for OpenError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<LiveError> for OpenError {
    fn from(value: LiveError) -> Self {
        Self::Live(value)
    }
}

/// Reactive ledger: one store, its broker and its balance calculator.
pub struct MoneyNotes {
    // Declared first so it drops before the broker it subscribes to.
    calculator: AggregateCalculator,
    broker: Broker,
}

impl MoneyNotes {
    /// Opens (creating if missing) the ledger described by `config`.
    ///
    /// # Side effects
    /// - Initializes logging when `config.log_dir` is set.
    /// - Creates the database file and applies migrations.
    pub fn open(config: &CoreConfig) -> Result<Self, OpenError> {
        if let Some(log_dir) = &config.log_dir {
            init_logging(&config.log_level, log_dir)?;
        }
        let conn = open_db_with_timeout(&config.db_path, config.busy_timeout)?;
        let notes = Self::with_store(Arc::new(SqliteLedgerStore::new(conn)))?;
        info!(
            "event=ledger_open module=service status=ok busy_timeout_ms={}",
            config.busy_timeout.as_millis()
        );
        Ok(notes)
    }

    /// Opens an empty, process-private ledger.
    pub fn in_memory() -> Result<Self, OpenError> {
        let conn = open_db_in_memory()?;
        Ok(Self::with_store(Arc::new(SqliteLedgerStore::new(conn)))?)
    }

    /// Builds the live layer over an existing store.
    pub fn with_store(store: Arc<dyn LedgerStore>) -> Result<Self, LiveError> {
        let broker = Broker::new(store)?;
        let calculator = AggregateCalculator::new(&broker)?;
        Ok(Self { calculator, broker })
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        self.broker.store()
    }

    /// Validates and commits one record.
    pub fn insert(&self, record: &NewTransaction) -> LedgerResult<TransactionId> {
        self.store().insert(record)
    }

    /// Removes one record. Unknown ids fail with `LedgerError::NotFound`.
    pub fn delete(&self, id: TransactionId) -> LedgerResult<()> {
        self.store().delete(id)
    }

    /// All records, most recent first, re-published after every change.
    pub fn stream_all<L>(&self, listener: L) -> Result<Subscription<Vec<Transaction>>, LiveError>
    where
        L: FnMut(&Vec<Transaction>) -> ListenerResult + Send + 'static,
    {
        self.broker.subscribe(engine::list_all, listener)
    }

    pub fn stream_by_kind<L>(
        &self,
        kind: TransactionKind,
        listener: L,
    ) -> Result<Subscription<Vec<Transaction>>, LiveError>
    where
        L: FnMut(&Vec<Transaction>) -> ListenerResult + Send + 'static,
    {
        self.broker.subscribe(
            move |store: &dyn LedgerStore| engine::list_by_kind(store, kind),
            listener,
        )
    }

    /// Sum of one kind; zero while the ledger holds none.
    pub fn stream_total<L>(
        &self,
        kind: TransactionKind,
        listener: L,
    ) -> Result<Subscription<Decimal>, LiveError>
    where
        L: FnMut(&Decimal) -> ListenerResult + Send + 'static,
    {
        self.broker.subscribe(
            move |store: &dyn LedgerStore| engine::sum_by_kind(store, kind),
            listener,
        )
    }

    /// Income minus expense, each value derived from one committed state.
    pub fn stream_balance<L>(&self, listener: L) -> Result<Subscription<Decimal>, LiveError>
    where
        L: FnMut(&Decimal) -> ListenerResult + Send + 'static,
    {
        self.calculator.subscribe_balance(listener)
    }

    pub fn stream_aggregate<L>(&self, listener: L) -> Result<Subscription<AggregateView>, LiveError>
    where
        L: FnMut(&AggregateView) -> ListenerResult + Send + 'static,
    {
        self.calculator.subscribe_view(listener)
    }

    pub fn list_all(&self) -> LedgerResult<Vec<Transaction>> {
        engine::list_all(self.store().as_ref())
    }

    pub fn list_by_kind(&self, kind: TransactionKind) -> LedgerResult<Vec<Transaction>> {
        engine::list_by_kind(self.store().as_ref(), kind)
    }

    pub fn recent(&self, limit: u32) -> LedgerResult<Vec<Transaction>> {
        engine::recent(self.store().as_ref(), limit)
    }

    pub fn total(&self, kind: TransactionKind) -> LedgerResult<Decimal> {
        engine::sum_by_kind(self.store().as_ref(), kind)
    }

    pub fn aggregate(&self) -> LedgerResult<AggregateView> {
        engine::aggregate_view(self.store().as_ref())
    }

    /// Subscriptions currently registered on the broker, including the
    /// calculator's two totals.
    pub fn live_subscriptions(&self) -> usize {
        self.broker.live_subscriptions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn calculator_holds_two_broker_subscriptions() {
        let notes = MoneyNotes::in_memory().unwrap();
        assert_eq!(notes.live_subscriptions(), 2);

        let total = notes
            .stream_total(TransactionKind::Income, |_: &Decimal| Ok(()))
            .unwrap();
        assert_eq!(notes.live_subscriptions(), 3);
        drop(total);
        assert_eq!(notes.live_subscriptions(), 2);
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::default().with_db_path(dir.path().join("ledger.sqlite3"));

        let notes = MoneyNotes::open(&config).unwrap();
        let balance = notes.stream_balance(|_: &Decimal| Ok(())).unwrap();
        notes
            .insert(&NewTransaction::income("Gaji", dec!(100)))
            .unwrap();

        assert!(balance.wait_for(|value| *value == dec!(100), Duration::from_secs(5)));
        assert!(config.db_path.exists());
    }
}
