//! Core domain logic for MoneyNotes.
//! This crate is the single source of truth for ledger invariants.

pub mod config;
pub mod db;
pub mod live;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use live::{ListenerError, ListenerResult, LiveError, Subscription, SubscriptionId};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::aggregate::AggregateView;
pub use model::transaction::{
    suggested_categories, NewTransaction, Transaction, TransactionId, TransactionKind,
    ValidationError,
};
pub use repo::ledger_repo::{LedgerError, LedgerResult, LedgerStore, ScanFilter, SqliteLedgerStore};
pub use service::ledger_service::{MoneyNotes, OpenError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
