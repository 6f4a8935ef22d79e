//! Ledger store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide insert/delete/scan over durable transaction records.
//! - Serialize every mutation through one exclusive section and announce
//!   each commit to registered observers.
//!
//! # Invariants
//! - Write paths validate before any SQL runs; a rejected insert leaves no trace.
//! - Scans are ordered by `occurred_at_ms DESC, id DESC`.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - No automatic retries: every storage failure is returned to the caller.

use crate::db::DbError;
use crate::model::aggregate::AggregateView;
use crate::model::transaction::{
    amount_from_minor, now_epoch_ms, NewTransaction, Transaction, TransactionId, TransactionKind,
    ValidationError,
};
use crate::repo::commit::{Commit, CommitChange, CommitObserver, CommitSeq, ObserverId};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const TRANSACTION_SELECT_SQL: &str = "SELECT
    id,
    kind,
    category,
    amount_minor,
    occurred_at_ms,
    note
FROM transactions";

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error taxonomy surfaced by ledger operations.
#[derive(Debug)]
pub enum LedgerError {
    /// Input rejected before reaching durable state.
    Validation(ValidationError),
    /// Delete referenced an id that is not live.
    NotFound(TransactionId),
    /// Durable medium failure. Never retried by the core.
    Storage(DbError),
}

impl LedgerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "transaction not found: {id}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for LedgerError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

/// Scan options. The default matches every live record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub kind: Option<TransactionKind>,
    pub limit: Option<u32>,
}

impl ScanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_kind(kind: TransactionKind) -> Self {
        Self {
            kind: Some(kind),
            limit: None,
        }
    }

    pub fn limited(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable keyed storage for ledger transactions.
pub trait LedgerStore: Send + Sync {
    /// Validates, persists and commits one record, returning its new id.
    fn insert(&self, record: &NewTransaction) -> LedgerResult<TransactionId>;
    /// Removes one live record.
    fn delete(&self, id: TransactionId) -> LedgerResult<()>;
    fn get(&self, id: TransactionId) -> LedgerResult<Option<Transaction>>;
    /// Lists live records matching `filter`, newest first.
    fn scan(&self, filter: &ScanFilter) -> LedgerResult<Vec<Transaction>>;
    /// Sum of `amount` over live records of `kind`; zero when none exist.
    fn sum_amounts(&self, kind: TransactionKind) -> LedgerResult<Decimal>;
    /// Both kind totals taken from one committed state.
    fn totals(&self) -> LedgerResult<AggregateView>;
    /// Sequence number of the latest commit (zero before the first one).
    fn last_commit(&self) -> CommitSeq;
    /// Registers an observer called once per future commit.
    fn register_observer(&self, observer: Arc<dyn CommitObserver>) -> ObserverId;
    /// Stops notifying `id`. Unknown ids are ignored.
    fn unregister_observer(&self, id: ObserverId);
}

struct WriterState {
    conn: Connection,
    last_commit: CommitSeq,
}

/// SQLite-backed ledger store owning its connection exclusively.
pub struct SqliteLedgerStore {
    state: Mutex<WriterState>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn CommitObserver>)>>,
    next_observer: AtomicU64,
}

impl SqliteLedgerStore {
    /// Wraps a migrated connection (see [`crate::db::open_db`]).
    pub fn new(conn: Connection) -> Self {
        Self {
            state: Mutex::new(WriterState {
                conn,
                last_commit: CommitSeq::default(),
            }),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    fn announce(&self, commit: &Commit) {
        for (_, observer) in self.observers.read().iter() {
            observer.on_commit(commit);
        }
    }

    fn insert_inner(&self, record: &NewTransaction) -> LedgerResult<Commit> {
        let fields = record.validate()?;
        let created_at_ms = now_epoch_ms();
        let occurred_at_ms = record.occurred_at_ms.unwrap_or(created_at_ms);

        let mut state = self.state.lock();
        let tx = state.conn.transaction()?;
        tx.execute(
            "INSERT INTO transactions (
                kind,
                category,
                amount_minor,
                occurred_at_ms,
                note,
                created_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                record.kind.as_str(),
                fields.category,
                fields.amount_minor,
                occurred_at_ms,
                record.note.as_str(),
                created_at_ms,
            ],
        )?;
        let id = TransactionId(tx.last_insert_rowid());
        tx.commit()?;

        state.last_commit = state.last_commit.next();
        let commit = Commit {
            seq: state.last_commit,
            change: CommitChange::Inserted {
                id,
                kind: record.kind,
            },
        };
        self.announce(&commit);
        Ok(commit)
    }

    fn delete_inner(&self, id: TransactionId) -> LedgerResult<Commit> {
        let mut state = self.state.lock();
        let tx = state.conn.transaction()?;
        let kind_text: Option<String> = tx
            .query_row(
                "DELETE FROM transactions WHERE id = ?1 RETURNING kind;",
                [id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(kind_text) = kind_text else {
            return Err(LedgerError::NotFound(id));
        };
        let kind = parse_kind(&kind_text)?;
        tx.commit()?;

        state.last_commit = state.last_commit.next();
        let commit = Commit {
            seq: state.last_commit,
            change: CommitChange::Deleted { id, kind },
        };
        self.announce(&commit);
        Ok(commit)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn insert(&self, record: &NewTransaction) -> LedgerResult<TransactionId> {
        let started_at = Instant::now();
        match self.insert_inner(record) {
            Ok(commit) => {
                info!(
                    "event=ledger_insert module=repo status=ok id={} kind={} seq={} duration_ms={}",
                    commit.change.id(),
                    record.kind,
                    commit.seq,
                    started_at.elapsed().as_millis()
                );
                Ok(commit.change.id())
            }
            Err(err) => {
                log_write_failure("ledger_insert", &err, started_at);
                Err(err)
            }
        }
    }

    fn delete(&self, id: TransactionId) -> LedgerResult<()> {
        let started_at = Instant::now();
        match self.delete_inner(id) {
            Ok(commit) => {
                info!(
                    "event=ledger_delete module=repo status=ok id={} kind={} seq={} duration_ms={}",
                    id,
                    commit.change.kind(),
                    commit.seq,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                log_write_failure("ledger_delete", &err, started_at);
                Err(err)
            }
        }
    }

    fn get(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
        let state = self.state.lock();
        let mut stmt = state
            .conn
            .prepare_cached(&format!("{TRANSACTION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.get()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_transaction_row(row)?));
        }

        Ok(None)
    }

    fn scan(&self, filter: &ScanFilter) -> LedgerResult<Vec<Transaction>> {
        let mut sql = format!("{TRANSACTION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }

        sql.push_str(" ORDER BY occurred_at_ms DESC, id DESC");

        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let state = self.state.lock();
        let mut stmt = state.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_transaction_row(row)?);
        }

        debug!(
            "event=ledger_scan module=repo status=ok kind={} count={}",
            filter.kind.map_or("all", TransactionKind::as_str),
            records.len()
        );
        Ok(records)
    }

    fn sum_amounts(&self, kind: TransactionKind) -> LedgerResult<Decimal> {
        let state = self.state.lock();
        let minor: i64 = state.conn.query_row(
            "SELECT COALESCE(SUM(amount_minor), 0) FROM transactions WHERE kind = ?1;",
            [kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(amount_from_minor(minor))
    }

    fn totals(&self) -> LedgerResult<AggregateView> {
        let state = self.state.lock();
        let (income_minor, expense_minor): (i64, i64) = state.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_minor END), 0),
                COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_minor END), 0)
             FROM transactions;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateView::from_totals(
            amount_from_minor(income_minor),
            amount_from_minor(expense_minor),
        ))
    }

    fn last_commit(&self) -> CommitSeq {
        self.state.lock().last_commit
    }

    fn register_observer(&self, observer: Arc<dyn CommitObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    fn unregister_observer(&self, id: ObserverId) {
        self.observers.write().retain(|(registered, _)| *registered != id);
    }
}

fn log_write_failure(event: &str, err: &LedgerError, started_at: Instant) {
    if err.is_storage() {
        error!(
            "event={} module=repo status=error duration_ms={} error_code={} error={}",
            event,
            started_at.elapsed().as_millis(),
            err.code(),
            err
        );
    } else {
        info!(
            "event={} module=repo status=rejected duration_ms={} error_code={}",
            event,
            started_at.elapsed().as_millis(),
            err.code()
        );
    }
}

fn parse_transaction_row(row: &Row<'_>) -> LedgerResult<Transaction> {
    let id = TransactionId(row.get("id")?);

    let kind_text: String = row.get("kind")?;
    let kind = parse_kind(&kind_text)?;

    let amount_minor: i64 = row.get("amount_minor")?;
    if amount_minor <= 0 {
        return Err(invalid_data(format!(
            "non-positive amount_minor `{amount_minor}` in transactions.amount_minor (id {id})"
        )));
    }

    let category: String = row.get("category")?;
    if category.trim().is_empty() {
        return Err(invalid_data(format!(
            "empty category in transactions.category (id {id})"
        )));
    }

    Ok(Transaction {
        id,
        kind,
        category,
        amount: amount_from_minor(amount_minor),
        occurred_at_ms: row.get("occurred_at_ms")?,
        note: row.get("note")?,
    })
}

fn parse_kind(value: &str) -> LedgerResult<TransactionKind> {
    match value {
        "income" => Ok(TransactionKind::Income),
        "expense" => Ok(TransactionKind::Expense),
        other => Err(invalid_data(format!(
            "invalid kind `{other}` in transactions.kind"
        ))),
    }
}

fn invalid_data(message: String) -> LedgerError {
    LedgerError::Storage(DbError::InvalidData(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use rust_decimal_macros::dec;

    fn store() -> SqliteLedgerStore {
        SqliteLedgerStore::new(open_db_in_memory().unwrap())
    }

    #[test]
    fn commit_seq_advances_only_on_success() {
        let store = store();
        assert_eq!(store.last_commit(), CommitSeq(0));

        let id = store
            .insert(&NewTransaction::income("Gaji", dec!(100)))
            .unwrap();
        assert_eq!(store.last_commit(), CommitSeq(1));

        store
            .insert(&NewTransaction::income("", dec!(100)))
            .unwrap_err();
        store.delete(TransactionId(999)).unwrap_err();
        assert_eq!(store.last_commit(), CommitSeq(1));

        store.delete(id).unwrap();
        assert_eq!(store.last_commit(), CommitSeq(2));
    }

    #[test]
    fn corrupt_kind_surfaces_as_storage_error() {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA ignore_check_constraints = ON;
             INSERT INTO transactions (kind, category, amount_minor, occurred_at_ms, note, created_at_ms)
             VALUES ('transfer', 'X', 100, 1, '', 1);",
        )
        .unwrap();
        let store = SqliteLedgerStore::new(conn);

        let err = store.scan(&ScanFilter::all()).unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("transfer"));
    }

    #[test]
    fn error_display_names_missing_id() {
        let err = LedgerError::NotFound(TransactionId(42));
        assert_eq!(err.to_string(), "transaction not found: 42");
        assert!(err.is_not_found());
    }

    struct CountingObserver(AtomicU64);

    impl CommitObserver for CountingObserver {
        fn on_commit(&self, _commit: &Commit) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unregistered_observer_receives_no_commits() {
        let store = store();
        let counter = Arc::new(CountingObserver(AtomicU64::new(0)));
        let id = store.register_observer(counter.clone());

        store
            .insert(&NewTransaction::expense("Makanan", dec!(5)))
            .unwrap();
        store.unregister_observer(id);
        store.unregister_observer(id);
        store
            .insert(&NewTransaction::expense("Makanan", dec!(5)))
            .unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(store.observers.read().is_empty());
    }
}
