//! Commit records and the observer hook fired by the ledger store.
//!
//! # Invariants
//! - `CommitSeq` values are strictly increasing per store instance.
//! - Observers run inside the writer's exclusive section and must not block
//!   or call back into the store.

use crate::model::transaction::{TransactionId, TransactionKind};
use std::fmt::{Display, Formatter};

/// Position of a commit in the store's total commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CommitSeq(pub u64);

impl CommitSeq {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for CommitSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation that produced a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitChange {
    Inserted {
        id: TransactionId,
        kind: TransactionKind,
    },
    Deleted {
        id: TransactionId,
        kind: TransactionKind,
    },
}

impl CommitChange {
    pub fn id(&self) -> TransactionId {
        match self {
            Self::Inserted { id, .. } | Self::Deleted { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Inserted { kind, .. } | Self::Deleted { kind, .. } => *kind,
        }
    }
}

/// A successfully durable insert or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub seq: CommitSeq,
    pub change: CommitChange,
}

/// Registration handle returned by `LedgerStore::register_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

/// Receives every commit of a ledger store, in commit order.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, commit: &Commit);
}
