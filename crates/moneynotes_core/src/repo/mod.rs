//! Ledger store layer.
//!
//! # Responsibility
//! - Define the durable record storage contract.
//! - Isolate SQLite query details from the query engine and live layers.
//!
//! # Invariants
//! - Writes are serialized and totally ordered by `CommitSeq`.
//! - Store APIs return semantic errors (`NotFound`, `Validation`) in addition
//!   to storage transport errors.

pub mod commit;
pub mod ledger_repo;
