//! Ledger domain model.
//!
//! # Responsibility
//! - Define the transaction record and its insert request.
//! - Define the aggregate view derived from live records.
//!
//! # Invariants
//! - Records are immutable once stored; there is no update path.
//! - Aggregates have no identity of their own.

pub mod aggregate;
pub mod transaction;
