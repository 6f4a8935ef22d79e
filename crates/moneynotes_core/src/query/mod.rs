//! Derived ledger views.
//!
//! # Responsibility
//! - Evaluate list and sum queries against the store's current state.
//!
//! # Invariants
//! - Queries are pure reads; nothing here caches results.

pub mod engine;
