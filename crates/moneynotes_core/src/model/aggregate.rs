//! Derived ledger totals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Income/expense totals and balance taken from one committed state.
///
/// # Invariants
/// - `from_totals` derives `balance` as `total_income - total_expense`.
///   Views built by hand or deserialized are not checked; use
///   `is_consistent`.
/// - Totals are zero, not absent, when no records of that kind exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateView {
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub balance: Decimal,
}

impl AggregateView {
    pub fn from_totals(total_income: Decimal, total_expense: Decimal) -> Self {
        Self {
            total_income,
            total_expense,
            balance: total_income - total_expense,
        }
    }

    /// Whether the balance matches the two totals it was derived from.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.total_income - self.total_expense
    }
}
