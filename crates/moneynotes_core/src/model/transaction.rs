//! Ledger transaction model.
//!
//! # Responsibility
//! - Define the immutable record stored by the ledger.
//! - Validate insert requests before they reach durable state.
//!
//! # Invariants
//! - `amount > 0` and carries at most two fractional digits (minor units).
//! - `category` is non-empty after trimming.
//! - `id` is assigned by the store, never by callers, and never reused.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of fractional digits kept for currency amounts.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Store-assigned identifier. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl TransactionId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of money flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Parses the persisted/CLI spelling. Case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }

    pub fn all() -> [TransactionKind; 2] {
        [Self::Income, Self::Expense]
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons an insert request is rejected before touching storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NonPositiveAmount(Decimal),
    AmountPrecision(Decimal),
    AmountOutOfRange(Decimal),
    EmptyCategory,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveAmount(amount) => {
                write!(f, "amount must be greater than zero, got {amount}")
            }
            Self::AmountPrecision(amount) => write!(
                f,
                "amount {amount} has more than {MINOR_UNIT_SCALE} fractional digits"
            ),
            Self::AmountOutOfRange(amount) => write!(f, "amount {amount} is too large"),
            Self::EmptyCategory => write!(f, "category must not be empty"),
        }
    }
}

impl Error for ValidationError {}

/// Insert request. The store turns it into a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub category: String,
    pub amount: Decimal,
    /// Unix epoch milliseconds. `None` means "now" at insertion time.
    pub occurred_at_ms: Option<i64>,
    pub note: String,
}

impl NewTransaction {
    pub fn new(kind: TransactionKind, category: impl Into<String>, amount: Decimal) -> Self {
        Self {
            kind,
            category: category.into(),
            amount,
            occurred_at_ms: None,
            note: String::new(),
        }
    }

    pub fn income(category: impl Into<String>, amount: Decimal) -> Self {
        Self::new(TransactionKind::Income, category, amount)
    }

    pub fn expense(category: impl Into<String>, amount: Decimal) -> Self {
        Self::new(TransactionKind::Expense, category, amount)
    }

    pub fn at(mut self, occurred_at_ms: i64) -> Self {
        self.occurred_at_ms = Some(occurred_at_ms);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Checks record invariants.
    ///
    /// Returns the trimmed category and the amount in minor units so the
    /// store persists exactly what was validated.
    pub fn validate(&self) -> Result<ValidatedFields, ValidationError> {
        let category = self.category.trim();
        if category.is_empty() {
            return Err(ValidationError::EmptyCategory);
        }
        let amount_minor = amount_to_minor(self.amount)?;
        Ok(ValidatedFields {
            category: category.to_string(),
            amount_minor,
        })
    }
}

/// Output of [`NewTransaction::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFields {
    pub category: String,
    pub amount_minor: i64,
}

/// Stored, immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub category: String,
    pub amount: Decimal,
    /// Unix epoch milliseconds.
    pub occurred_at_ms: i64,
    pub note: String,
}

impl Transaction {
    pub fn is_income(&self) -> bool {
        self.kind == TransactionKind::Income
    }

    pub fn is_expense(&self) -> bool {
        self.kind == TransactionKind::Expense
    }

    /// Amount with sign applied: positive for income, negative for expense.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TransactionKind::Income => self.amount,
            TransactionKind::Expense => -self.amount,
        }
    }
}

/// Converts a positive currency amount into integer minor units.
pub fn amount_to_minor(amount: Decimal) -> Result<i64, ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(ValidationError::AmountPrecision(amount));
    }
    let scaled = amount
        .checked_mul(Decimal::from(10_i64.pow(MINOR_UNIT_SCALE)))
        .ok_or(ValidationError::AmountOutOfRange(amount))?;
    scaled
        .trunc()
        .to_i64()
        .ok_or(ValidationError::AmountOutOfRange(amount))
}

/// Converts integer minor units back into a currency amount.
pub fn amount_from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Default category suggestions offered by entry forms.
///
/// Advisory only; the store accepts any non-empty category.
pub fn suggested_categories(kind: TransactionKind) -> &'static [&'static str] {
    match kind {
        TransactionKind::Income => &[
            "Gaji",
            "Bonus",
            "Hadiah",
            "Investasi",
            "Penjualan",
            "Lainnya",
        ],
        TransactionKind::Expense => &[
            "Makanan",
            "Transport",
            "Belanja",
            "Hiburan",
            "Tagihan",
            "Pendidikan",
            "Kesehatan",
            "Lainnya",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn validate_trims_category_and_converts_amount() {
        let request = NewTransaction::income("  Gaji ", dec!(5000000));
        let fields = request.validate().unwrap();
        assert_eq!(fields.category, "Gaji");
        assert_eq!(fields.amount_minor, 500_000_000);
    }

    #[test]
    fn validate_rejects_zero_and_negative_amounts() {
        let zero = NewTransaction::expense("Makanan", Decimal::ZERO);
        assert_eq!(
            zero.validate().unwrap_err(),
            ValidationError::NonPositiveAmount(Decimal::ZERO)
        );

        let negative = NewTransaction::expense("Makanan", dec!(-1.50));
        assert!(matches!(
            negative.validate(),
            Err(ValidationError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn validate_rejects_blank_category() {
        let request = NewTransaction::income("   ", dec!(10));
        assert_eq!(request.validate().unwrap_err(), ValidationError::EmptyCategory);
    }

    #[test]
    fn validate_rejects_sub_minor_unit_precision() {
        let request = NewTransaction::expense("Transport", dec!(0.001));
        assert!(matches!(
            request.validate(),
            Err(ValidationError::AmountPrecision(_))
        ));

        // Trailing zeros beyond the scale are not extra precision.
        let padded = NewTransaction::expense("Transport", dec!(1.2500));
        assert_eq!(padded.validate().unwrap().amount_minor, 125);
    }

    #[test]
    fn minor_units_roundtrip_keeps_value() {
        assert_eq!(amount_from_minor(amount_to_minor(dec!(0.01)).unwrap()), dec!(0.01));
        assert_eq!(amount_from_minor(5_000), dec!(50));
    }

    #[test]
    fn kind_parse_accepts_any_case() {
        assert_eq!(TransactionKind::parse("INCOME"), Some(TransactionKind::Income));
        assert_eq!(TransactionKind::parse(" expense "), Some(TransactionKind::Expense));
        assert_eq!(TransactionKind::parse("transfer"), None);
    }

    #[test]
    fn suggestions_end_with_catch_all() {
        for kind in TransactionKind::all() {
            assert_eq!(suggested_categories(kind).last(), Some(&"Lainnya"));
        }
    }

    #[test]
    fn signed_amount_negates_expenses() {
        let record = Transaction {
            id: TransactionId(1),
            kind: TransactionKind::Expense,
            category: "Tagihan".to_string(),
            amount: dec!(12.30),
            occurred_at_ms: 0,
            note: String::new(),
        };
        assert_eq!(record.signed_amount(), dec!(-12.30));
        assert!(record.is_expense());
    }

    #[test]
    fn serializes_with_plain_id_and_snake_case_kind() {
        let record = Transaction {
            id: TransactionId(7),
            kind: TransactionKind::Income,
            category: "Gaji".to_string(),
            amount: dec!(5000000),
            occurred_at_ms: 1_000,
            note: String::new(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["kind"], "income");
    }
}
