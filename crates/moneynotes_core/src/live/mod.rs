//! Live query delivery.
//!
//! # Responsibility
//! - Re-evaluate registered queries after every ledger commit (`broker`).
//! - Republish a torn-read-free balance derived from both kind totals
//!   (`calculator`).
//! - Deliver values to listeners off the writer path (`mailbox`).
//!
//! # Invariants
//! - Per subscription, values are delivered in commit order.
//! - A value equal to the last delivered one is never delivered again.
//! - The newest value is always eventually delivered; older undelivered
//!   values may be dropped.
//! - After `unsubscribe` returns, the listener is not invoked again.

pub mod broker;
pub mod calculator;
pub mod mailbox;

use crate::repo::ledger_repo::LedgerError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use mailbox::Subscription;

/// Identifier of one live subscription, unique per broker or calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by a listener. The failing subscription is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ListenerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener failed: {}", self.message)
    }
}

impl Error for ListenerError {}

impl From<String> for ListenerError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ListenerError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub type ListenerResult = Result<(), ListenerError>;

/// Callback receiving pushed values on the subscription's delivery thread.
pub type Listener<T> = Box<dyn FnMut(&T) -> ListenerResult + Send + 'static>;

pub type LiveResult<T> = Result<T, LiveError>;

/// Errors raised while registering a live subscription.
#[derive(Debug)]
pub enum LiveError {
    /// Computing the initial snapshot failed.
    Ledger(LedgerError),
    /// The delivery thread could not be started.
    Spawn(std::io::Error),
}

impl Display for LiveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger(err) => write!(f, "{err}"),
            Self::Spawn(err) => write!(f, "failed to start delivery thread: {err}"),
        }
    }
}

impl Error for LiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ledger(err) => Some(err),
            Self::Spawn(err) => Some(err),
        }
    }
}

impl From<LedgerError> for LiveError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<std::io::Error> for LiveError {
    fn from(value: std::io::Error) -> Self {
        Self::Spawn(value)
    }
}
