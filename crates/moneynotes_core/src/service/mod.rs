//! Core use-case services.
//!
//! # Responsibility
//! - Wire the store, broker and calculator into one ledger handle.
//! - Keep CLI and embedding layers decoupled from storage details.

pub mod ledger_service;
