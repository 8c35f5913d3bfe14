//! Usage Ledger
//!
//! The narrow contract through which the aggregation service reaches the
//! ledger-backed asset store, plus two backends:
//! - `memory`: process-local ledger with a broadcast event feed
//! - `http`: client for a ledger exposed over REST
//!
//! and `rest`, which serves the same REST API over any backend.
//!
//! # Architecture
//!
//! ```text
//!   aggregator ──► LedgerClient ──┬─► InMemoryLedger ──► event feed
//!                                 │
//!                                 └─► HttpLedgerClient ──HTTP──► rest::router ──► LedgerClient
//! ```
//!
//! Every call is an independent operation; no multi-call transaction is
//! offered. Callers that need read-modify-write atomicity provide their own
//! exclusion.

pub mod client;
pub mod http;
pub mod memory;
pub mod rest;

pub use client::{AggregateFilter, LedgerClient, LedgerError};
pub use http::HttpLedgerClient;
pub use memory::InMemoryLedger;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
