//! Usage Aggregation Service
//!
//! Consumes metering frames from a byte stream and folds each observation
//! into the ledger's per-(device, provider) usage aggregate:
//! - Routing of source addresses to devices
//! - Frame parsing
//! - Per-key locking so concurrent updates of one aggregate never race
//! - Read-merge-write against the ledger with bounded call timeouts
//! - Fire-and-forget ingestion with a bounded in-flight pool
//!
//! # Architecture
//!
//! ```text
//!  Unix / TCP stream
//!        │
//!   ┌────▼─────┐
//!   │  Server  │  ← frames, parse, bounded dispatch
//!   └────┬─────┘
//!        │ admit (route + reserve key lock, in arrival order)
//!   ┌────▼─────┐      ┌──────────┐
//!   │ Pipeline │◄────►│ KeyLocks │
//!   └────┬─────┘      └──────────┘
//!        │ query → create | merge → emit
//!   ┌────▼─────┐
//!   │  Ledger  │  (external, via LedgerClient)
//!   └──────────┘
//! ```

pub mod config;
pub mod locks;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod queries;
pub mod routing;
pub mod server;
pub mod store;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
