//! Metering Traffic Simulator
//!
//! Stands in for the packet-level network simulation that feeds the usage
//! aggregator. Produces the same TAB-delimited frames a metering tap
//! would (`source \t destination \t bytes`), deterministically from a seed,
//! together with the routing table the aggregator needs and the per-device
//! totals it should end up with.
//!
//! # Modules
//! - `network`: Simulated hosts and their routing table
//! - `traffic`: Seeded frame generator
//! - `totals`: Expected per-device usage for a frame sequence
//! - `export`: JSON export of a simulation run

pub mod export;
pub mod network;
pub mod totals;
pub mod traffic;

/// Crate version constant
pub const VERSION: &str = "0.1.0";
