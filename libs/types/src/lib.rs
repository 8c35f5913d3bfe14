//! Types library for the usage aggregation service
//!
//! This library provides the core type definitions shared by the ledger
//! client, the aggregation pipeline and the traffic simulator.
//!
//! # Modules
//! - `ids`: Validated identifiers (DeviceId, ProviderId, UsageId, SourceAddress, AggregationKey)
//! - `numeric`: Non-negative decimal usage quantities (UsageValue)
//! - `aggregate`: The ledger's usage asset (Aggregate)
//! - `events`: Domain events emitted to ledger observers
//! - `errors`: Validation error taxonomy

pub mod ids;
pub mod numeric;
pub mod aggregate;
pub mod events;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::aggregate::*;
    pub use crate::events::*;
    pub use crate::errors::*;
}
