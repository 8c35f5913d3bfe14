//! Ledger client contract
//!
//! `query`, `get`, `add`, `update` and `emit` are each a single round-trip
//! with its own atomicity. Nothing here spans two calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::aggregate::Aggregate;
use types::events::UsageEvent;
use types::ids::{DeviceId, ProviderId, UsageId};

/// Errors returned by ledger backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("aggregate {0} already exists")]
    DuplicateKey(UsageId),

    #[error("aggregate {0} not found")]
    NotFound(UsageId),

    #[error("aggregate {usage_id}: {field} is immutable")]
    ImmutableField {
        usage_id: UsageId,
        field: &'static str,
    },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("ledger call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
}

/// Selection criteria for `query`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_id: Option<UsageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
}

impl AggregateFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(usage_id: UsageId) -> Self {
        Self {
            usage_id: Some(usage_id),
            ..Self::default()
        }
    }

    pub fn by_provider(provider_id: ProviderId) -> Self {
        Self {
            provider_id: Some(provider_id),
            ..Self::default()
        }
    }

    pub fn by_device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    pub fn by_provider_and_device(provider_id: ProviderId, device_id: DeviceId) -> Self {
        Self {
            usage_id: None,
            device_id: Some(device_id),
            provider_id: Some(provider_id),
        }
    }

    pub fn matches(&self, aggregate: &Aggregate) -> bool {
        self.usage_id.as_ref().map_or(true, |id| *id == aggregate.usage_id)
            && self.device_id.as_ref().map_or(true, |d| *d == aggregate.device_id)
            && self.provider_id.as_ref().map_or(true, |p| *p == aggregate.provider_id)
    }
}

/// The operations the ledger exposes to this service.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// All aggregates matching `filter`, ordered by usage id.
    async fn query(&self, filter: &AggregateFilter) -> Result<Vec<Aggregate>, LedgerError>;

    /// The aggregate stored under `usage_id`, or `NotFound`.
    async fn get(&self, usage_id: &UsageId) -> Result<Aggregate, LedgerError>;

    /// Store a new aggregate; `DuplicateKey` if the id is taken.
    async fn add(&self, aggregate: Aggregate) -> Result<(), LedgerError>;

    /// Replace a stored aggregate wholesale; `NotFound` if absent.
    async fn update(&self, aggregate: Aggregate) -> Result<(), LedgerError>;

    /// Publish a domain event to ledger observers.
    async fn emit(&self, event: UsageEvent) -> Result<(), LedgerError>;
}
