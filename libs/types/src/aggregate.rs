//! The usage aggregate asset held by the ledger

use serde::{Deserialize, Serialize};

use crate::errors::ValueError;
use crate::ids::{AggregationKey, DeviceId, ProviderId, UsageId};
use crate::numeric::UsageValue;

/// Cumulative usage of one device on behalf of one provider.
///
/// `device_id` and `provider_id` never change after creation; only
/// `usage_value` is mutated, by merges and point updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub usage_id: UsageId,
    pub device_id: DeviceId,
    pub provider_id: ProviderId,
    pub usage_value: UsageValue,
}

impl Aggregate {
    /// First aggregate for a key, seeded with the first observation.
    pub fn for_key(key: &AggregationKey, usage_value: UsageValue) -> Self {
        Self {
            usage_id: key.usage_id(),
            device_id: key.device_id.clone(),
            provider_id: key.provider_id.clone(),
            usage_value,
        }
    }

    /// Aggregate under a caller-chosen identifier.
    pub fn with_id(
        usage_id: UsageId,
        device_id: DeviceId,
        provider_id: ProviderId,
        usage_value: UsageValue,
    ) -> Self {
        Self {
            usage_id,
            device_id,
            provider_id,
            usage_value,
        }
    }

    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(self.device_id.clone(), self.provider_id.clone())
    }

    /// Full record with `observed` added to the stored value.
    pub fn merged(&self, observed: UsageValue) -> Result<Self, ValueError> {
        Ok(Self {
            usage_value: self.usage_value.checked_add(observed)?,
            ..self.clone()
        })
    }
}
