//! Domain events emitted to ledger observers
//!
//! The ledger publishes one event per committed create or update and one per
//! answered query. Events are consumed outside the aggregation core; the core
//! only guarantees that before/after values are accurate for the writes it
//! drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::numeric::UsageValue;

/// Envelope for every usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Unique event identifier (UUID v7, time-sortable)
    pub event_id: Uuid,
    /// Wall-clock time the event was built
    pub emitted_at: DateTime<Utc>,
    pub payload: UsageEventPayload,
}

/// Event-specific payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum UsageEventPayload {
    /// A new aggregate was added to the ledger
    UsageCreated { usage: Aggregate },

    /// An aggregate's value was replaced
    UsageUpdated {
        usage: Aggregate,
        old_usage_value: UsageValue,
        new_usage_value: UsageValue,
    },

    /// A read-only query was answered
    UsageQueried { length: usize, usages: Vec<Aggregate> },
}

impl UsageEvent {
    fn now(payload: UsageEventPayload) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            emitted_at: Utc::now(),
            payload,
        }
    }

    pub fn created(usage: Aggregate) -> Self {
        Self::now(UsageEventPayload::UsageCreated { usage })
    }

    /// `usage` carries the new value; `old_usage_value` is what the ledger
    /// held before the write.
    pub fn updated(usage: Aggregate, old_usage_value: UsageValue) -> Self {
        let new_usage_value = usage.usage_value;
        Self::now(UsageEventPayload::UsageUpdated {
            usage,
            old_usage_value,
            new_usage_value,
        })
    }

    pub fn queried(usages: Vec<Aggregate>) -> Self {
        Self::now(UsageEventPayload::UsageQueried {
            length: usages.len(),
            usages,
        })
    }

    /// Get the event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            UsageEventPayload::UsageCreated { .. } => "UsageCreated",
            UsageEventPayload::UsageUpdated { .. } => "UsageUpdated",
            UsageEventPayload::UsageQueried { .. } => "UsageQueried",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AggregationKey, DeviceId, ProviderId};

    fn aggregate(value: u64) -> Aggregate {
        let key = AggregationKey::new(DeviceId::new("123456").unwrap(), ProviderId::new("1").unwrap());
        Aggregate::for_key(&key, UsageValue::from_u64(value))
    }

    #[test]
    fn test_updated_carries_both_values() {
        let event = UsageEvent::updated(aggregate(10), UsageValue::from_u64(7));
        match event.payload {
            UsageEventPayload::UsageUpdated {
                old_usage_value,
                new_usage_value,
                ..
            } => {
                assert_eq!(old_usage_value, UsageValue::from_u64(7));
                assert_eq!(new_usage_value, UsageValue::from_u64(10));
            }
            other => panic!("Expected UsageUpdated, got {:?}", other),
        }
    }

    #[test]
    fn test_queried_counts_results() {
        let event = UsageEvent::queried(vec![aggregate(1), aggregate(2)]);
        assert_eq!(event.event_type_label(), "UsageQueried");
        match event.payload {
            UsageEventPayload::UsageQueried { length, usages } => {
                assert_eq!(length, 2);
                assert_eq!(usages.len(), 2);
            }
            other => panic!("Expected UsageQueried, got {:?}", other),
        }
    }

    #[test]
    fn test_json_tagging() {
        let event = UsageEvent::updated(aggregate(10), UsageValue::from_u64(10));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["eventType"], "UsageUpdated");
        assert_eq!(json["payload"]["oldUsageValue"], "10");
        assert_eq!(json["payload"]["newUsageValue"], "10");

        let back: UsageEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
