//! Process-local ledger backend
//!
//! Each primitive is atomic on its own (a single DashMap shard operation),
//! exactly like the remote ledger; nothing makes a query followed by an
//! update atomic. Emitted events fan out to subscribers over a broadcast
//! channel.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use types::aggregate::Aggregate;
use types::events::UsageEvent;
use types::ids::UsageId;

use crate::client::{AggregateFilter, LedgerClient, LedgerError};

/// Default capacity of the event feed before slow subscribers lag.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub struct InMemoryLedger {
    assets: DashMap<UsageId, Aggregate>,
    events: broadcast::Sender<UsageEvent>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            assets: DashMap::new(),
            events,
        }
    }

    /// Seed the ledger with existing aggregates, bypassing events.
    pub fn with_aggregates(aggregates: impl IntoIterator<Item = Aggregate>) -> Self {
        let ledger = Self::new();
        for aggregate in aggregates {
            ledger.assets.insert(aggregate.usage_id.clone(), aggregate);
        }
        ledger
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.events.subscribe()
    }

    /// Copy of every stored aggregate, ordered by usage id.
    pub fn snapshot(&self) -> Vec<Aggregate> {
        let mut all: Vec<Aggregate> = self.assets.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.usage_id.cmp(&b.usage_id));
        all
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn query(&self, filter: &AggregateFilter) -> Result<Vec<Aggregate>, LedgerError> {
        if let Some(id) = &filter.usage_id {
            return Ok(self
                .assets
                .get(id)
                .map(|e| e.value().clone())
                .filter(|a| filter.matches(a))
                .into_iter()
                .collect());
        }

        let mut results: Vec<Aggregate> = self
            .assets
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        results.sort_by(|a, b| a.usage_id.cmp(&b.usage_id));
        Ok(results)
    }

    async fn get(&self, usage_id: &UsageId) -> Result<Aggregate, LedgerError> {
        self.assets
            .get(usage_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LedgerError::NotFound(usage_id.clone()))
    }

    async fn add(&self, aggregate: Aggregate) -> Result<(), LedgerError> {
        match self.assets.entry(aggregate.usage_id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateKey(aggregate.usage_id)),
            Entry::Vacant(slot) => {
                debug!(usage_id = %aggregate.usage_id, usage_value = %aggregate.usage_value, "Aggregate added");
                slot.insert(aggregate);
                Ok(())
            }
        }
    }

    async fn update(&self, aggregate: Aggregate) -> Result<(), LedgerError> {
        let mut stored = self
            .assets
            .get_mut(&aggregate.usage_id)
            .ok_or_else(|| LedgerError::NotFound(aggregate.usage_id.clone()))?;

        if stored.device_id != aggregate.device_id {
            return Err(LedgerError::ImmutableField {
                usage_id: aggregate.usage_id,
                field: "deviceId",
            });
        }
        if stored.provider_id != aggregate.provider_id {
            return Err(LedgerError::ImmutableField {
                usage_id: aggregate.usage_id,
                field: "providerId",
            });
        }

        debug!(
            usage_id = %aggregate.usage_id,
            old = %stored.usage_value,
            new = %aggregate.usage_value,
            "Aggregate updated"
        );
        *stored = aggregate;
        Ok(())
    }

    async fn emit(&self, event: UsageEvent) -> Result<(), LedgerError> {
        let label = event.event_type_label();
        // No subscribers is not an error: events are fire-and-forget.
        let receivers = self.events.send(event).unwrap_or(0);
        trace!(event_type = label, receivers, "Event emitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::events::UsageEventPayload;
    use types::ids::{AggregationKey, DeviceId, ProviderId};
    use types::numeric::UsageValue;

    fn aggregate(device: &str, provider: &str, value: u64) -> Aggregate {
        let key = AggregationKey::new(DeviceId::new(device).unwrap(), ProviderId::new(provider).unwrap());
        Aggregate::for_key(&key, UsageValue::from_u64(value))
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let ledger = InMemoryLedger::new();
        ledger.add(aggregate("123456", "1", 10)).await.unwrap();

        let stored = ledger.get(&UsageId::new("123456_1").unwrap()).await.unwrap();
        assert_eq!(stored.usage_value, UsageValue::from_u64(10));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_add_duplicate_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.add(aggregate("123456", "1", 10)).await.unwrap();

        let err = ledger.add(aggregate("123456", "1", 99)).await.unwrap_err();
        assert_eq!(err, LedgerError::DuplicateKey(UsageId::new("123456_1").unwrap()));

        // First write wins, nothing overwritten
        let stored = ledger.get(&UsageId::new("123456_1").unwrap()).await.unwrap();
        assert_eq!(stored.usage_value, UsageValue::from_u64(10));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger.update(aggregate("1", "1", 5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_identity_change() {
        let seeded = Aggregate::with_id(
            UsageId::new("1").unwrap(),
            DeviceId::new("123456").unwrap(),
            ProviderId::new("1").unwrap(),
            UsageValue::from_u64(10),
        );
        let ledger = InMemoryLedger::with_aggregates([seeded.clone()]);

        let moved = Aggregate {
            device_id: DeviceId::new("654321").unwrap(),
            ..seeded
        };
        let err = ledger.update(moved).await.unwrap_err();
        assert!(matches!(err, LedgerError::ImmutableField { field: "deviceId", .. }));
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let ledger = InMemoryLedger::with_aggregates([
            aggregate("222", "1", 1),
            aggregate("111", "1", 2),
            aggregate("111", "2", 3),
        ]);

        let all = ledger.query(&AggregateFilter::all()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|a| a.usage_id.as_str()).collect();
        assert_eq!(ids, vec!["111_1", "111_2", "222_1"]);

        let by_provider = ledger
            .query(&AggregateFilter::by_provider(ProviderId::new("1").unwrap()))
            .await
            .unwrap();
        assert_eq!(by_provider.len(), 2);

        let by_id = ledger
            .query(&AggregateFilter::by_id(UsageId::new("111_2").unwrap()))
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);

        let none = ledger
            .query(&AggregateFilter::by_id(UsageId::new("missing").unwrap()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let ledger = InMemoryLedger::new();
        // Emitting without subscribers must not fail
        ledger.emit(UsageEvent::queried(vec![])).await.unwrap();

        let mut rx = ledger.subscribe();
        ledger.emit(UsageEvent::created(aggregate("1", "1", 1))).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, UsageEventPayload::UsageCreated { .. }));
    }
}
