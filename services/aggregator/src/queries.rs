//! Read-only aggregate queries
//!
//! Queries take no locks. Every result is wrapped in a `UsageQueried` event,
//! which is returned to the caller and also published to ledger observers.

use std::sync::Arc;

use ledger::AggregateFilter;
use tracing::{debug, warn};
use types::events::UsageEvent;
use types::ids::{DeviceId, ProviderId, UsageId};

use crate::store::{LedgerAdapter, StoreResult};

pub struct UsageQueries {
    ledger: Arc<LedgerAdapter>,
}

impl UsageQueries {
    pub fn new(ledger: Arc<LedgerAdapter>) -> Self {
        Self { ledger }
    }

    pub async fn all(&self) -> StoreResult<UsageEvent> {
        self.run(AggregateFilter::all()).await
    }

    pub async fn by_id(&self, usage_id: UsageId) -> StoreResult<UsageEvent> {
        self.run(AggregateFilter::by_id(usage_id)).await
    }

    pub async fn by_provider(&self, provider_id: ProviderId) -> StoreResult<UsageEvent> {
        self.run(AggregateFilter::by_provider(provider_id)).await
    }

    pub async fn by_device(&self, device_id: DeviceId) -> StoreResult<UsageEvent> {
        self.run(AggregateFilter::by_device(device_id)).await
    }

    pub async fn by_provider_and_device(
        &self,
        provider_id: ProviderId,
        device_id: DeviceId,
    ) -> StoreResult<UsageEvent> {
        self.run(AggregateFilter::by_provider_and_device(provider_id, device_id))
            .await
    }

    async fn run(&self, filter: AggregateFilter) -> StoreResult<UsageEvent> {
        let usages = self.ledger.query(&filter).await?;
        debug!(filter = ?filter, length = usages.len(), "Aggregates queried");

        let event = UsageEvent::queried(usages);
        if let Err(e) = self.ledger.emit(event.clone()).await {
            warn!(error = %e, "Query event not delivered");
        }
        Ok(event)
    }
}
