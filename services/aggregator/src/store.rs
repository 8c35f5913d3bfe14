//! Ledger access for the pipeline
//!
//! Wraps a [`LedgerClient`] so every call is bounded by a timeout and every
//! failure says which operation it came from.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ledger::{AggregateFilter, LedgerClient, LedgerError};
use thiserror::Error;
use types::aggregate::Aggregate;
use types::events::UsageEvent;
use types::ids::{AggregationKey, UsageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Query,
    Get,
    Create,
    Update,
    Emit,
}

impl fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerOp::Query => "query",
            LedgerOp::Get => "get",
            LedgerOp::Create => "create",
            LedgerOp::Update => "update",
            LedgerOp::Emit => "emit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger {op} failed: {source}")]
pub struct LedgerCallError {
    pub op: LedgerOp,
    #[source]
    pub source: LedgerError,
}

pub type StoreResult<T> = Result<T, LedgerCallError>;

pub struct LedgerAdapter {
    client: Arc<dyn LedgerClient>,
    call_timeout: Duration,
}

impl LedgerAdapter {
    pub fn new(client: Arc<dyn LedgerClient>, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    async fn call<T, F>(&self, op: LedgerOp, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = Result<T, LedgerError>>,
    {
        let result = match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout {
                after_ms: self.call_timeout.as_millis() as u64,
            }),
        };
        result.map_err(|source| LedgerCallError { op, source })
    }

    /// The aggregate for `key`, or `None` if the key has never been seen.
    ///
    /// Looks the aggregate up by its derived usage id, so aggregates created
    /// under an explicit id are never picked up by the aggregation path.
    pub async fn query_aggregate(&self, key: &AggregationKey) -> StoreResult<Option<Aggregate>> {
        let usage_id = key.usage_id();
        match self.call(LedgerOp::Query, self.client.get(&usage_id)).await {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(LedgerCallError {
                source: LedgerError::NotFound(_),
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_aggregate(&self, usage_id: &UsageId) -> StoreResult<Aggregate> {
        self.call(LedgerOp::Get, self.client.get(usage_id)).await
    }

    pub async fn create_aggregate(&self, aggregate: Aggregate) -> StoreResult<()> {
        self.call(LedgerOp::Create, self.client.add(aggregate)).await
    }

    pub async fn update_aggregate(&self, aggregate: Aggregate) -> StoreResult<()> {
        self.call(LedgerOp::Update, self.client.update(aggregate)).await
    }

    pub async fn query(&self, filter: &AggregateFilter) -> StoreResult<Vec<Aggregate>> {
        self.call(LedgerOp::Query, self.client.query(filter)).await
    }

    pub async fn emit(&self, event: UsageEvent) -> StoreResult<()> {
        self.call(LedgerOp::Emit, self.client.emit(event)).await
    }
}
