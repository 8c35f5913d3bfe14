//! Read-merge-write aggregation pipeline
//!
//! Each record moves through:
//!
//! ```text
//! RECEIVED → ROUTED → LOCKED → QUERIED → CREATE | MERGE → COMMITTED
//!          ↘ DROPPED (no route)
//! LOCKED → FAILED (ledger error; lock released, nothing written)
//! ```
//!
//! The ledger's `get`, `add` and `update` are each atomic but the sequence
//! is not, so every mutation of an aggregate runs under that aggregate's
//! [`KeyLocks`] entry. All three write paths (aggregation, explicit-id
//! create and point update) lock on the target usage id, so they exclude
//! each other whenever they touch the same aggregate.
//!
//! Ingestion splits a record into [`Pipeline::admit`], which is synchronous
//! and reserves the lock in arrival order, and [`Pipeline::commit`], which
//! runs on a spawned task. Per key, commits therefore happen in the order
//! frames were read.
//!
//! The aggregation path only merges into an aggregate whose stored
//! `(device, provider)` matches the key, and an explicit id shaped like a
//! derived id is accepted only for its own pair. Usage is never credited to
//! another device.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};
use types::aggregate::Aggregate;
use types::errors::ValueError;
use types::events::UsageEvent;
use types::ids::{AggregationKey, ProviderId, UsageId};
use types::numeric::UsageValue;

use ledger::LedgerError;

use crate::locks::{KeyGuard, KeyLocks, LockError, PendingLock};
use crate::metrics::PipelineMetrics;
use crate::parser::ParsedRecord;
use crate::routing::{RoutingError, RoutingTable};
use crate::store::{LedgerAdapter, LedgerCallError};

/// Default time a waiter tolerates without the key changing hands.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Provider credited with every ingested record.
    pub provider_id: ProviderId,
    pub lock_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("lock on {usage_id}: {source}")]
    Lock {
        usage_id: UsageId,
        #[source]
        source: LockError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerCallError),

    #[error("aggregate {usage_id} already exists")]
    DuplicateKeyOnCreate { usage_id: UsageId },

    #[error("aggregate {usage_id} belongs to {found}, not {expected}")]
    KeyMismatch {
        usage_id: UsageId,
        expected: AggregationKey,
        found: AggregationKey,
    },

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl PipelineError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(
            self,
            PipelineError::Lock {
                source: LockError::Timeout { .. },
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitKind {
    Created,
    Merged { old_usage_value: UsageValue },
    Overwritten { old_usage_value: UsageValue },
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub aggregate: Aggregate,
    pub kind: CommitKind,
}

/// A routed record holding its place in the key's queue.
pub struct Admission {
    key: AggregationKey,
    value: UsageValue,
    lock: PendingLock<UsageId>,
    admitted_at: Instant,
}

impl Admission {
    pub fn key(&self) -> &AggregationKey {
        &self.key
    }

    pub fn value(&self) -> UsageValue {
        self.value
    }
}

pub struct Pipeline {
    routing: Arc<RoutingTable>,
    ledger: Arc<LedgerAdapter>,
    locks: KeyLocks<UsageId>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(
        routing: Arc<RoutingTable>,
        ledger: Arc<LedgerAdapter>,
        config: PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            routing,
            ledger,
            locks: KeyLocks::new(),
            config,
            metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerAdapter> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Keys with a commit in progress or queued.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }

    /// Route a record and reserve its key. Never waits.
    pub fn admit(&self, record: ParsedRecord) -> Result<Admission, PipelineError> {
        let device_id = match self.routing.resolve(&record.source) {
            Ok(device_id) => device_id.clone(),
            Err(e) => {
                self.metrics.record_routing_miss();
                warn!(source = %record.source, "Dropping record: no route");
                return Err(e.into());
            }
        };

        let key = AggregationKey::new(device_id, self.config.provider_id.clone());
        debug!(key = %key, value = %record.value, "Record routed");
        Ok(self.admit_key(key, record.value))
    }

    fn admit_key(&self, key: AggregationKey, value: UsageValue) -> Admission {
        let lock = self.locks.reserve(key.usage_id());
        Admission {
            key,
            value,
            lock,
            admitted_at: Instant::now(),
        }
    }

    /// Wait for the key and fold the value into its aggregate.
    pub async fn commit(&self, admission: Admission) -> Result<Committed, PipelineError> {
        let Admission {
            key,
            value,
            lock,
            admitted_at,
        } = admission;

        let _guard = self.wait(lock).await?;
        let result = self.read_merge_write(&key, value).await;
        let latency_us = admitted_at.elapsed().as_micros() as u64;

        match &result {
            Ok(committed) => match committed.kind {
                CommitKind::Created => self.metrics.record_created(latency_us),
                _ => self.metrics.record_merged(latency_us),
            },
            Err(e) => self.record_failure("aggregate", &key.usage_id(), e),
        }
        result
    }

    /// Route, lock and commit one record.
    pub async fn process(&self, record: ParsedRecord) -> Result<Committed, PipelineError> {
        let admission = self.admit(record)?;
        self.commit(admission).await
    }

    /// Add `value` to the aggregate for `key`, creating it if needed.
    pub async fn add_usage(
        &self,
        key: AggregationKey,
        value: UsageValue,
    ) -> Result<Committed, PipelineError> {
        let admission = self.admit_key(key, value);
        self.commit(admission).await
    }

    /// Create an aggregate under a caller-chosen id. Never merges.
    ///
    /// An id of the `<device>_<provider>` shape must be the aggregate's own
    /// derived id.
    pub async fn create_with_id(&self, aggregate: Aggregate) -> Result<Committed, PipelineError> {
        let usage_id = aggregate.usage_id.clone();
        let started = Instant::now();
        let _guard = self.wait(self.locks.reserve(usage_id.clone())).await?;

        let result = self.create_explicit(aggregate).await;
        match &result {
            Ok(_) => self
                .metrics
                .record_created(started.elapsed().as_micros() as u64),
            Err(e) => self.record_failure("create", &usage_id, e),
        }
        result
    }

    /// Overwrite the value of an existing aggregate.
    pub async fn update_usage(
        &self,
        usage_id: UsageId,
        new_usage_value: UsageValue,
    ) -> Result<Committed, PipelineError> {
        let _guard = self.wait(self.locks.reserve(usage_id.clone())).await?;

        let result = self.overwrite(&usage_id, new_usage_value).await;
        match &result {
            Ok(_) => self.metrics.record_point_update(),
            Err(e) => self.record_failure("update", &usage_id, e),
        }
        result
    }

    async fn wait(&self, lock: PendingLock<UsageId>) -> Result<KeyGuard<UsageId>, PipelineError> {
        let usage_id = lock.key().clone();
        let started = Instant::now();
        match lock.wait(self.config.lock_timeout).await {
            Ok(guard) => {
                self.metrics
                    .record_lock_wait(started.elapsed().as_micros() as u64);
                debug!(usage_id = %usage_id, "Lock acquired");
                Ok(guard)
            }
            Err(source) => {
                self.metrics.record_lock_timeout();
                error!(usage_id = %usage_id, error = %source, "Lock not granted");
                Err(PipelineError::Lock { usage_id, source })
            }
        }
    }

    /// Caller must hold the id's lock.
    async fn create_explicit(&self, aggregate: Aggregate) -> Result<Committed, PipelineError> {
        if let Some(derived) = aggregate.usage_id.derived_key() {
            let found = aggregate.key();
            if derived != found {
                return Err(PipelineError::KeyMismatch {
                    usage_id: aggregate.usage_id,
                    expected: derived,
                    found,
                });
            }
        }

        self.ledger
            .create_aggregate(aggregate.clone())
            .await
            .map_err(create_failed)?;
        debug!(usage_id = %aggregate.usage_id, value = %aggregate.usage_value, "Aggregate created");

        self.emit(UsageEvent::created(aggregate.clone())).await;
        Ok(Committed {
            aggregate,
            kind: CommitKind::Created,
        })
    }

    /// Caller must hold the id's lock.
    async fn overwrite(
        &self,
        usage_id: &UsageId,
        new_usage_value: UsageValue,
    ) -> Result<Committed, PipelineError> {
        let existing = self.ledger.get_aggregate(usage_id).await?;
        let old_usage_value = existing.usage_value;
        let aggregate = Aggregate {
            usage_value: new_usage_value,
            ..existing
        };

        self.ledger.update_aggregate(aggregate.clone()).await?;
        debug!(
            usage_id = %usage_id,
            old = %old_usage_value,
            new = %new_usage_value,
            "Aggregate overwritten"
        );

        self.emit(UsageEvent::updated(aggregate.clone(), old_usage_value))
            .await;
        Ok(Committed {
            aggregate,
            kind: CommitKind::Overwritten { old_usage_value },
        })
    }

    /// Caller must hold the key's lock.
    async fn read_merge_write(
        &self,
        key: &AggregationKey,
        value: UsageValue,
    ) -> Result<Committed, PipelineError> {
        match self.ledger.query_aggregate(key).await? {
            None => {
                let aggregate = Aggregate::for_key(key, value);
                self.ledger
                    .create_aggregate(aggregate.clone())
                    .await
                    .map_err(create_failed)?;
                debug!(key = %key, value = %value, "Aggregate created");

                self.emit(UsageEvent::created(aggregate.clone())).await;
                Ok(Committed {
                    aggregate,
                    kind: CommitKind::Created,
                })
            }
            Some(existing) => {
                let found = existing.key();
                if found != *key {
                    return Err(PipelineError::KeyMismatch {
                        usage_id: existing.usage_id,
                        expected: key.clone(),
                        found,
                    });
                }

                let old_usage_value = existing.usage_value;
                let aggregate = existing.merged(value)?;
                self.ledger.update_aggregate(aggregate.clone()).await?;
                debug!(
                    key = %key,
                    old = %old_usage_value,
                    new = %aggregate.usage_value,
                    "Aggregate merged"
                );

                self.emit(UsageEvent::updated(aggregate.clone(), old_usage_value))
                    .await;
                Ok(Committed {
                    aggregate,
                    kind: CommitKind::Merged { old_usage_value },
                })
            }
        }
    }

    /// Lock failures are counted and logged where they happen.
    fn record_failure(&self, operation: &'static str, usage_id: &UsageId, e: &PipelineError) {
        match e {
            PipelineError::Lock { .. } => return,
            PipelineError::Ledger(_) => self.metrics.record_ledger_error(),
            _ => {}
        }
        error!(operation, usage_id = %usage_id, error = %e, "Usage write failed");
    }

    /// The write is already committed; a lost event is logged, not fatal.
    async fn emit(&self, event: UsageEvent) {
        let event_type = event.event_type_label();
        if let Err(e) = self.ledger.emit(event).await {
            self.metrics.record_emit_failure();
            warn!(event_type, error = %e, "Event not delivered");
        }
    }
}

fn create_failed(e: LedgerCallError) -> PipelineError {
    match e.source {
        LedgerError::DuplicateKey(usage_id) => PipelineError::DuplicateKeyOnCreate { usage_id },
        _ => e.into(),
    }
}
