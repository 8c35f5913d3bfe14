//! Per-key mutual exclusion
//!
//! One single-permit semaphore per key, created on first use and removed
//! when the last holder or waiter lets go, so the table only ever holds keys
//! with work in progress. Different keys never contend.
//!
//! Waiters on a key are served in the order they called [`KeyLocks::reserve`].
//! Reservation is synchronous: it joins the semaphore's FIFO queue before
//! returning, so a caller that reserves in arrival order and then hands the
//! [`PendingLock`] to a spawned task keeps that order no matter how the
//! runtime schedules the tasks.
//!
//! The wait timeout bounds time without progress, not time in the queue: a
//! waiter gives up only when a whole timeout window passes with no holder
//! releasing the key. A long backlog behind healthy holders always drains.

use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

type AcquireFuture =
    Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

type Slots<K> = DashMap<K, Arc<Slot>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("no progress on lock for {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("lock slot closed")]
    Closed,
}

struct Slot {
    semaphore: Arc<Semaphore>,
    /// Bumped every time a holder lets go.
    releases: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            releases: AtomicU64::new(0),
        }
    }
}

/// Table of per-key locks. Cloning shares the table.
pub struct KeyLocks<K> {
    slots: Arc<Slots<K>>,
}

impl<K> Clone for KeyLocks<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K> Default for KeyLocks<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyLocks<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Take a place in `key`'s queue without waiting.
    ///
    /// The place is held until the returned [`PendingLock`] is waited on or
    /// dropped.
    pub fn reserve(&self, key: K) -> PendingLock<K> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone();

        // Unconstrained so the first poll is never turned away by the
        // task's coop budget before it has enqueued.
        let mut acquire: AcquireFuture = Box::pin(tokio::task::unconstrained(
            slot.semaphore.clone().acquire_owned(),
        ));
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        let reservation = match acquire.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(permit)) => Reservation::Granted(permit),
            Poll::Ready(Err(_)) => Reservation::Closed,
            Poll::Pending => Reservation::Queued(acquire),
        };

        PendingLock {
            key,
            slots: self.slots.clone(),
            slot: Some(slot),
            reservation: Some(reservation),
        }
    }

    /// Wait for exclusive use of `key`, giving up once `timeout` passes
    /// with no holder releasing it.
    pub async fn acquire(&self, key: K, timeout: Duration) -> Result<KeyGuard<K>, LockError> {
        self.reserve(key).wait(timeout).await
    }

    /// Run `f` while holding `key`. The lock is released when `f` finishes,
    /// fails or panics.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: K,
        timeout: Duration,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(key, timeout).await?;
        Ok(f().await)
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn evict_if_idle<K: Eq + Hash>(slots: &Slots<K>, key: &K) {
    // Only the table's own handle left means nobody holds or waits.
    slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
}

enum Reservation {
    Granted(OwnedSemaphorePermit),
    Queued(AcquireFuture),
    Closed,
}

/// A place in a key's queue.
pub struct PendingLock<K: Eq + Hash> {
    key: K,
    slots: Arc<Slots<K>>,
    slot: Option<Arc<Slot>>,
    reservation: Option<Reservation>,
}

impl<K> PendingLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// True if the lock was free when reserved.
    pub fn is_granted(&self) -> bool {
        matches!(self.reservation, Some(Reservation::Granted(_)))
    }

    fn releases(&self) -> u64 {
        self.slot
            .as_ref()
            .map_or(0, |slot| slot.releases.load(Ordering::Acquire))
    }

    /// Wait for the lock. Fails once a full `timeout` window passes without
    /// any holder releasing the key; the place in the queue is then given up.
    pub async fn wait(mut self, timeout: Duration) -> Result<KeyGuard<K>, LockError> {
        let permit = match self.reservation.take() {
            Some(Reservation::Granted(permit)) => permit,
            Some(Reservation::Queued(mut acquire)) => {
                let mut seen = self.releases();
                loop {
                    match tokio::time::timeout(timeout, &mut acquire).await {
                        Ok(Ok(permit)) => break permit,
                        Ok(Err(_)) => return Err(LockError::Closed),
                        Err(_) => {
                            let now = self.releases();
                            if now == seen {
                                return Err(LockError::Timeout {
                                    waited_ms: timeout.as_millis() as u64,
                                });
                            }
                            seen = now;
                        }
                    }
                }
            }
            Some(Reservation::Closed) | None => return Err(LockError::Closed),
        };

        Ok(KeyGuard {
            key: self.key.clone(),
            slots: self.slots.clone(),
            slot: self.slot.take(),
            permit: Some(permit),
        })
    }
}

impl<K: Eq + Hash> Drop for PendingLock<K> {
    fn drop(&mut self) {
        drop(self.reservation.take());
        drop(self.slot.take());
        evict_if_idle(&self.slots, &self.key);
    }
}

/// Exclusive hold on one key. Released on drop.
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    slots: Arc<Slots<K>>,
    slot: Option<Arc<Slot>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<K: Eq + Hash> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.releases.fetch_add(1, Ordering::Release);
        }
        drop(self.permit.take());
        evict_if_idle(&self.slots, &self.key);
    }
}
