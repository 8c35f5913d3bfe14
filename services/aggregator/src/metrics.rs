//! Pipeline counters and latency tracking
//!
//! Plain atomics, read without coordination. `export` produces a flat
//! name → value map that the binary logs periodically and at shutdown.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PipelineMetrics {
    // Ingestion
    pub frames_received: AtomicU64,
    pub parse_errors: AtomicU64,
    pub routing_misses: AtomicU64,

    // Commits
    pub aggregates_created: AtomicU64,
    pub aggregates_merged: AtomicU64,
    pub point_updates: AtomicU64,
    pub lock_timeouts: AtomicU64,
    pub ledger_errors: AtomicU64,
    pub emit_failures: AtomicU64,
    pub commit_latency_us: Mutex<LatencyTracker>,
    pub lock_wait_us: Mutex<LatencyTracker>,

    // Dispatch
    pub in_flight: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            routing_misses: AtomicU64::new(0),
            aggregates_created: AtomicU64::new(0),
            aggregates_merged: AtomicU64::new(0),
            point_updates: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            ledger_errors: AtomicU64::new(0),
            emit_failures: AtomicU64::new(0),
            commit_latency_us: Mutex::new(LatencyTracker::new(1000)),
            lock_wait_us: Mutex::new(LatencyTracker::new(1000)),
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routing_miss(&self) {
        self.routing_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self, latency_us: u64) {
        self.aggregates_created.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    pub fn record_merged(&self, latency_us: u64) {
        self.aggregates_merged.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    pub fn record_point_update(&self) {
        self.point_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_error(&self) {
        self.ledger_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emit_failure(&self) {
        self.emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_wait(&self, wait_us: u64) {
        if let Ok(mut tracker) = self.lock_wait_us.lock() {
            tracker.record(wait_us);
        }
    }

    pub fn set_in_flight(&self, count: u64) {
        self.in_flight.store(count, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_us: u64) {
        if let Ok(mut tracker) = self.commit_latency_us.lock() {
            tracker.record(latency_us);
        }
    }

    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("frames_received".to_string(), self.frames_received.load(Ordering::Relaxed));
        m.insert("parse_errors".to_string(), self.parse_errors.load(Ordering::Relaxed));
        m.insert("routing_misses".to_string(), self.routing_misses.load(Ordering::Relaxed));
        m.insert("aggregates_created".to_string(), self.aggregates_created.load(Ordering::Relaxed));
        m.insert("aggregates_merged".to_string(), self.aggregates_merged.load(Ordering::Relaxed));
        m.insert("point_updates".to_string(), self.point_updates.load(Ordering::Relaxed));
        m.insert("lock_timeouts".to_string(), self.lock_timeouts.load(Ordering::Relaxed));
        m.insert("ledger_errors".to_string(), self.ledger_errors.load(Ordering::Relaxed));
        m.insert("emit_failures".to_string(), self.emit_failures.load(Ordering::Relaxed));
        m.insert("in_flight".to_string(), self.in_flight.load(Ordering::Relaxed));
        if let Ok(tracker) = self.commit_latency_us.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("commit_latency_p50_us".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("commit_latency_p99_us".to_string(), p99);
            }
        }
        if let Ok(tracker) = self.lock_wait_us.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("lock_wait_p99_us".to_string(), p99);
            }
        }
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding window of latency samples.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_export() {
        let metrics = PipelineMetrics::new();
        metrics.record_frame();
        metrics.record_frame();
        metrics.record_parse_error();
        metrics.record_created(120);
        metrics.record_merged(80);
        metrics.record_merged(100);
        metrics.record_lock_wait(7);

        let exported = metrics.export();
        assert_eq!(exported["frames_received"], 2);
        assert_eq!(exported["parse_errors"], 1);
        assert_eq!(exported["aggregates_created"], 1);
        assert_eq!(exported["aggregates_merged"], 2);
        assert_eq!(exported["commit_latency_p50_us"], 100);
        assert_eq!(exported["commit_latency_p99_us"], 100);
        assert_eq!(exported["lock_wait_p99_us"], 7);
    }

    #[test]
    fn test_latency_window() {
        let mut tracker = LatencyTracker::new(3);
        assert_eq!(tracker.percentile(50), None);

        for v in [1000, 1, 2, 3] {
            tracker.record(v);
        }
        assert_eq!(tracker.count(), 3);
        // Oldest sample fell out of the window
        assert_eq!(tracker.percentile(100), Some(3));
        assert_eq!(tracker.percentile(0), Some(1));
    }
}
