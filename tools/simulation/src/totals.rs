//! Expected per-device usage
//!
//! Sums frame sizes per routed device, which is what the aggregator's
//! ledger must hold once it has ingested the same frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use types::ids::DeviceId;

use crate::network::Network;
use crate::traffic::SimFrame;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedTotals {
    pub per_device: BTreeMap<DeviceId, u64>,
    /// Frames whose source has no route and should be dropped.
    pub unrouted_frames: u64,
}

impl ExpectedTotals {
    pub fn from_frames<'a>(network: &Network, frames: impl IntoIterator<Item = &'a SimFrame>) -> Self {
        let mut totals = Self::default();
        for frame in frames {
            totals.record(network, frame);
        }
        totals
    }

    pub fn record(&mut self, network: &Network, frame: &SimFrame) {
        match network.device_for(&frame.source) {
            Some(device) => *self.per_device.entry(device.clone()).or_insert(0) += frame.bytes,
            None => self.unrouted_frames += 1,
        }
    }

    pub fn get(&self, device: &DeviceId) -> Option<u64> {
        self.per_device.get(device).copied()
    }

    pub fn total(&self) -> u64 {
        self.per_device.values().sum()
    }
}
