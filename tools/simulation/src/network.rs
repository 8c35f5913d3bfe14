//! Simulated hosts
//!
//! Hosts get consecutive addresses in `10.1.<n>.<m>` and consecutive device
//! ids starting from a base, so a run is reproducible from its size alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::errors::IdError;
use types::ids::{DeviceId, SourceAddress};

/// Device id of the first host.
pub const BASE_DEVICE_ID: u64 = 123_456;

/// Hosts per /24 before moving to the next third octet.
const HOSTS_PER_SUBNET: usize = 254;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("host count must be between 1 and {max}, got {got}")]
    HostCount { max: usize, got: usize },

    #[error(transparent)]
    Id(#[from] IdError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimHost {
    pub source_address: SourceAddress,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone)]
pub struct Network {
    hosts: Vec<SimHost>,
}

impl Network {
    pub const MAX_HOSTS: usize = HOSTS_PER_SUBNET * 254;

    pub fn new(host_count: usize) -> Result<Self, NetworkError> {
        if host_count == 0 || host_count > Self::MAX_HOSTS {
            return Err(NetworkError::HostCount {
                max: Self::MAX_HOSTS,
                got: host_count,
            });
        }

        let hosts = (0..host_count)
            .map(|i| {
                let subnet = 1 + i / HOSTS_PER_SUBNET;
                let host = 1 + i % HOSTS_PER_SUBNET;
                Ok(SimHost {
                    source_address: SourceAddress::new(format!("10.1.{}.{}", subnet, host))?,
                    device_id: DeviceId::new((BASE_DEVICE_ID + i as u64).to_string())?,
                })
            })
            .collect::<Result<Vec<_>, IdError>>()?;

        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[SimHost] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn device_for(&self, source: &SourceAddress) -> Option<&DeviceId> {
        self.hosts
            .iter()
            .find(|h| h.source_address == *source)
            .map(|h| &h.device_id)
    }

    /// Routing table JSON in the aggregator's format.
    pub fn routing_json(&self) -> String {
        serde_json::to_string_pretty(&self.hosts).unwrap_or_default()
    }
}
