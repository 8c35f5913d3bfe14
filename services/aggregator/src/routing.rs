//! Static source-address → device routing table
//!
//! Loaded once at startup and never mutated, so lookups need no
//! synchronization. The file is a JSON array of
//! `{"sourceAddress": ..., "deviceId": ...}` objects; the legacy
//! `{"ip": ..., "imsi": ...}` spelling is accepted too.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use types::ids::{DeviceId, SourceAddress};

/// A record whose source has no route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no route for source address {0}")]
pub struct RoutingError(pub SourceAddress);

/// Errors building the table.
#[derive(Debug, Error)]
pub enum RoutingConfigError {
    #[error("reading routing table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing routing table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source address {address} routed to both {first} and {second}")]
    Conflict {
        address: SourceAddress,
        first: DeviceId,
        second: DeviceId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingEntry {
    #[serde(alias = "ip")]
    pub source_address: SourceAddress,
    #[serde(alias = "imsi")]
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<SourceAddress, DeviceId>,
}

impl RoutingTable {
    /// Build from entries. Repeating an entry is harmless; routing one
    /// address to two devices is rejected.
    pub fn from_entries(
        entries: impl IntoIterator<Item = RoutingEntry>,
    ) -> Result<Self, RoutingConfigError> {
        let mut routes: HashMap<SourceAddress, DeviceId> = HashMap::new();
        for entry in entries {
            match routes.get(&entry.source_address) {
                Some(existing) if *existing != entry.device_id => {
                    return Err(RoutingConfigError::Conflict {
                        address: entry.source_address,
                        first: existing.clone(),
                        second: entry.device_id,
                    });
                }
                Some(_) => {}
                None => {
                    routes.insert(entry.source_address, entry.device_id);
                }
            }
        }
        Ok(Self { routes })
    }

    pub fn from_json(json: &str) -> Result<Self, RoutingConfigError> {
        let entries: Vec<RoutingEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoutingConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RoutingConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json(&json)?;
        info!(path = %path.display(), routes = table.len(), "Routing table loaded");
        Ok(table)
    }

    pub fn resolve(&self, source: &SourceAddress) -> Result<&DeviceId, RoutingError> {
        self.routes
            .get(source)
            .ok_or_else(|| RoutingError(source.clone()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
