//! Simulation run export
//!
//! Serializes a run's parameters, routing table and expected totals to JSON
//! so a live aggregator's ledger can be checked against it afterwards.

use serde::{Deserialize, Serialize};

use crate::network::{Network, SimHost};
use crate::totals::ExpectedTotals;
use crate::traffic::TrafficConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationExport {
    pub version: String,
    pub seed: u64,
    pub frame_count: usize,
    pub traffic: TrafficConfig,
    pub routing: Vec<SimHost>,
    pub expected: ExpectedTotals,
}

pub fn build_export(
    seed: u64,
    frame_count: usize,
    traffic: &TrafficConfig,
    network: &Network,
    expected: &ExpectedTotals,
) -> SimulationExport {
    SimulationExport {
        version: crate::VERSION.to_string(),
        seed,
        frame_count,
        traffic: traffic.clone(),
        routing: network.hosts().to_vec(),
        expected: expected.clone(),
    }
}

pub fn export_json(export: &SimulationExport) -> String {
    serde_json::to_string_pretty(export).unwrap_or_default()
}

pub fn write_to_file(export: &SimulationExport, path: &str) -> std::io::Result<()> {
    std::fs::write(path, export_json(export))
}
