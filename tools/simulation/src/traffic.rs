//! Seeded frame generator
//!
//! Each frame is one observed packet: a random simulated host as source, a
//! different host as destination and a random packet size. A configurable
//! share of frames comes from addresses outside the network, which the
//! aggregator has no route for.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use types::ids::SourceAddress;

use crate::network::Network;

/// Configuration for a traffic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Smallest packet size in bytes
    pub min_bytes: u64,
    /// Largest packet size in bytes
    pub max_bytes: u64,
    /// Probability that a frame comes from an unrouted address (0.0 to 1.0)
    pub unrouted_ratio: f64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            min_bytes: 64,
            max_bytes: 1500,
            unrouted_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimFrame {
    pub source: SourceAddress,
    pub destination: SourceAddress,
    pub bytes: u64,
}

impl SimFrame {
    /// Wire form, newline-terminated.
    pub fn encode(&self) -> String {
        format!("{}\t{}\t{}\n", self.source, self.destination, self.bytes)
    }
}

pub struct FrameGenerator {
    network: Network,
    config: TrafficConfig,
    rng: ChaCha8Rng,
    pub frames_generated: usize,
}

impl FrameGenerator {
    /// Same seed, network and config always give the same frames.
    pub fn new(network: Network, config: TrafficConfig, seed: u64) -> Self {
        Self {
            network,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            frames_generated: 0,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn next_frame(&mut self) -> SimFrame {
        let host_count = self.network.len();

        let source = if self.config.unrouted_ratio > 0.0
            && self.rng.gen_bool(self.config.unrouted_ratio.min(1.0))
        {
            unrouted_address(&mut self.rng)
        } else {
            let i = self.rng.gen_range(0..host_count);
            self.network.hosts()[i].source_address.clone()
        };
        let i = self.rng.gen_range(0..host_count);
        let destination = self.network.hosts()[i].source_address.clone();

        let (lo, hi) = (
            self.config.min_bytes.min(self.config.max_bytes),
            self.config.max_bytes.max(self.config.min_bytes),
        );
        let bytes = self.rng.gen_range(lo..=hi);

        self.frames_generated += 1;
        SimFrame {
            source,
            destination,
            bytes,
        }
    }

    pub fn take(&mut self, count: usize) -> Vec<SimFrame> {
        (0..count).map(|_| self.next_frame()).collect()
    }
}

/// A source outside the simulated network's routing table.
fn unrouted_address(rng: &mut ChaCha8Rng) -> SourceAddress {
    let host = rng.gen_range(1..=254u8);
    // Always valid: digits and dots only
    match SourceAddress::new(format!("10.9.9.{}", host)) {
        Ok(addr) => addr,
        Err(_) => unreachable!("numeric address is a valid source"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64, config: TrafficConfig) -> FrameGenerator {
        FrameGenerator::new(Network::new(4).unwrap(), config, seed)
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = generator(7, TrafficConfig::default()).take(50);
        let b = generator(7, TrafficConfig::default()).take(50);
        let c = generator(8, TrafficConfig::default()).take(50);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sizes_within_bounds() {
        let config = TrafficConfig {
            min_bytes: 10,
            max_bytes: 20,
            unrouted_ratio: 0.0,
        };
        let mut gen = generator(1, config);
        for frame in gen.take(200) {
            assert!((10..=20).contains(&frame.bytes));
            assert!(gen.network().device_for(&frame.source).is_some());
        }
        assert_eq!(gen.frames_generated, 200);
    }

    #[test]
    fn test_unrouted_share() {
        let config = TrafficConfig {
            unrouted_ratio: 1.0,
            ..TrafficConfig::default()
        };
        let mut gen = generator(3, config);
        for frame in gen.take(20) {
            assert!(frame.source.as_str().starts_with("10.9.9."));
            assert!(gen.network().device_for(&frame.source).is_none());
        }
    }

    #[test]
    fn test_mixed_traffic_uses_both_sources() {
        let config = TrafficConfig {
            unrouted_ratio: 0.5,
            ..TrafficConfig::default()
        };
        let mut gen = generator(9, config);
        let frames = gen.take(400);
        let unrouted = frames
            .iter()
            .filter(|f| gen.network().device_for(&f.source).is_none())
            .count();
        assert!(unrouted > 0 && unrouted < frames.len());
        assert!(frames
            .iter()
            .all(|f| gen.network().device_for(&f.destination).is_some()));
    }

    #[test]
    fn test_encode() {
        let frame = SimFrame {
            source: SourceAddress::new("10.1.1.1").unwrap(),
            destination: SourceAddress::new("10.1.1.2").unwrap(),
            bytes: 1052,
        };
        assert_eq!(frame.encode(), "10.1.1.1\t10.1.1.2\t1052\n");
    }
}
