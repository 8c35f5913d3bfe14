//! Determinism test
//!
//! Runs of the same seed on separate threads must produce identical frame
//! streams and totals, and the emitted routing table must cover every
//! routed source.

use simulation::network::{Network, SimHost};
use simulation::totals::ExpectedTotals;
use simulation::traffic::{FrameGenerator, TrafficConfig};
use std::thread;

#[test]
fn test_parallel_runs_agree() {
    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                let network = Network::new(10).unwrap();
                let mut gen = FrameGenerator::new(network.clone(), TrafficConfig::default(), 99);
                let frames = gen.take(1_000);
                let totals = ExpectedTotals::from_frames(&network, &frames);
                (frames, totals)
            })
        })
        .collect();

    let runs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for run in &runs[1..] {
        assert_eq!(run, &runs[0]);
    }
    assert_eq!(runs[0].1.per_device.len(), 10);
}

#[test]
fn test_routing_table_covers_routed_frames() {
    let network = Network::new(6).unwrap();
    let routing: Vec<SimHost> = serde_json::from_str(&network.routing_json()).unwrap();

    let config = TrafficConfig {
        unrouted_ratio: 0.1,
        ..TrafficConfig::default()
    };
    let mut gen = FrameGenerator::new(network, config, 5);
    for frame in gen.take(500) {
        let routed = routing.iter().any(|h| h.source_address == frame.source);
        assert_eq!(routed, !frame.source.as_str().starts_with("10.9.9."));
    }
}
