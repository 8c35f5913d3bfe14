//! End-to-end ingestion of simulated traffic
//!
//! Feeds seeded simulator frames through the ingestion server, over an
//! in-memory stream and over a real Unix socket, and checks the ledger ends
//! up holding exactly the simulator's expected per-device totals.

use std::sync::Arc;
use std::time::Duration;

use aggregator::config::{ListenAddr, ServerConfig};
use aggregator::metrics::PipelineMetrics;
use aggregator::pipeline::{Pipeline, PipelineConfig};
use aggregator::routing::RoutingTable;
use aggregator::server::IngestServer;
use aggregator::store::LedgerAdapter;
use ledger::{InMemoryLedger, LedgerClient};
use simulation::network::Network;
use simulation::totals::ExpectedTotals;
use simulation::traffic::{FrameGenerator, TrafficConfig};
use tokio::io::AsyncWriteExt;
use types::ids::{AggregationKey, ProviderId};
use types::numeric::UsageValue;

struct Run {
    wire: Vec<u8>,
    expected: ExpectedTotals,
    network: Network,
}

fn simulate(seed: u64, hosts: usize, frames: usize) -> Run {
    let network = Network::new(hosts).unwrap();
    let config = TrafficConfig {
        unrouted_ratio: 0.05,
        ..TrafficConfig::default()
    };
    let mut gen = FrameGenerator::new(network.clone(), config, seed);
    let frames = gen.take(frames);
    let expected = ExpectedTotals::from_frames(&network, &frames);
    let wire = frames.iter().flat_map(|f| f.encode().into_bytes()).collect();
    Run {
        wire,
        expected,
        network,
    }
}

fn server_for(network: &Network, ledger: Arc<InMemoryLedger>, max_in_flight: u32) -> IngestServer {
    let routing = RoutingTable::from_json(&network.routing_json()).unwrap();
    let pipeline = Pipeline::new(
        Arc::new(routing),
        Arc::new(LedgerAdapter::new(ledger, Duration::from_secs(5))),
        PipelineConfig::new(ProviderId::new("1").unwrap()),
        Arc::new(PipelineMetrics::new()),
    );
    IngestServer::new(
        Arc::new(pipeline),
        ServerConfig {
            max_in_flight,
            ..ServerConfig::default()
        },
    )
}

fn ledger_total(ledger: &InMemoryLedger) -> UsageValue {
    ledger
        .snapshot()
        .iter()
        .try_fold(UsageValue::ZERO, |acc, a| acc.checked_add(a.usage_value))
        .unwrap()
}

async fn assert_totals(ledger: &InMemoryLedger, expected: &ExpectedTotals) {
    assert_eq!(ledger.len(), expected.per_device.len());
    for (device, bytes) in &expected.per_device {
        let key = AggregationKey::new(device.clone(), ProviderId::new("1").unwrap());
        let stored = ledger.get(&key.usage_id()).await.unwrap();
        assert_eq!(stored.usage_value, UsageValue::from_u64(*bytes), "device {}", device);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_matches_expected_totals() {
    let run = simulate(11, 8, 3_000);
    let ledger = Arc::new(InMemoryLedger::new());
    let server = server_for(&run.network, ledger.clone(), 64);

    let stats = server.handle_connection(&run.wire[..], "sim").await.unwrap();
    server.drain().await;

    assert_eq!(stats.frames, 3_000);
    assert_eq!(stats.dropped, run.expected.unrouted_frames);
    assert_totals(&ledger, &run.expected).await;

    let metrics = server.pipeline().metrics().export();
    assert_eq!(metrics["routing_misses"], run.expected.unrouted_frames);
    assert_eq!(metrics["parse_errors"], 0);
    assert_eq!(
        metrics["aggregates_created"] + metrics["aggregates_merged"],
        3_000 - run.expected.unrouted_frames
    );
    assert_eq!(server.pipeline().active_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unix_socket_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.sock");
    let addr = ListenAddr::Unix(path.clone());
    let ledger = Arc::new(InMemoryLedger::new());

    let first = simulate(21, 5, 500);
    let second = simulate(22, 5, 500);
    let server = server_for(&first.network, ledger.clone(), 16);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = {
        let server = server.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            server
                .run(&addr, async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let mut connected = None;
    for _ in 0..100 {
        if let Ok(stream) = tokio::net::UnixStream::connect(&path).await {
            connected = Some(stream);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut a = connected.unwrap();
    let mut b = tokio::net::UnixStream::connect(&path).await.unwrap();

    let (ra, rb) = tokio::join!(a.write_all(&first.wire), b.write_all(&second.wire));
    ra.unwrap();
    rb.unwrap();
    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();

    let mut expected = first.expected.clone();
    for (device, bytes) in &second.expected.per_device {
        *expected.per_device.entry(device.clone()).or_insert(0) += bytes;
    }
    let wanted = UsageValue::from_u64(expected.total());
    let mut ingested = UsageValue::ZERO;
    for _ in 0..500 {
        ingested = ledger_total(&ledger);
        if ingested == wanted {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ingested, wanted);

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();
    assert!(!path.exists());
    assert_totals(&ledger, &expected).await;
}
