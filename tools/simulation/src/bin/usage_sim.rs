//! Writes simulated metering frames to a running aggregator.
//!
//! Environment variables:
//! - `USAGE_LISTEN` (default: unix:/tmp/usage-aggregator.sock)
//! - `SIM_SEED` (default: 1)
//! - `SIM_HOSTS` (default: 3)
//! - `SIM_FRAMES` (default: 1000)
//! - `SIM_UNROUTED_RATIO` (default: 0.0)
//! - `SIM_EXPORT` (optional path for the run's JSON export)
//! - `SIM_ROUTING_OUT` (optional path for the routing table JSON)

use std::str::FromStr;

use anyhow::{bail, Context};
use simulation::export::{build_export, write_to_file};
use simulation::network::Network;
use simulation::totals::ExpectedTotals;
use simulation::traffic::{FrameGenerator, TrafficConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing_subscriber::EnvFilter;

fn env_or<T>(var: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("{}: cannot parse {:?}: {}", var, value, e)),
        Err(_) => Ok(default),
    }
}

async fn send<W>(mut writer: W, generator: &mut FrameGenerator, count: usize, totals: &mut ExpectedTotals) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for _ in 0..count {
        let frame = generator.next_frame();
        writer.write_all(frame.encode().as_bytes()).await?;
        totals.record(generator.network(), &frame);
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let listen = std::env::var("USAGE_LISTEN")
        .unwrap_or_else(|_| "unix:/tmp/usage-aggregator.sock".to_string());
    let seed: u64 = env_or("SIM_SEED", 1)?;
    let hosts: usize = env_or("SIM_HOSTS", 3)?;
    let count: usize = env_or("SIM_FRAMES", 1000)?;
    let traffic = TrafficConfig {
        unrouted_ratio: env_or("SIM_UNROUTED_RATIO", 0.0)?,
        ..TrafficConfig::default()
    };

    let network = Network::new(hosts)?;
    if let Ok(path) = std::env::var("SIM_ROUTING_OUT") {
        std::fs::write(&path, network.routing_json())
            .with_context(|| format!("writing routing table {}", path))?;
        tracing::info!(path = %path, hosts, "Routing table written");
    }

    let mut generator = FrameGenerator::new(network.clone(), traffic.clone(), seed);
    let mut totals = ExpectedTotals::default();

    tracing::info!(listen = %listen, seed, hosts, frames = count, "Sending frames");
    if let Some(path) = listen.strip_prefix("unix:") {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connecting to {}", listen))?;
        send(stream, &mut generator, count, &mut totals).await?;
    } else if let Some(addr) = listen.strip_prefix("tcp:") {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {}", listen))?;
        send(stream, &mut generator, count, &mut totals).await?;
    } else {
        bail!("USAGE_LISTEN must be unix:<path> or tcp:<host:port>, got {}", listen);
    }

    for (device, bytes) in &totals.per_device {
        tracing::info!(device = %device, bytes, "Expected total");
    }
    tracing::info!(
        total = totals.total(),
        unrouted = totals.unrouted_frames,
        "All frames sent"
    );

    if let Ok(path) = std::env::var("SIM_EXPORT") {
        let export = build_export(seed, count, &traffic, &network, &totals);
        write_to_file(&export, &path).with_context(|| format!("writing export {}", path))?;
    }

    Ok(())
}
