use std::sync::Arc;

use aggregator::config::AggregatorConfig;
use aggregator::metrics::PipelineMetrics;
use aggregator::pipeline::Pipeline;
use aggregator::routing::RoutingTable;
use aggregator::server::IngestServer;
use aggregator::store::LedgerAdapter;
use anyhow::Context;
use ledger::{HttpLedgerClient, InMemoryLedger, LedgerClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = aggregator::SERVICE_VERSION, "Starting usage aggregator");

    let config = AggregatorConfig::from_env().context("loading configuration")?;
    let routing = RoutingTable::load(&config.routing_table)
        .with_context(|| format!("loading routing table {}", config.routing_table.display()))?;

    let client: Arc<dyn LedgerClient> = match &config.ledger_url {
        Some(url) => {
            tracing::info!(ledger = %url, "Using REST ledger");
            Arc::new(HttpLedgerClient::new(url.clone()))
        }
        None => {
            tracing::warn!("USAGE_LEDGER_URL not set, aggregates are kept in memory only");
            Arc::new(InMemoryLedger::new())
        }
    };

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Pipeline::new(
        Arc::new(routing),
        Arc::new(LedgerAdapter::new(client, config.ledger_timeout)),
        config.pipeline_config(),
        metrics.clone(),
    );
    let server = IngestServer::new(Arc::new(pipeline), config.server_config());

    if !config.metrics_interval.is_zero() {
        let metrics = metrics.clone();
        let period = config.metrics_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::info!(metrics = ?metrics.export(), "Pipeline metrics");
            }
        });
    }

    server
        .run(&config.listen, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .with_context(|| format!("serving on {}", config.listen))?;

    tracing::info!(metrics = ?metrics.export(), "Usage aggregator stopped");
    Ok(())
}
