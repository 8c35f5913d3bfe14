//! Local ledger for development: the REST API over an in-memory backend.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use ledger::rest::router;
use ledger::InMemoryLedger;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr: SocketAddr = std::env::var("LEDGER_LISTEN")
        .unwrap_or_else(|_| "127.0.0.1:8081".to_string())
        .parse()
        .context("LEDGER_LISTEN must be a socket address")?;

    let ledger = Arc::new(InMemoryLedger::new());

    // Print what observers would see
    let mut events = ledger.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    event_id = %event.event_id,
                    event_type = event.event_type_label(),
                    "Ledger event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event observer lagging")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = router(ledger);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!("Ledger dev server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
