//! REST adapter tests
//!
//! Serves an in-memory ledger over HTTP on an ephemeral port and drives it
//! through `HttpLedgerClient`, checking that every error the backend raises
//! survives the round trip with the same meaning.

use std::sync::Arc;

use ledger::rest::router;
use ledger::{AggregateFilter, HttpLedgerClient, InMemoryLedger, LedgerClient, LedgerError};
use tokio::net::TcpListener;
use types::aggregate::Aggregate;
use types::events::{UsageEvent, UsageEventPayload};
use types::ids::{AggregationKey, DeviceId, ProviderId, UsageId};
use types::numeric::UsageValue;

async fn serve(ledger: Arc<InMemoryLedger>) -> HttpLedgerClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(ledger)).await.unwrap();
    });
    HttpLedgerClient::new(format!("http://{}", addr))
}

fn aggregate(device: &str, provider: &str, value: u64) -> Aggregate {
    let key = AggregationKey::new(DeviceId::new(device).unwrap(), ProviderId::new(provider).unwrap());
    Aggregate::for_key(&key, UsageValue::from_u64(value))
}

#[tokio::test]
async fn test_add_get_update_over_http() {
    let backend = Arc::new(InMemoryLedger::new());
    let client = serve(backend.clone()).await;

    client.add(aggregate("123456", "2", 10)).await.unwrap();
    let id = UsageId::new("123456_2").unwrap();

    let stored = client.get(&id).await.unwrap();
    assert_eq!(stored.usage_value, UsageValue::from_u64(10));

    client.update(stored.merged(UsageValue::from_u64(30)).unwrap()).await.unwrap();
    let stored = backend.get(&id).await.unwrap();
    assert_eq!(stored.usage_value, UsageValue::from_u64(40));
}

#[tokio::test]
async fn test_errors_map_back() {
    let backend = Arc::new(InMemoryLedger::new());
    let client = serve(backend.clone()).await;

    let missing = UsageId::new("nope").unwrap();
    assert_eq!(
        client.get(&missing).await.unwrap_err(),
        LedgerError::NotFound(missing.clone())
    );

    let err = client.update(aggregate("1", "1", 1)).await.unwrap_err();
    assert_eq!(err, LedgerError::NotFound(UsageId::new("1_1").unwrap()));

    client.add(aggregate("1", "1", 1)).await.unwrap();
    let err = client.add(aggregate("1", "1", 2)).await.unwrap_err();
    assert_eq!(err, LedgerError::DuplicateKey(UsageId::new("1_1").unwrap()));

    // Identity change is refused by the backend and reported as a rejection
    let moved = Aggregate {
        provider_id: ProviderId::new("9").unwrap(),
        ..aggregate("1", "1", 3)
    };
    match client.update(moved).await.unwrap_err() {
        LedgerError::Rejected { status, message } => {
            assert_eq!(status, 409);
            assert!(message.contains("immutable"));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_filters_over_http() {
    let backend = Arc::new(InMemoryLedger::with_aggregates([
        aggregate("111", "1", 1),
        aggregate("111", "2", 2),
        aggregate("222", "1", 3),
    ]));
    let client = serve(backend).await;

    let all = client.query(&AggregateFilter::all()).await.unwrap();
    assert_eq!(all.len(), 3);

    let pair = client
        .query(&AggregateFilter::by_provider_and_device(
            ProviderId::new("1").unwrap(),
            DeviceId::new("111").unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(pair.len(), 1);
    assert_eq!(pair[0].usage_id.as_str(), "111_1");
}

#[tokio::test]
async fn test_emit_reaches_backend_subscribers() {
    let backend = Arc::new(InMemoryLedger::new());
    let mut events = backend.subscribe();
    let client = serve(backend).await;

    let event = UsageEvent::updated(aggregate("1", "1", 10), UsageValue::from_u64(10));
    client.emit(event.clone()).await.unwrap();

    let received = events.recv().await.unwrap();
    assert_eq!(received, event);
    assert!(matches!(received.payload, UsageEventPayload::UsageUpdated { .. }));
}
