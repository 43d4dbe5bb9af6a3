//! Runtime Integration Tests
//!
//! A full `SyncRuntime` against a mock broker and notification server plus
//! a scripted market data WebSocket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dashboard_sync::{
    AckOutcome, ConnectionStatus, HealthStatus, QuoteRecord, SyncConfig, SyncRuntime,
};

use support::{ScriptedServer, Step, eventually};

async fn mock_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "ord-1",
            "symbol": "aapl",
            "side": "sell",
            "type": "market",
            "qty": 10,
            "filled_qty": 0,
            "status": "accepted",
            "created_at": "2024-03-01T12:00:00Z"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trades": 4})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/portfolio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"positions": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notifications": [{
                "id": "n-1",
                "title": "Welcome",
                "message": "Feeds connected",
                "priority": "low",
                "created_at": "2024-03-01T12:00:00Z"
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/ack"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn config(backend: &MockServer, market_data: &ScriptedServer) -> SyncConfig {
    let backend_base = format!("{}/", backend.uri());
    let vars: HashMap<&str, String> = HashMap::from([
        ("BROKER_BASE_URL", backend_base.clone()),
        ("NOTIFICATION_BASE_URL", backend_base),
        ("MARKET_DATA_BASE_URL", market_data.http_base.clone()),
        ("QUOTE_SYMBOLS", "aapl".to_string()),
        ("RECONNECT_BASE_DELAY_MS", "10".to_string()),
        ("RECONNECT_MAX_DELAY_MS", "50".to_string()),
        ("RECONNECT_MAX_ATTEMPTS", "3".to_string()),
        ("POLL_ORDERS_INTERVAL_MS", "50".to_string()),
        ("POLL_STATS_INTERVAL_MS", "50".to_string()),
        ("POLL_PORTFOLIO_INTERVAL_MS", "50".to_string()),
        ("POLL_SCANNER_INTERVAL_MS", "50".to_string()),
        ("HTTP_TIMEOUT_MS", "1000".to_string()),
        ("NOTIFICATION_TOKEN", "tok".to_string()),
    ]);
    SyncConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

#[tokio::test]
async fn runtime_fills_every_store() {
    let backend = mock_backend().await;
    let market_data = ScriptedServer::start(vec![
        Step::Text(r#"{"type":"subscribed","symbol":"AAPL"}"#.to_string()),
        Step::Text(r#"{"type":"quote","symbol":"AAPL","bid":100.00,"ask":100.10}"#.to_string()),
        Step::Pause(Duration::from_secs(30)),
    ])
    .await;

    let runtime = SyncRuntime::new(config(&backend, &market_data)).unwrap();
    runtime.start();

    assert!(
        eventually(|| {
            let snapshot = runtime.snapshot();
            snapshot.polled.orders.value.is_some()
                && snapshot.polled.stats.value.is_some()
                && snapshot.polled.portfolio.value.is_some()
                && snapshot.quotes.get("AAPL").is_some_and(|entry| entry.record.is_some())
                && !snapshot.notifications.items.is_empty()
        })
        .await,
        "stores should fill: {:?}",
        runtime.snapshot()
    );

    let snapshot = runtime.snapshot();
    let orders = snapshot.polled.orders.value.as_ref().unwrap();
    assert_eq!(orders[0].symbol, "AAPL");

    let entry = &snapshot.quotes["AAPL"];
    assert!(entry.connected);
    let Some(QuoteRecord::Available(quote)) = &entry.record else {
        panic!("expected a priced quote, got {entry:?}");
    };
    assert_eq!(quote.spread(), Decimal::new(10, 2));

    assert_eq!(snapshot.notifications.items[0].id, "n-1");
    assert!(snapshot.notifications.toasts.is_empty());

    let quote_feed = snapshot
        .feeds
        .iter()
        .find(|report| report.feed == "quotes:AAPL")
        .unwrap();
    assert_eq!(quote_feed.state.status, ConnectionStatus::Open);
    assert_ne!(snapshot.health, HealthStatus::Unhealthy);

    assert_eq!(runtime.acknowledge("n-1"), AckOutcome::Acknowledged);
    assert_eq!(runtime.acknowledge("missing"), AckOutcome::NotFound);

    runtime.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn resubscribing_drops_old_symbols() {
    let backend = mock_backend().await;
    let market_data = ScriptedServer::start(vec![
        Step::Text(r#"{"symbol":"AAPL","bid":100.00,"ask":100.10}"#.to_string()),
        Step::Pause(Duration::from_secs(30)),
    ])
    .await;

    let runtime = SyncRuntime::new(config(&backend, &market_data)).unwrap();
    runtime.start();
    assert!(eventually(|| runtime.snapshot().quotes.contains_key("AAPL")).await);

    runtime.resubscribe_quotes(&["msft".to_string()]);

    assert!(
        eventually(|| runtime
            .feed_reports()
            .iter()
            .any(|report| report.feed == "quotes:MSFT"
                && report.state.status == ConnectionStatus::Open))
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = runtime.snapshot();
    assert!(!snapshot.quotes.contains_key("AAPL"));
    assert!(
        snapshot
            .quotes
            .get("MSFT")
            .is_none_or(|entry| entry.record.is_none()),
        "AAPL messages must not land in the MSFT row"
    );
    assert!(snapshot.feeds.iter().all(|report| report.feed != "quotes:AAPL"));

    runtime.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn shutdown_without_start_is_immediate() {
    let backend = mock_backend().await;
    let market_data = ScriptedServer::start(Vec::new()).await;
    let runtime = SyncRuntime::new(config(&backend, &market_data)).unwrap();

    tokio::time::timeout(Duration::from_secs(1), runtime.shutdown(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(runtime.feed_reports().is_empty());
    assert_eq!(runtime.health(), HealthStatus::Unhealthy);
}
