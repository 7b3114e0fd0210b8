//! HTTP adapter tests against a local mock server

use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ema_options_bot::broker::{
    AlpacaClient, BrokerError, ClientConfig, OptionChainSource, OrderGateway, PriceFeed,
    TradierClient,
};
use ema_options_bot::common::CircuitBreakerConfig;
use ema_options_bot::selector::find_contract;
use ema_options_bot::{OptionType, OrderSide};

fn fast_retries(max_retries: u32) -> ClientConfig {
    ClientConfig::default()
        .with_max_retries(max_retries)
        .with_retry_backoff(Duration::from_millis(1))
}

fn friday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
}

// =============================================================================
// Alpaca
// =============================================================================

#[tokio::test]
async fn test_alpaca_bars_returned_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/stocks/SOFI/bars"))
        .and(header("APCA-API-KEY-ID", "key"))
        .and(header("APCA-API-SECRET-KEY", "secret"))
        .and(query_param("timeframe", "5Min"))
        .and(query_param("limit", "2"))
        .and(query_param("sort", "desc"))
        .and(query_param("feed", "iex"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bars": [
                {"t": "2024-03-04T15:05:00Z", "o": 8.1, "h": 8.2, "l": 8.0, "c": 8.15, "v": 1200, "n": 10, "vw": 8.1},
                {"t": "2024-03-04T15:00:00Z", "o": 8.0, "h": 8.1, "l": 7.9, "c": 8.05, "v": 900, "n": 8, "vw": 8.0}
            ],
            "symbol": "SOFI",
            "next_page_token": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AlpacaClient::new(server.uri(), "key", "secret").unwrap();
    let bars = client.fetch_bars("SOFI", "5Min", 2).await.unwrap();

    assert_eq!(bars.len(), 2);
    assert!(bars[0].timestamp < bars[1].timestamp);
    assert_eq!(bars[0].close, 8.05);
    assert_eq!(bars[1].close, 8.15);
    assert_eq!(bars[1].volume, 1200.0);
}

#[tokio::test]
async fn test_alpaca_null_bars_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/stocks/SOFI/bars"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"bars": null, "symbol": "SOFI", "next_page_token": null})),
        )
        .mount(&server)
        .await;

    let client = AlpacaClient::new(server.uri(), "key", "secret").unwrap();
    assert!(client.fetch_bars("SOFI", "5Min", 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alpaca_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/stocks/SOFI/bars"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/stocks/SOFI/bars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bars": [{"t": "2024-03-04T15:00:00Z", "o": 8.0, "h": 8.1, "l": 7.9, "c": 8.05, "v": 900}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AlpacaClient::with_config(server.uri(), "key", "secret", fast_retries(3)).unwrap();
    let bars = client.fetch_bars("SOFI", "5Min", 100).await.unwrap();
    assert_eq!(bars.len(), 1);
}

#[tokio::test]
async fn test_alpaca_auth_failure_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let client = AlpacaClient::with_config(server.uri(), "key", "secret", fast_retries(3)).unwrap();
    let err = client.fetch_bars("SOFI", "5Min", 100).await.unwrap_err();
    assert!(matches!(err, BrokerError::Api { status: 403, .. }));
}

// =============================================================================
// Tradier chains
// =============================================================================

#[tokio::test]
async fn test_tradier_chain_request_and_selection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/options/chains"))
        .and(header("Authorization", "Bearer tok"))
        .and(header("Accept", "application/json"))
        .and(query_param("symbol", "SOFI"))
        .and(query_param("expiration", "2024-03-08"))
        .and(query_param("greeks", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "options": {"option": [
                {"symbol": "SOFI240308C00007000", "underlying": "SOFI", "option_type": "call",
                 "strike": 7.0, "last": null, "ask": 1.05},
                {"symbol": "SOFI240308C00008000", "underlying": "SOFI", "option_type": "call",
                 "strike": 8.0, "last": 0.41, "ask": 0.43}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TradierClient::new(server.uri(), "ACCT", "tok").unwrap();
    let chain = client.fetch_chain("SOFI", friday()).await.unwrap();

    assert_eq!(chain.quotes().len(), 2);
    let contract = find_contract(&chain, OptionType::Call).unwrap();
    assert_eq!(contract.symbol, "SOFI240308C00007000");
}

#[tokio::test]
async fn test_tradier_chain_null_options() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/options/chains"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"options": null})))
        .mount(&server)
        .await;

    let client = TradierClient::new(server.uri(), "ACCT", "tok").unwrap();
    let chain = client.fetch_chain("SOFI", friday()).await.unwrap();

    assert!(chain.quotes().is_empty());
    assert!(find_contract(&chain, OptionType::Put).is_none());
}

#[tokio::test]
async fn test_tradier_chain_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/options/chains"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = TradierClient::with_config(server.uri(), "ACCT", "tok", fast_retries(2)).unwrap();
    let err = client.fetch_chain("SOFI", friday()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Api { status: 502, .. }));
}

#[tokio::test]
async fn test_circuit_breaker_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = fast_retries(0).with_circuit_breaker(
        CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_cooldown(Duration::from_secs(600)),
    );
    let client = TradierClient::with_config(server.uri(), "ACCT", "tok", config).unwrap();

    for _ in 0..2 {
        let err = client.fetch_chain("SOFI", friday()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Api { status: 500, .. }));
    }

    let err = client.fetch_chain("SOFI", friday()).await.unwrap_err();
    assert!(matches!(err, BrokerError::CircuitBreakerOpen));
}

// =============================================================================
// Tradier orders
// =============================================================================

#[tokio::test]
async fn test_tradier_order_form_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ACCT/orders"))
        .and(header("Authorization", "Bearer tok"))
        .and(body_string_contains("class=option"))
        .and(body_string_contains("symbol=SOFI"))
        .and(body_string_contains("option_symbol=SOFI240308C00008000"))
        .and(body_string_contains("side=buy_to_open"))
        .and(body_string_contains("quantity=2"))
        .and(body_string_contains("type=market"))
        .and(body_string_contains("duration=gtc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"order": {"id": 257459, "status": "ok"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = TradierClient::new(server.uri(), "ACCT", "tok")
        .unwrap()
        .with_quantity(2);
    let ack = client
        .submit_order("SOFI", "SOFI240308C00008000", OrderSide::BuyToOpen)
        .await
        .unwrap();

    assert_eq!(ack.order_id, "257459");
    assert_eq!(ack.status, "ok");
}

#[tokio::test]
async fn test_tradier_rejection_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ACCT/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid Parameter: option_symbol"))
        .expect(1)
        .mount(&server)
        .await;

    let client = TradierClient::with_config(server.uri(), "ACCT", "tok", fast_retries(3)).unwrap();
    let err = client
        .submit_order("SOFI", "BAD", OrderSide::BuyToOpen)
        .await
        .unwrap_err();

    match err {
        BrokerError::OrderRejected { code, message } => {
            assert_eq!(code, 400);
            assert!(message.contains("option_symbol"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tradier_server_error_order_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ACCT/orders"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = TradierClient::with_config(server.uri(), "ACCT", "tok", fast_retries(3)).unwrap();
    let err = client
        .submit_order("SOFI", "SOFI240308C00008000", OrderSide::SellToClose)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::OrderRejected { code: 503, .. }));
}

#[tokio::test]
async fn test_tradier_errors_body_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ACCT/orders"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errors": {"error": ["Backoffice rejected"]}})),
        )
        .mount(&server)
        .await;

    let client = TradierClient::new(server.uri(), "ACCT", "tok").unwrap();
    let err = client
        .submit_order("SOFI", "SOFI240308C00008000", OrderSide::BuyToOpen)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::OrderRejected { code: 200, .. }));
}

#[tokio::test]
async fn test_tradier_order_requires_account() {
    let client = TradierClient::new("http://127.0.0.1:9", "", "tok").unwrap();
    let err = client
        .submit_order("SOFI", "SOFI240308C00008000", OrderSide::BuyToOpen)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::MissingCredentials("TRADIER_ACCOUNT_ID")));
}
