//! Tool dispatch against a desk backed by the mock broker.

use std::sync::Arc;
use std::time::Duration;

use ibdesk::mock::{MockBroker, ScriptedTick};
use ibdesk::{ConnectParams, Desk, DeskSettings, TickField};
use ibdesk_server::error::Error;
use ibdesk_server::tools::Tools;
use serde_json::{Value, json};

fn tools(broker: &MockBroker, read_only: bool) -> Tools {
    let settings = DeskSettings {
        read_only,
        quote_timeout: Duration::from_millis(50),
        ack_delay: Duration::from_millis(20),
        ..DeskSettings::default()
    };
    let params = ConnectParams {
        host: "127.0.0.1".into(),
        port: 4002,
        client_id: 1,
    };
    Tools::new(
        Arc::new(Desk::new(broker.connector(), params, settings)),
        "SMART",
    )
}

fn aapl() -> MockBroker {
    MockBroker::builder()
        .with_stock("AAPL", 265598, "NASDAQ")
        .with_quote("AAPL", vec![ScriptedTick::after_ms(2, TickField::Last, 190.25)])
        .build()
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn stock_price_defaults_exchange_and_normalizes_symbol() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let value = tools
        .dispatch("get_stock_price", &json!({ "symbol": "aapl" }))
        .await
        .unwrap();
    assert_eq!(value["symbol"], "AAPL");
    assert_eq!(value["last"], 190.25);
    assert_eq!(value["bid"], Value::Null);
}

#[tokio::test]
async fn empty_reads_return_empty_collections() {
    let broker = MockBroker::builder().build();
    let tools = tools(&broker, false);

    for name in ["get_positions", "get_orders"] {
        let value = tools.dispatch(name, &Value::Null).await.unwrap();
        assert_eq!(value, json!([]), "{name}");
    }
    let summary = tools
        .dispatch("get_account_summary", &json!({}))
        .await
        .unwrap();
    assert_eq!(summary, json!({}));
}

#[tokio::test]
async fn historical_data_rejects_bad_bar_size_before_connecting() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let err = tools
        .dispatch(
            "get_historical_data",
            &json!({ "symbol": "AAPL", "bar_size": "7 minutes" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArguments(_)));
    assert_eq!(broker.connect_calls(), 0);
}

#[tokio::test]
async fn historical_data_uses_defaults() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let value = tools
        .dispatch("get_historical_data", &json!({ "symbol": "AAPL" }))
        .await
        .unwrap();
    assert_eq!(value, json!([]));
}

// ============================================================================
// Order argument validation
// ============================================================================

#[tokio::test]
async fn order_arguments_are_validated() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let cases = [
        ("place_limit_order", json!({ "symbol": "AAPL", "action": "HOLD", "quantity": 1, "limit_price": 1 })),
        ("place_limit_order", json!({ "symbol": "AAPL", "action": "BUY", "quantity": 0, "limit_price": 1 })),
        ("place_limit_order", json!({ "symbol": "AAPL", "action": "BUY", "quantity": 1 })),
        ("place_limit_order", json!({ "symbol": "AAPL", "action": "BUY", "quantity": 1, "limit_price": -2 })),
        ("place_stop_order", json!({ "symbol": "AAPL", "action": "SELL", "quantity": 1 })),
        ("place_market_order", json!({ "action": "BUY", "quantity": 1 })),
        ("place_market_order", json!({ "symbol": "", "action": "BUY", "quantity": 1 })),
        ("cancel_order", json!({ "order_id": -3 })),
        ("cancel_order", json!({})),
    ];
    for (name, args) in cases {
        let err = tools.dispatch(name, &args).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)), "{name} {args}: {err}");
    }
    assert_eq!(broker.connect_calls(), 0);
    assert!(broker.placed_orders().is_empty());
}

#[tokio::test]
async fn limit_order_round_trip() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let value = tools
        .dispatch(
            "place_limit_order",
            &json!({ "symbol": "AAPL", "action": "buy", "quantity": 10, "limit_price": 150.0 }),
        )
        .await
        .unwrap();
    assert_eq!(value["status"], "Submitted");
    assert_eq!(value["action"], "BUY");
    assert_eq!(value["limit_price"], 150.0);
    assert!(value["order_id"].as_i64().unwrap() > 0);

    let placed = broker.placed_orders();
    assert_eq!(placed[0].instrument.exchange, "SMART");
}

#[tokio::test]
async fn read_only_order_tools_are_rejected() {
    let broker = aapl();
    let tools = tools(&broker, true);

    let value = tools
        .dispatch(
            "place_stop_order",
            &json!({ "symbol": "AAPL", "action": "SELL", "quantity": 5, "stop_price": 140 }),
        )
        .await
        .unwrap();
    assert_eq!(value["status"], "REJECTED");
    assert_eq!(value["order_id"], 0);
    assert_eq!(value["stop_price"], 140.0);

    let cancel = tools
        .dispatch("cancel_order", &json!({ "order_id": 7 }))
        .await
        .unwrap();
    assert_eq!(cancel["status"], "REJECTED");
    assert_eq!(broker.connect_calls(), 0);
}

#[tokio::test]
async fn cancel_unknown_order() {
    let broker = aapl();
    let tools = tools(&broker, false);

    let value = tools
        .dispatch("cancel_order", &json!({ "order_id": 99999 }))
        .await
        .unwrap();
    assert_eq!(value["status"], "NOT_FOUND");
    assert!(broker.cancel_requests().is_empty());
}

// ============================================================================
// Text rendering
// ============================================================================

#[tokio::test]
async fn failures_render_as_error_text() {
    let broker = MockBroker::builder().fail_connects(1).build();
    let tools = tools(&broker, false);

    let output = tools.call("get_positions", &json!({})).await;
    assert!(output.is_error);
    assert!(output.text.starts_with("Error: "));
    assert!(output.text.contains("connect"));

    let unknown = tools.call("get_weather", &json!({})).await;
    assert!(unknown.is_error);
    assert_eq!(unknown.text, "Error: unknown tool: get_weather");
}

#[tokio::test]
async fn success_renders_pretty_json() {
    let broker = MockBroker::builder()
        .with_position("DU1", "AAPL", 265598, 10.0, 150.0)
        .build();
    let tools = tools(&broker, false);

    let output = tools.call("get_positions", &json!({})).await;
    assert!(!output.is_error);
    assert!(output.text.contains('\n'));
    let parsed: Value = serde_json::from_str(&output.text).unwrap();
    assert_eq!(parsed[0]["symbol"], "AAPL");
    assert_eq!(parsed[0]["market_value"], 0.0);
}
