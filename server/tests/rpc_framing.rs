//! JSON-RPC envelope handling and line framing.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ibdesk::mock::MockBroker;
use ibdesk::{ConnectParams, Desk, DeskSettings};
use ibdesk_server::rpc::{
    self, INVALID_PARAMS, Incoming, METHOD_NOT_FOUND, PARSE_ERROR, Response, RpcServer,
};
use ibdesk_server::tools::Tools;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

fn server(broker: &MockBroker, read_only: bool) -> Arc<RpcServer> {
    let settings = DeskSettings {
        read_only,
        quote_timeout: Duration::from_millis(50),
        ack_delay: Duration::from_millis(10),
        ..DeskSettings::default()
    };
    let params = ConnectParams {
        host: "127.0.0.1".into(),
        port: 4002,
        client_id: 1,
    };
    let desk = Arc::new(Desk::new(broker.connector(), params, settings));
    Arc::new(RpcServer::new(Tools::new(desk, "SMART")))
}

async fn roundtrip(server: &RpcServer, request: Value) -> Response {
    let line = server.handle_line(&request.to_string()).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

// ============================================================================
// Methods
// ============================================================================

#[tokio::test]
async fn initialize_reports_tools_capability() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let resp = roundtrip(
        &server,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(resp.id, json!(1));
    assert_eq!(result["protocolVersion"], rpc::PROTOCOL_VERSION);
    assert!(result["capabilities"]["tools"].is_object());
    assert_eq!(result["serverInfo"]["name"], "ibdesk");
    assert_eq!(broker.connect_calls(), 0);
}

#[tokio::test]
async fn tools_list_names_every_tool() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let resp = roundtrip(
        &server,
        json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" }),
    )
    .await;
    let result = resp.result.unwrap();
    let names: Vec<&str> = result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 10);
    assert!(names.contains(&"get_stock_price"));
    assert!(names.contains(&"cancel_order"));
}

#[tokio::test]
async fn tools_call_wraps_text_content() {
    let broker = MockBroker::builder()
        .with_account_value("DU1", "NetLiquidation", "5000")
        .build();
    let server = server(&broker, false);

    let resp = roundtrip(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "get_account_summary", "arguments": {} },
        }),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["type"], "text");
    let text = result["content"][0]["text"].as_str().unwrap();
    let summary: Value = serde_json::from_str(text).unwrap();
    assert_eq!(summary["NetLiquidation"]["value"], "5000");
}

#[tokio::test]
async fn tool_failure_is_a_result_not_a_protocol_error() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let resp = roundtrip(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "get_stock_price", "arguments": { "symbol": "ZZZZ" } },
        }),
    )
    .await;
    assert!(resp.error.is_none());
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(
        result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Error: could not resolve ZZZZ")
    );
}

// ============================================================================
// Protocol errors
// ============================================================================

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let line = server.handle_line("{not json").await.unwrap();
    let resp: Response = serde_json::from_str(&line).unwrap();
    assert_eq!(resp.id, Value::Null);
    assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
}

#[tokio::test]
async fn unknown_method_and_bad_params() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let resp = roundtrip(
        &server,
        json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/list" }),
    )
    .await;
    assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);

    let resp = roundtrip(
        &server,
        json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": { "arguments": {} } }),
    )
    .await;
    assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);

    let out = server
        .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert!(out.is_none());
}

// ============================================================================
// Stream framing
// ============================================================================

#[tokio::test]
async fn stream_answers_each_line_and_closes_at_eof() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, true);

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"cancel_order","arguments":{"order_id":9}}}"#,
        "\n",
    );
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);

    rpc::serve_stream(server, input.as_bytes(), writer)
        .await
        .unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    let mut responses: Vec<Response> = output
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    responses.sort_by_key(|r| r.id.as_i64());

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, json!(1));
    assert_eq!(responses[0].result, Some(json!({})));
    let text = responses[1].result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(text.contains("REJECTED"));
    assert_eq!(broker.connect_calls(), 0);
}

// ============================================================================
// TCP accept loop
// ============================================================================

/// Listener whose first `failures` accepts fail.
struct FlakyListener {
    inner: TcpListener,
    failures: u32,
}

impl Incoming for FlakyListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        async move {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::other("too many open files"));
            }
            self.inner.accept().await
        }
    }
}

#[tokio::test]
async fn accept_errors_do_not_stop_the_listener() {
    let broker = MockBroker::builder().build();
    let server = server(&broker, false);
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = inner.local_addr().unwrap();
    let listener = FlakyListener { inner, failures: 2 };

    let client = async {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        serde_json::from_str::<Response>(&line).unwrap()
    };

    let resp = tokio::select! {
        result = rpc::serve_incoming(server, listener) => panic!("accept loop ended: {result:?}"),
        resp = tokio::time::timeout(Duration::from_secs(5), client) => resp.unwrap(),
    };
    assert_eq!(resp.id, json!(7));
    assert_eq!(resp.result, Some(json!({})));
}
