#![cfg(unix)]

use std::sync::Arc;

use mcp::{Connector, DefaultConnector, McpError, ServerConnection, discover, discover_contracts};
use proto::EnvelopeErrorKind;
use serde_json::{Map, Value, json};

/// Minimal line-oriented MCP server: answers by pattern, echoes the request id.
const SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"sh-server","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*'"cursor":"page-2"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"fail","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}],"nextCursor":"page-2"}}\n' "$id" ;;
    *'"name":"echo"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}],"structuredContent":{"echo":true}}}\n' "$id" ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"isError":true,"content":[{"type":"text","text":"it broke"}]}}\n' "$id" ;;
  esac
done
"#;

fn sh_server() -> ServerConnection {
    ServerConnection::stdio("sh", "sh").arg("-c").arg(SERVER)
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn discover_walks_every_page() {
    let tools = discover(&DefaultConnector, &sh_server())
        .await
        .expect("discover");

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["echo", "fail"]);
    assert_eq!(tools[0].description.as_deref(), Some("Echo text back"));
    assert_eq!(tools[0].input_schema["required"], json!(["text"]));
}

#[tokio::test]
async fn remote_tools_run_through_the_contract() {
    let connector: Arc<dyn Connector> = Arc::new(DefaultConnector);
    let contracts = discover_contracts(connector, sh_server(), Some("sh"))
        .await
        .expect("discover");
    let names: Vec<&str> = contracts.iter().map(|c| c.name()).collect();
    assert_eq!(names, ["sh_echo", "sh_fail"]);

    let echo = &contracts[0];
    let env = echo.invoke(args(json!({"text": "hi"}))).await;
    assert!(env.success, "{env:?}");
    assert_eq!(env.result, Some(json!({"echo": true})));
    assert_eq!(env.metadata.as_ref().map(|m| m.call_id.as_str()), Some("sh_echo_1"));

    let env = echo.invoke(Map::new()).await;
    assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Validation));

    let fail = &contracts[1];
    assert_eq!(fail.description(), "MCP tool: fail");
    let env = fail.invoke(Map::new()).await;
    assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Execution));
    let exception = env.exception.expect("exception");
    assert_eq!(exception.kind, "RemoteToolError");
    assert_eq!(exception.message, "it broke");
    assert_eq!(fail.stats().error_count, 1);
}

#[tokio::test]
async fn unreachable_server_becomes_transport_fault() {
    let connector: Arc<dyn Connector> = Arc::new(DefaultConnector);
    let connection = Arc::new(ServerConnection::stdio("gone", "definitely-not-an-mcp-server"));
    let tool = mcp::McpTool {
        name: "ping".to_string(),
        ..Default::default()
    };
    let contract = mcp::remote_contract(&tool, connector, connection, None).expect("contract");

    let env = contract.invoke(Map::new()).await;
    assert!(!env.success);
    assert_eq!(env.exception.expect("exception").kind, "TransportFault");
    assert_eq!(contract.stats().call_count, 1);
}

#[tokio::test]
async fn silent_server_times_out() {
    let connection = ServerConnection::stdio("silent", "sh")
        .arg("-c")
        .arg("cat > /dev/null")
        .with_timeout(1);
    let err = discover(&DefaultConnector, &connection)
        .await
        .expect_err("timeout");
    assert!(matches!(err, McpError::Timeout(1)), "{err:?}");
}

#[tokio::test]
async fn exiting_server_closes_the_session() {
    let connection = ServerConnection::stdio("quits", "sh").arg("-c").arg("exit 0");
    let err = discover(&DefaultConnector, &connection)
        .await
        .expect_err("closed");
    assert!(matches!(err, McpError::Closed), "{err:?}");
}
