// Exercise the stdio JSON-RPC line protocol end-to-end against a scripted
// child process: handshake, tools/list, tools/call, shutdown.

use serde_json::json;

use guenther_tools::rpc::StdioToolClient;

// Responds to the deterministic request ids the client assigns:
// 1 = initialize, (notification), 2 = tools/list, 3 = tools/call.
const SCRIPT: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"scripted","version":"0.0.1"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo_tool","description":"gibt Text zurueck","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}'
read line
echo 'stray diagnostic output that must be skipped'
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hallo"}]}}'
read line
"#;

#[tokio::test]
async fn handshake_list_call_shutdown() {
    let client = StdioToolClient::connect("sh", &["-c".to_string(), SCRIPT.to_string()], None)
        .await
        .expect("connect + initialize");

    let tools = client.list_tools().await.expect("tools/list");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo_tool");
    assert_eq!(tools[0].input_schema["required"][0], "text");

    let result = client
        .call_tool("echo_tool", json!({ "text": "hallo" }))
        .await
        .expect("tools/call");
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], "hallo");

    client.shutdown().await;
}

#[tokio::test]
async fn server_error_becomes_error_mapping() {
    const ERROR_SCRIPT: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found: tools/list"}}'
"#;

    let client = StdioToolClient::connect(
        "sh",
        &["-c".to_string(), ERROR_SCRIPT.to_string()],
        None,
    )
    .await
    .expect("connect");

    // A JSON-RPC error is not a transport failure: the call resolves to an
    // error mapping, which carries no tools.
    let result = client.list_tools().await.expect("transport ok");
    assert!(result.is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_is_a_server_error() {
    let err = StdioToolClient::connect("/does/not/exist", &[], None).await;
    assert!(err.is_err());
}
