//! Line-delimited JSON-RPC 2.0 client over child-process stdio.
//!
//! One frame per line on stdin/stdout. Used for both external tool servers
//! and LLM-built custom tools (which run behind the same protocol).

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{Result, ToolError};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period between closing stdin and force-killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A tool definition returned by `tools/list`.
#[derive(Debug, Clone)]
pub struct RemoteToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

struct ClientInner {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

/// Client for one long-lived tool server child. Requests are serialised
/// through a mutex — the protocol is strictly request/response per line.
pub struct StdioToolClient {
    inner: tokio::sync::Mutex<ClientInner>,
}

impl StdioToolClient {
    /// Spawn the child and perform the initialize handshake.
    pub async fn connect(command: &str, args: &[String], cwd: Option<&Path>) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Server(format!("spawn '{command}' failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Server("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Server("child stdout unavailable".to_string()))?;

        let client = Self {
            inner: tokio::sync::Mutex::new(ClientInner {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout).lines(),
                next_id: 0,
            }),
        };

        client
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "guenther", "version": env!("CARGO_PKG_VERSION") }
                })),
                INIT_TIMEOUT,
            )
            .await?;
        client.notify("notifications/initialized").await?;

        Ok(client)
    }

    /// `tools/list` → definitions exposed by the server.
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolDef>> {
        let result = self.request("tools/list", Some(json!({})), INIT_TIMEOUT).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .iter()
            .map(|t| RemoteToolDef {
                name: t.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                description: t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                input_schema: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .filter(|t| !t.name.is_empty())
            .collect())
    }

    /// `tools/call`. A server-side error is returned as an `{"error": …}`
    /// mapping so the agent loop can show it to the model; only transport
    /// failures are `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
            CALL_TIMEOUT,
        )
        .await
    }

    /// `tools/call` with extra params beyond `arguments` (the custom-tool
    /// wrapper also receives a per-call `settings` bag).
    pub async fn call_tool_with_params(&self, name: &str, mut params: Value) -> Result<Value> {
        params["name"] = json!(name);
        self.request("tools/call", Some(params), CALL_TIMEOUT).await
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let mut inner = self.inner.lock().await;

        inner.next_id += 1;
        let id = inner.next_id;
        let mut frame = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            frame["params"] = params;
        }

        write_line(&mut inner, &frame).await?;
        debug!(%method, id, "rpc request sent");

        let response = tokio::time::timeout(timeout, read_response(&mut inner, id))
            .await
            .map_err(|_| ToolError::Server(format!("{method} timed out after {timeout:?}")))??;

        if let Some(error) = response.get("error") {
            return Ok(json!({ "error": error.clone() }));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let frame = json!({ "jsonrpc": "2.0", "method": method });
        write_line(&mut inner, &frame).await
    }

    /// Close stdin (the protocol's terminate signal) and give the child a
    /// grace period before killing it.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.stdin.take(); // drop → EOF on the child's stdin

        match tokio::time::timeout(SHUTDOWN_GRACE, inner.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "tool server exited"),
            _ => {
                warn!("tool server did not exit in time, killing");
                let _ = inner.child.kill().await;
            }
        }
    }
}

async fn write_line(inner: &mut ClientInner, frame: &Value) -> Result<()> {
    let stdin = inner
        .stdin
        .as_mut()
        .ok_or_else(|| ToolError::Server("tool server connection closed".to_string()))?;
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    stdin
        .write_all(&line)
        .await
        .map_err(|e| ToolError::Server(format!("write to tool server failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| ToolError::Server(format!("flush to tool server failed: {e}")))?;
    Ok(())
}

/// Read lines until one parses as a JSON-RPC response with the expected id.
/// Children are free to print diagnostics between frames; those lines are
/// skipped.
async fn read_response(inner: &mut ClientInner, id: u64) -> Result<Value> {
    loop {
        let line = inner
            .stdout
            .next_line()
            .await
            .map_err(|e| ToolError::Server(format!("read from tool server failed: {e}")))?
            .ok_or_else(|| ToolError::Server("tool server closed its stdout".to_string()))?;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) if v.get("id").and_then(Value::as_u64) == Some(id) => return Ok(v),
            Ok(_) => continue,  // notification or stale frame
            Err(_) => continue, // stray diagnostic output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The protocol is exercised end-to-end in tests/line_protocol.rs with a
    // scripted child; here we cover the definition mapping.

    #[test]
    fn remote_def_defaults_empty_schema() {
        let t = json!({ "name": "x", "description": "d" });
        let def = RemoteToolDef {
            name: t["name"].as_str().unwrap().to_string(),
            description: t["description"].as_str().unwrap().to_string(),
            input_schema: t
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        };
        assert_eq!(def.input_schema["type"], "object");
    }
}
