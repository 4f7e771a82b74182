//! MCP client: subprocess lifecycle, stdio JSON-RPC framing, tool calls.
//!
//! Grounded on `openclaw-agent/src/tools/mcp_bridge.rs`'s `McpClient`: a
//! `Mutex`-guarded inner state (child process, stdin, buffered stdout
//! reader, request-id counter), one in-flight request at a time (spec.md
//! §5: the engine is single-threaded cooperative, at most one outstanding
//! MCP request), and a `Drop` impl that kills the child if the caller
//! never closed it cleanly.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};
use subterminator_core::EngineError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolDescriptor};

const MIN_NODE_MAJOR: u32 = 18;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for launching the MCP server subprocess.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub profile_dir: std::path::PathBuf,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, profile_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            command: command.into(),
            args,
            profile_dir: profile_dir.into(),
        }
    }
}

struct Inner {
    child: Child,
    stdin: tokio::process::ChildStdin,
    reader: BufReader<tokio::process::ChildStdout>,
    next_id: u64,
    tools: Option<Vec<ToolDescriptor>>,
}

/// A connected MCP session. `call_tool` is recoverable (`TransientError`
/// surfaced to the LLM); everything else that can fail at this layer is
/// permanent (`EngineError::McpConnection`).
pub struct McpClient {
    config: McpServerConfig,
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

/// Validate the Node.js runtime prerequisite spec.md §4.3 requires before
/// spawning the MCP subprocess (most browser-automation MCP servers run on
/// Node). Fails fast with install guidance rather than a confusing
/// subprocess-spawn error.
pub async fn check_node_prerequisite() -> Result<(), EngineError> {
    let output = tokio::process::Command::new("node")
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            EngineError::Configuration(format!(
                "Node.js was not found on PATH ({e}). Install Node.js >= {MIN_NODE_MAJOR} \
                 from https://nodejs.org/ and ensure `node` is on PATH."
            ))
        })?;

    if !output.status.success() {
        return Err(EngineError::Configuration(
            "`node --version` exited with a non-zero status".to_string(),
        ));
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    let major = parse_node_major(version_str.trim()).ok_or_else(|| {
        EngineError::Configuration(format!("Could not parse Node.js version from '{version_str}'"))
    })?;

    if major < MIN_NODE_MAJOR {
        return Err(EngineError::Configuration(format!(
            "Node.js {version_str} found, but >= {MIN_NODE_MAJOR} is required. \
             Upgrade from https://nodejs.org/."
        )));
    }

    Ok(())
}

fn parse_node_major(version: &str) -> Option<u32> {
    version.trim_start_matches('v').split('.').next()?.parse().ok()
}

/// Spawn the MCP server subprocess and wire up its stdio pipes. Shared by
/// `connect` (fresh client) and `reconnect` (same client, new subprocess).
async fn spawn_inner(config: &McpServerConfig) -> Result<Inner, EngineError> {
    std::fs::create_dir_all(&config.profile_dir).map_err(|e| {
        EngineError::ProfileLoad(format!(
            "could not create profile directory {}: {e}",
            config.profile_dir.display()
        ))
    })?;

    let mut args = config.args.clone();
    args.push(format!("--user-data-dir={}", config.profile_dir.display()));

    let mut cmd = Command::new(&config.command);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| EngineError::McpConnection(format!("failed to spawn '{}': {e}", config.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineError::McpConnection("no stdin for MCP subprocess".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::McpConnection("no stdout for MCP subprocess".to_string()))?;

    Ok(Inner {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 1,
        tools: None,
    })
}

impl McpClient {
    /// Validate prerequisites, spawn the subprocess, and perform the MCP
    /// handshake (`initialize` + `notifications/initialized`).
    pub async fn connect(config: McpServerConfig) -> Result<Self, EngineError> {
        check_node_prerequisite().await?;

        info!(command = %config.command, "MCP client connecting");

        let inner = spawn_inner(&config).await?;

        let client = Self {
            config,
            inner: Mutex::new(inner),
            closed: AtomicBool::new(false),
        };

        client.handshake().await?;
        Ok(client)
    }

    async fn handshake(&self) -> Result<(), EngineError> {
        let resp = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "subterminator", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await
            .map_err(|e| EngineError::McpConnection(format!("handshake failed: {e}")))?;

        if let Some(err) = resp.error {
            return Err(EngineError::McpConnection(format!("initialize rejected: {err}")));
        }

        self.notify("notifications/initialized", json!({}))
            .await
            .map_err(|e| EngineError::McpConnection(format!("handshake notify failed: {e}")))?;

        info!("MCP client initialized");
        Ok(())
    }

    /// Discover tools from the server, memoized after first call.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError> {
        {
            let inner = self.inner.lock().await;
            if let Some(cached) = &inner.tools {
                return Ok(cached.clone());
            }
        }

        let resp = self
            .request("tools/list", json!({}))
            .await
            .map_err(|e| EngineError::McpConnection(format!("tools/list failed: {e}")))?;

        if let Some(err) = resp.error {
            return Err(EngineError::McpConnection(format!("tools/list error: {err}")));
        }

        let tools_arr = resp
            .result
            .as_ref()
            .and_then(|r| r.get("tools"))
            .and_then(|t| t.as_array())
            .ok_or_else(|| EngineError::McpConnection("invalid tools/list response".to_string()))?;

        let tools: Vec<ToolDescriptor> = tools_arr
            .iter()
            .map(|t| ToolDescriptor {
                name: t.get("name").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
                description: t.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                input_schema: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect();

        debug!(count = tools.len(), "MCP tools discovered");

        let mut inner = self.inner.lock().await;
        inner.tools = Some(tools.clone());
        Ok(tools)
    }

    /// Call a tool, returning its extracted text payload.
    ///
    /// Errors reported by the server (`isError` or a JSON-RPC error object)
    /// come back as `Ok(Err(message))` — a *recoverable* failure the caller
    /// surfaces to the LLM, not an engine-terminating one. A transport
    /// failure (write/read/timeout) is `Err(EngineError::McpConnection)`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Result<String, String>, EngineError> {
        let resp = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
            .map_err(|e| EngineError::McpConnection(format!("transport error calling '{name}': {e}")))?;

        if let Some(err) = resp.error {
            return Ok(Err(err.to_string()));
        }

        let result = match resp.result {
            Some(r) => r,
            None => return Ok(Err(format!("MCP tool '{name}' returned no result"))),
        };

        let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut output = String::new();
        if let Some(items) = result.get("content").and_then(|v| v.as_array()) {
            for item in items {
                if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(text);
                }
            }
        }

        if is_error {
            Ok(Err(output))
        } else {
            Ok(Ok(output))
        }
    }

    /// Kill the current subprocess, spawn a fresh one, and redo the MCP
    /// handshake, clearing the memoized tool list. Takes `&self` (not
    /// `&mut self`) so it's reachable through the `McpTransport` trait
    /// object the Task Runner holds — the child process and stdio pipes
    /// behind the shared `Mutex<Inner>` are swapped in place.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        warn!(command = %self.config.command, "reconnecting MCP subprocess");
        {
            let mut inner = self.inner.lock().await;
            let _ = inner.stdin.shutdown().await;
            if let Err(e) = inner.child.start_kill() {
                warn!("failed to kill MCP subprocess during reconnect: {e}");
            }
            let _ = inner.child.wait().await;
        }

        let fresh = spawn_inner(&self.config).await?;
        {
            let mut inner = self.inner.lock().await;
            *inner = fresh;
        }

        self.handshake().await
    }

    /// Release the stdio streams and reap the subprocess. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().await;
        let _ = inner.stdin.shutdown().await;
        if let Err(e) = inner.child.start_kill() {
            warn!("failed to kill MCP subprocess: {e}");
        }
        let _ = inner.child.wait().await;
    }

    async fn request(&self, method: &str, params: Value) -> anyhow::Result<JsonRpcResponse> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&req)?;
        line.push('\n');

        inner.stdin.write_all(line.as_bytes()).await?;
        inner.stdin.flush().await?;

        loop {
            let mut buf = String::new();
            let n = tokio::time::timeout(
                std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS),
                inner.reader.read_line(&mut buf),
            )
            .await??;

            if n == 0 {
                anyhow::bail!("MCP subprocess closed its stdout");
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed: JsonRpcResponse = serde_json::from_str(trimmed)?;
            // Skip notifications (no id echoed back, or id that isn't ours).
            match &parsed.id {
                Some(Value::Number(n)) if n.as_u64() == Some(id) => return Ok(parsed),
                None => continue,
                _ => continue,
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let note = JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&note)?;
        line.push('\n');
        inner.stdin.write_all(line.as_bytes()).await?;
        inner.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::transport::McpTransport for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError> {
        McpClient::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Result<String, String>, EngineError> {
        McpClient::call_tool(self, name, arguments).await
    }

    async fn close(&self) {
        McpClient::close(self).await
    }

    async fn reconnect(&self) -> Result<(), EngineError> {
        McpClient::reconnect(self).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut inner) = self.inner.try_lock() {
            let _ = inner.child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_node_version_strings() {
        assert_eq!(parse_node_major("v18.16.0"), Some(18));
        assert_eq!(parse_node_major("v20.11.1"), Some(20));
        assert_eq!(parse_node_major("16.0.0"), Some(16));
    }

    #[test]
    fn rejects_garbage_version_strings() {
        assert_eq!(parse_node_major(""), None);
        assert_eq!(parse_node_major("not-a-version"), None);
    }

    #[test]
    fn server_config_appends_profile_dir_arg() {
        let cfg = McpServerConfig::new("npx", vec!["@playwright/mcp".to_string()], "/tmp/profile");
        assert_eq!(cfg.args, vec!["@playwright/mcp".to_string()]);
        assert_eq!(cfg.profile_dir, std::path::PathBuf::from("/tmp/profile"));
    }
}
