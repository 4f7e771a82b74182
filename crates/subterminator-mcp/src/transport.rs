//! `McpTransport`: the seam between the Task Runner and a live MCP session.
//!
//! Mirrors `subterminator-llm::LlmProvider` — both exist so the engine can
//! be driven by a scripted double in tests instead of a real subprocess or
//! a real HTTP call. `McpClient` is the only production implementation.

use async_trait::async_trait;
use serde_json::Value;
use subterminator_core::EngineError;

use crate::protocol::ToolDescriptor;

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError>;

    /// See `McpClient::call_tool`: outer `Err` is a transport failure,
    /// inner `Err(String)` is a server-reported tool error.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Result<String, String>, EngineError>;

    /// Kill and respawn the underlying subprocess, clearing any memoized
    /// state. Called by the Task Runner when a `call_tool` comes back with
    /// `EngineError::McpConnection` (spec.md §4.1.1 step 4).
    async fn reconnect(&self) -> Result<(), EngineError>;

    async fn close(&self);
}
