//! MCP client: connects to a browser-automation MCP server over stdio,
//! speaks newline-delimited JSON-RPC 2.0, and exposes tool discovery and
//! invocation to the engine.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{check_node_prerequisite, McpClient, McpServerConfig};
pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolDescriptor};
pub use transport::McpTransport;
