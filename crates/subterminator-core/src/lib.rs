//! Shared types, error taxonomy, and snapshot parsing for SubTerminator.
//!
//! Leaf crate: depends on nothing else in the workspace (spec.md §2's
//! dependency order starts here).

pub mod errors;
pub mod snapshot;
pub mod types;
pub mod virtual_tools;

pub use errors::{EngineError, TransientError};
pub use snapshot::parse_snapshot;
pub use types::{
    AssistantMessage, Message, NormalizedSnapshot, Role, TaskReason, TaskResult, ToolCall,
    ToolDefinition, UsageStats,
};
