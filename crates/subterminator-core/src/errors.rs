use thiserror::Error;

/// Permanent errors: the run cannot continue and must terminate. Each
/// variant maps to exactly one CLI exit code and (where applicable) a
/// `TaskReason`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("MCP connection error: {0}")]
    McpConnection(String),

    #[error("failed to load browser profile: {0}")]
    ProfileLoad(String),

    #[error("unknown service: {0}")]
    ServiceNotFound(String),

    #[error("invalid snapshot, first 200 chars: {preview}")]
    SnapshotValidation { preview: String },

    #[error("checkpoint rejected by human: {0}")]
    CheckpointRejected(String),
}

impl EngineError {
    /// Build a `SnapshotValidation` error, truncating to the first 200
    /// characters of the offending input as spec.md §4.5 requires.
    pub fn snapshot_validation(raw: &str) -> Self {
        let preview: String = raw.chars().take(200).collect();
        EngineError::SnapshotValidation { preview }
    }

    /// The CLI exit code this permanent error maps to (spec.md §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Configuration(_) => 2,
            EngineError::ServiceNotFound(_) => 3,
            EngineError::McpConnection(_) => 5,
            EngineError::ProfileLoad(_) => 5,
            EngineError::SnapshotValidation { .. } => 1,
            EngineError::CheckpointRejected(_) => 1,
        }
    }
}

/// Transient errors: the engine may retry internally, or surface the
/// failure to the LLM as an observation and let it decide how to proceed.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("MCP tool error: {0}")]
    McpTool(String),

    #[error("LLM error: {0}")]
    Llm(String),
}
