use serde::{Deserialize, Serialize};

/// A conversation role, mirroring the four-way tag the turn loop threads
/// through history: only assistant messages may carry a tool request, and
/// only tool messages answer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation the LLM asked for.
///
/// `id` is echoed back in the matching tool result message so the LLM can
/// correlate a call with its observation across a turn boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// One entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_call_id: None,
            tool_calls,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// What the LLM sees of the page: a frozen observation at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    pub url: String,
    pub title: String,
    /// Verbatim accessibility outline text. Opaque to the engine except for
    /// substring matching done by service predicates.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

/// The LLM's response for one turn: either final text, or a request to
/// invoke tools (the runner enforces "first one only" above this layer).
#[derive(Debug, Clone)]
pub struct AssistantMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }
}

/// Token accounting for one LLM call, accumulated across a run.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl std::ops::AddAssign for UsageStats {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Terminal classification of why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskReason {
    Completed,
    HumanRejected,
    MaxTurnsExceeded,
    LlmNoAction,
    LlmError,
    McpError,
    VerificationFailed,
    /// Not in the source spec's reason list: added so `--dry-run` has
    /// somewhere to land when it stops short of an irreversible action,
    /// rather than overloading one of the real failure reasons.
    DryRunStopped,
}

impl std::fmt::Display for TaskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskReason::Completed => "completed",
            TaskReason::HumanRejected => "human_rejected",
            TaskReason::MaxTurnsExceeded => "max_turns_exceeded",
            TaskReason::LlmNoAction => "llm_no_action",
            TaskReason::LlmError => "llm_error",
            TaskReason::McpError => "mcp_error",
            TaskReason::VerificationFailed => "verification_failed",
            TaskReason::DryRunStopped => "dry_run_stopped",
        };
        write!(f, "{}", s)
    }
}

/// Terminal outcome of one `run()` invocation.
///
/// Invariant: `success == true` implies `reason == Completed` and
/// `verified == true`. Enforced by the constructors below rather than by
/// convention — `TaskResult::success_completed` is the only way to build a
/// `success=true` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub verified: bool,
    pub reason: TaskReason,
    pub turns: u32,
    pub final_url: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

impl TaskResult {
    /// The only constructor for a successful outcome — keeps the
    /// success-implies-completed-and-verified invariant in one place.
    pub fn success_completed(turns: u32, final_url: Option<String>, usage: Option<UsageStats>) -> Self {
        Self {
            success: true,
            verified: true,
            reason: TaskReason::Completed,
            turns,
            final_url,
            error: None,
            usage,
        }
    }

    pub fn failure(
        reason: TaskReason,
        turns: u32,
        final_url: Option<String>,
        error: Option<String>,
        usage: Option<UsageStats>,
    ) -> Self {
        debug_assert_ne!(
            reason,
            TaskReason::Completed,
            "use success_completed for a completed+verified outcome"
        );
        Self {
            success: false,
            verified: false,
            reason,
            turns,
            final_url,
            error,
            usage,
        }
    }
}

/// A function-calling tool signature advertised to the LLM: the union of
/// MCP-discovered tools and the two virtual tools.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_completed_is_always_consistent() {
        let r = TaskResult::success_completed(4, Some("https://netflix.com/done".into()), None);
        assert!(r.success);
        assert!(r.verified);
        assert_eq!(r.reason, TaskReason::Completed);
    }

    #[test]
    fn task_reason_display_matches_wire_names() {
        assert_eq!(TaskReason::HumanRejected.to_string(), "human_rejected");
        assert_eq!(TaskReason::MaxTurnsExceeded.to_string(), "max_turns_exceeded");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("call_1", "ok");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.role, Role::Tool);
    }
}
