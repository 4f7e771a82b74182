//! Schemas for the two tools the engine handles internally instead of
//! forwarding to MCP. Always injected into the catalog sent to the LLM.

use crate::types::ToolDefinition;

pub const COMPLETE_TASK: &str = "complete_task";
pub const REQUEST_HUMAN_APPROVAL: &str = "request_human_approval";

pub fn virtual_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: COMPLETE_TASK.to_string(),
            description: "Declare the task finished. Call this only when you believe the goal \
                has been achieved (status=success) or cannot be achieved (status=failed). A \
                success claim is independently verified against the current page before it is \
                accepted."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["success", "failed"]},
                    "reason": {"type": "string", "description": "Why you believe this status applies."}
                },
                "required": ["status", "reason"]
            }),
        },
        ToolDefinition {
            name: REQUEST_HUMAN_APPROVAL.to_string(),
            description: "Ask a human to approve a proposed action before you take it. Use this \
                whenever you are unsure whether an action is safe or reversible."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "description": "Human-readable description of the proposed action."},
                    "reason": {"type": "string", "description": "Why approval is being requested."}
                },
                "required": ["action", "reason"]
            }),
        },
    ]
}
