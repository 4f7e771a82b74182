//! Anthropic Messages API provider.
//!
//! Grounded on `openclaw-agent/src/llm/anthropic.rs`: the request/response
//! shapes and `convert_messages`/`convert_tools` wire conversion carry over
//! near-verbatim. Dropped: streaming (no SSE surface, no `llm_log`
//! persistence), image content blocks (SubTerminator's only visual input
//! is the MCP screenshot path carried in `NormalizedSnapshot`, not sent to
//! the LLM as an inline image).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subterminator_core::{AssistantMessage, Message, Role, ToolCall, ToolDefinition, TransientError, UsageStats};

use crate::provider::LlmProvider;
use crate::retry::with_retry;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_prompt = None;
    let mut out = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                if let Some(ref content) = msg.content {
                    system_prompt = Some(content.clone());
                }
            }
            Role::User => {
                if let Some(ref content) = msg.content {
                    out.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: AnthropicContent::Text(content.clone()),
                    });
                }
            }
            Role::Assistant => {
                if !msg.tool_calls.is_empty() {
                    let mut blocks = Vec::new();
                    if let Some(ref content) = msg.content {
                        if !content.is_empty() {
                            blocks.push(ContentBlock::Text { text: content.clone() });
                        }
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.args.clone(),
                        });
                    }
                    out.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                } else if let Some(ref content) = msg.content {
                    out.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: AnthropicContent::Text(content.clone()),
                    });
                }
            }
            Role::Tool => {
                let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                let content = msg.content.clone().unwrap_or_default();
                out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult { tool_use_id, content }]),
                });
            }
        }
    }

    (system_prompt, out)
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn process_response(resp: AnthropicResponse) -> (AssistantMessage, UsageStats) {
    let usage = resp
        .usage
        .map(|u| UsageStats {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            ResponseBlock::Text { text } => text_parts.push(text),
            ResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input));
            }
        }
    }

    let msg = if !tool_calls.is_empty() {
        AssistantMessage {
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join(""))
            },
            tool_calls,
        }
    } else {
        AssistantMessage::text(text_parts.join(""))
    };

    (msg, usage)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<(AssistantMessage, UsageStats), TransientError> {
        let (system, anthropic_msgs) = convert_messages(messages);
        let anthropic_tools = convert_tools(tools);

        with_retry(
            || async {
                let request = AnthropicRequest {
                    model: self.model.clone(),
                    max_tokens: MAX_TOKENS,
                    messages: anthropic_msgs.clone(),
                    system: system.clone(),
                    tools: anthropic_tools.clone(),
                };

                let response = self
                    .client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| TransientError::Llm(format!("request failed: {e}")))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransientError::Llm(format!(
                        "Anthropic API returned {status}: {}",
                        &body[..body.len().min(500)]
                    )));
                }

                let api_response: AnthropicResponse = response
                    .json()
                    .await
                    .map_err(|e| TransientError::Llm(format!("failed to parse response: {e}")))?;

                Ok(process_response(api_response))
            },
            is_transient_anthropic_error,
        )
        .await
    }
}

fn is_transient_anthropic_error(err: &TransientError) -> bool {
    match err {
        TransientError::Llm(msg) => {
            msg.contains("429") || msg.contains("500") || msg.contains("502") || msg.contains("503") || msg.contains("504")
        }
        TransientError::McpTool(_) => false,
    }
}
