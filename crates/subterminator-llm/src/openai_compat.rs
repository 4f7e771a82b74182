//! OpenAI-compatible chat-completions provider (OpenAI itself, and any
//! self-hosted gateway speaking the same wire format).
//!
//! Grounded on `openclaw-agent/src/llm/mod.rs`'s `OpenAiCompatibleProvider`:
//! same request shape, same `tool_calls` response parsing. Dropped:
//! reasoning_content passthrough and vision image_url parts, neither of
//! which SubTerminator's conversation ever produces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subterminator_core::{AssistantMessage, Message, Role, ToolCall, ToolDefinition, TransientError, UsageStats};

use crate::provider::LlmProvider;
use crate::retry::with_retry;

const MAX_TOKENS: u32 = 4096;

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize, Clone)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunctionDefinition,
}

#[derive(Serialize)]
struct WireFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: role_str(m.role),
            content: m.content.clone(),
            tool_call_id: m.tool_call_id.clone(),
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            call_type: "function",
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: serde_json::to_string(&tc.args).unwrap_or_else(|_| "{}".to_string()),
                            },
                        })
                        .collect(),
                )
            },
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            tool_type: "function",
            function: WireFunctionDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunctionCall,
}

#[derive(Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

fn process_chat_response(resp: ChatResponse) -> Result<(AssistantMessage, UsageStats), TransientError> {
    let usage = resp
        .usage
        .map(|u| UsageStats {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransientError::Llm("response had no choices".to_string()))?;

    if let Some(tool_calls) = choice.message.tool_calls {
        if !tool_calls.is_empty() {
            let calls = tool_calls
                .into_iter()
                .map(|tc| {
                    let args: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));
                    ToolCall::new(tc.id, tc.function.name, args)
                })
                .collect();
            return Ok((
                AssistantMessage {
                    content: None,
                    tool_calls: calls,
                },
                usage,
            ));
        }
    }

    Ok((AssistantMessage::text(choice.message.content.unwrap_or_default()), usage))
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<(AssistantMessage, UsageStats), TransientError> {
        let wire_messages = to_wire_messages(messages);
        let wire_tools = to_wire_tools(tools);

        with_retry(
            || async {
                let request = ChatRequest {
                    model: self.model.clone(),
                    messages: wire_messages.clone(),
                    max_tokens: MAX_TOKENS,
                    tools: wire_tools.clone(),
                };

                let response = self
                    .client
                    .post(format!("{}/chat/completions", self.base_url))
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| TransientError::Llm(format!("request failed: {e}")))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransientError::Llm(format!(
                        "LLM API returned {status}: {}",
                        &body[..body.len().min(500)]
                    )));
                }

                let chat_response: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| TransientError::Llm(format!("failed to parse response: {e}")))?;

                process_chat_response(chat_response)
            },
            is_transient_http_error,
        )
        .await
    }
}

fn is_transient_http_error(err: &TransientError) -> bool {
    match err {
        TransientError::Llm(msg) => {
            msg.contains("429") || msg.contains("502") || msg.contains("503") || msg.contains("504")
        }
        TransientError::McpTool(_) => false,
    }
}
