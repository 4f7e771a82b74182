//! Provider-agnostic chat-with-tools trait.
//!
//! Grounded on `openclaw-agent/src/llm/mod.rs`'s `LlmProvider` trait, pared
//! to what SubTerminator needs: one non-streaming `complete()` call per
//! turn (no streaming surface — there's no TUI token-by-token render here),
//! and a `Completion` folded directly into `AssistantMessage` since the
//! turn loop only ever forwards it to the engine.

use async_trait::async_trait;
use subterminator_core::{AssistantMessage, EngineError, Message, ToolDefinition, TransientError, UsageStats};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable identity for logging (usually the model name).
    fn name(&self) -> &str;

    /// Send the full conversation history and the current tool catalog,
    /// get back one assistant turn. A single call; retry/backoff lives in
    /// [`crate::retry::with_retry`], one layer up.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<(AssistantMessage, UsageStats), TransientError>;
}

/// Construct the provider named by `model`, per SPEC_FULL.md §4.4's
/// prefix routing: `claude*` to Anthropic, anything else to the
/// OpenAI-compatible chat-completions surface.
///
/// Reads `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` from the environment;
/// missing the key the chosen route needs is a `Configuration` error, not
/// a panic, since it's only discovered at the moment a run is started.
pub fn select_provider(model: &str) -> Result<Box<dyn LlmProvider>, EngineError> {
    if model.starts_with("claude") {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            EngineError::Configuration(
                "ANTHROPIC_API_KEY is not set; required to use a claude* model".to_string(),
            )
        })?;
        Ok(Box::new(crate::anthropic::AnthropicProvider::new(&api_key, model)))
    } else {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::Configuration(format!(
                "OPENAI_API_KEY is not set; required to use model '{model}'"
            ))
        })?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Ok(Box::new(crate::openai_compat::OpenAiCompatibleProvider::new(
            &base_url, &api_key, model,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_claude_prefixed_models_without_openai_key() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let provider = select_provider("claude-sonnet-4-5").unwrap();
        assert_eq!(provider.name(), "claude-sonnet-4-5");
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = select_provider("claude-sonnet-4-5").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
