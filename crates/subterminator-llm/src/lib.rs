//! Provider-agnostic LLM client: one `LlmProvider` trait, an Anthropic
//! implementation, an OpenAI-compatible implementation, and prefix-based
//! routing between them.

pub mod anthropic;
pub mod openai_compat;
pub mod provider;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatibleProvider;
pub use provider::{select_provider, LlmProvider};
