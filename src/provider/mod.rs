//! LLM provider abstraction.
//!
//! A provider exposes a uniform generate / stream / stream-with-tools
//! contract over heterogeneous backends. Vendor HTTP clients live outside
//! the core; anything implementing [`LlmProvider`] plugs in. The
//! [`ScriptedProvider`] replays canned responses for offline runs and tests.

mod error;
mod retry;
mod scripted;

pub mod cost;

pub use cost::{pricing_for_model, CostRecord, TokenUsage};
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use retry::{with_retry, RetryingProvider};
pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::schema::{Message, ToolCall, ToolDefinition};

/// Ordered, finite stream of text chunks. Not restartable; chunks form an
/// ordered prefix of the final text.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Tool selection forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Let the model decide (default)
    #[default]
    Auto,
    /// Forbid tool calls
    None,
    /// Force a specific tool by name
    Forced(String),
}

/// Options for a generate call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Tool definitions visible to the model.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool selection policy.
    pub tool_choice: ToolChoice,
}

impl GenerateOptions {
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools: if tools.is_empty() { None } else { Some(tools) },
            ..Default::default()
        }
    }
}

/// Full response from a provider call.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }
}

/// Trait for LLM providers.
///
/// Retries for transient failures happen inside implementations (or via
/// [`with_retry`]); non-transient errors propagate to the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier this provider targets, used for cost lookup.
    fn model(&self) -> &str;

    /// Generate the assistant text for the given messages.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let response = self.generate_stream_response(messages, options).await?;
        Ok(response.content.unwrap_or_default())
    }

    /// Stream the assistant text as an ordered sequence of chunks.
    ///
    /// Concatenating the chunks must reconstruct the full text; caller
    /// cancellation ends the stream with no side effects beyond cost
    /// accounting for already-consumed tokens.
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<TextStream, LlmError>;

    /// Run the full call (content, tool calls, usage) to completion.
    async fn generate_stream_response(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Snapshot of the provider's accumulated cost.
    fn cost(&self) -> CostRecord;
}
