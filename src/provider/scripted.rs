//! Deterministic provider that replays queued responses.
//!
//! Used for offline runs and for exercising worker and agent pipelines in
//! tests without a network. Cost accounting works like a real provider: a
//! queued response may declare its usage, otherwise a chars/4 estimate is
//! recorded.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use super::{CostRecord, GenerateOptions, LlmError, LlmProvider, LlmResponse, TextStream, TokenUsage};
use crate::schema::Message;

/// Provider replaying canned [`LlmResponse`]s in FIFO order.
pub struct ScriptedProvider {
    model: String,
    responses: Mutex<VecDeque<LlmResponse>>,
    cost: Mutex<CostRecord>,
    /// Record of every message list the provider was called with.
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(VecDeque::new()),
            cost: Mutex::new(CostRecord::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain-text reply.
    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.push_response(LlmResponse::text(content));
        self
    }

    /// Queue a full response (tool calls, usage, ...).
    pub fn push_response(&self, response: LlmResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Message lists seen so far, in call order.
    pub fn recorded_calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    fn next_response(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let mut response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::server_error(503, "scripted provider exhausted"))?;

        let usage = response.usage.unwrap_or_else(|| {
            let prompt_chars: usize = messages
                .iter()
                .filter_map(|m| m.content.as_ref())
                .map(|c| c.byte_len())
                .sum();
            let completion_chars = response.content.as_deref().map(str::len).unwrap_or(0);
            TokenUsage::new((prompt_chars / 4) as u64, (completion_chars / 4) as u64)
        });
        response.usage = Some(usage);
        self.cost.lock().unwrap().add_usage(&self.model, &usage);
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<TextStream, LlmError> {
        let response = self.next_response(messages)?;
        let content = response.content.unwrap_or_default();
        // Split on whitespace boundaries so concatenation is byte-exact.
        let chunks: Vec<String> = content
            .split_inclusive(' ')
            .map(|s| s.to_string())
            .collect();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn generate_stream_response(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.next_response(messages)
    }

    fn cost(&self) -> CostRecord {
        *self.cost.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order() {
        let provider = ScriptedProvider::new("gpt-4o");
        provider.push_text("first").push_text("second");

        let messages = vec![Message::user("q")];
        let options = GenerateOptions::default();
        assert_eq!(provider.generate(&messages, &options).await.unwrap(), "first");
        assert_eq!(provider.generate(&messages, &options).await.unwrap(), "second");
        assert!(provider.generate(&messages, &options).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_concatenation_matches_full_text() {
        let provider = ScriptedProvider::new("gpt-4o");
        let text = "the quick brown fox jumps";
        provider.push_text(text).push_text(text);

        let messages = vec![Message::user("q")];
        let options = GenerateOptions::default();

        let mut stream = provider.generate_stream(&messages, &options).await.unwrap();
        let mut accumulated = String::new();
        while let Some(chunk) = stream.next().await {
            accumulated.push_str(&chunk.unwrap());
        }
        let full = provider.generate(&messages, &options).await.unwrap();
        assert_eq!(accumulated, full);
    }

    #[tokio::test]
    async fn test_cost_recorded_once_per_call() {
        let provider = ScriptedProvider::new("gpt-4o");
        provider.push_text("answer text");
        let messages = vec![Message::user("a question of some length")];
        provider
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap();
        let cost = provider.cost();
        assert!(cost.total_tokens > 0);
        assert!(cost.total_cost() > 0.0);
    }
}
