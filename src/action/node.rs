//! One LLM turn: provider call, ordered tool dispatch, termination.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use super::{AgentResponse, ChunkType, StreamChunk};
use crate::provider::{GenerateOptions, LlmError, LlmProvider, LlmResponse, ToolChoice};
use crate::schema::{Message, ToolCall};
use crate::tools::Tool;

/// Result of one turn.
pub struct TurnOutcome {
    /// Assistant text (may be empty when the turn is tool-calls only).
    pub assistant_text: String,
    /// Messages produced by the turn: the assistant message followed by one
    /// tool message per dispatched call, in dispatch order.
    pub messages: Vec<Message>,
    /// Dispatched calls with their result or error payload.
    pub tool_results: Vec<(ToolCall, Result<Value, String>)>,
    /// True when a `final_answer` tool call ended the turn.
    pub terminated: bool,
    pub final_answer: Option<Value>,
    pub raw: LlmResponse,
}

impl TurnOutcome {
    pub fn into_response(self, cost: crate::provider::CostRecord) -> AgentResponse {
        let answer = match &self.final_answer {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.assistant_text.clone(),
        };
        AgentResponse {
            answer,
            score: 1.0,
            terminated: self.terminated,
            truncated: false,
            is_final_answer: self.final_answer.is_some(),
            messages: self.messages,
            raw_reply: self.assistant_text,
            cost,
            info: Default::default(),
        }
    }
}

/// Executes exactly one LLM turn for a worker.
pub struct ActionNode {
    provider: Arc<dyn LlmProvider>,
    /// Per-tool dispatch timeout; a timeout is a recoverable tool error.
    tool_timeout: Option<std::time::Duration>,
}

impl ActionNode {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            tool_timeout: None,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn options(tools: &[Arc<dyn Tool>], tool_choice: ToolChoice, temperature: Option<f64>) -> GenerateOptions {
        GenerateOptions {
            temperature,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(|t| t.definition()).collect())
            },
            tool_choice,
        }
    }

    /// Run the turn without streaming.
    pub async fn execute(
        &self,
        messages: &[Message],
        tools: &[Arc<dyn Tool>],
        tool_choice: ToolChoice,
    ) -> Result<TurnOutcome, LlmError> {
        let options = Self::options(tools, tool_choice, None);
        let response = self
            .provider
            .generate_stream_response(messages, &options)
            .await?;
        self.finish_turn(response, tools, &mut |_| {}).await
    }

    /// Run the turn, forwarding ordered [`StreamChunk`]s to `on_chunk` as
    /// text arrives and tools execute.
    pub async fn execute_stream(
        &self,
        messages: &[Message],
        tools: &[Arc<dyn Tool>],
        tool_choice: ToolChoice,
        on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<TurnOutcome, LlmError> {
        let options = Self::options(tools, tool_choice, None);

        // stream the text; tool calls only arrive on the non-streaming path
        let mut streamed_text = String::new();
        let mut stream = self.provider.generate_stream(messages, &options).await?;
        while let Some(chunk) = stream.next().await {
            let piece = chunk?;
            streamed_text.push_str(&piece);
            on_chunk(StreamChunk::text(piece));
        }
        drop(stream);
        let response = LlmResponse {
            content: Some(streamed_text),
            ..Default::default()
        };
        self.finish_turn(response, tools, on_chunk).await
    }

    async fn finish_turn(
        &self,
        response: LlmResponse,
        tools: &[Arc<dyn Tool>],
        on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<TurnOutcome, LlmError> {
        let assistant_text = response.content.clone().unwrap_or_default();
        let tool_calls = response.tool_calls.clone().unwrap_or_default();

        let mut messages = vec![Message {
            role: crate::schema::Role::Assistant,
            content: if assistant_text.is_empty() {
                None
            } else {
                Some(crate::schema::MessageContent::Text(assistant_text.clone()))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.clone())
            },
            tool_call_id: None,
            name: None,
        }];

        let mut tool_results = Vec::new();
        let mut terminated = false;
        let mut final_answer = None;

        // dispatch in provider order; stop after a final_answer call
        for call in tool_calls {
            if call.function.name == "final_answer" {
                let args = call.parsed_arguments();
                let payload = args.get("answer").cloned().unwrap_or(args);
                on_chunk(
                    StreamChunk::new(ChunkType::FinalAnswer, payload.to_string())
                        .with_meta("tool_call_id", Value::String(call.id.clone())),
                );
                messages.push(Message::tool_result(call.id.clone(), payload.to_string()));
                tool_results.push((call, Ok(payload.clone())));
                terminated = true;
                final_answer = Some(payload);
                break;
            }

            on_chunk(
                StreamChunk::new(ChunkType::ToolCall, call.function.arguments.clone())
                    .with_meta("tool_name", Value::String(call.function.name.clone())),
            );

            let result = match tools.iter().find(|t| t.name() == call.function.name) {
                None => Err(format!("Tool not found: {}", call.function.name)),
                Some(tool) => {
                    let invocation = tool.call(call.parsed_arguments());
                    let outcome = match self.tool_timeout {
                        Some(timeout) => match tokio::time::timeout(timeout, invocation).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
                        },
                        None => invocation.await,
                    };
                    match outcome {
                        Ok(value) => Ok(value),
                        Err(e) => Err(format!("Tool error: {}", e)),
                    }
                }
            };

            let content = match &result {
                Ok(value) => match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                Err(error) => {
                    tracing::warn!(tool = %call.function.name, error = %error, "tool dispatch failed");
                    error.clone()
                }
            };
            on_chunk(
                StreamChunk::new(ChunkType::ToolResponse, content.clone())
                    .with_meta("tool_name", Value::String(call.function.name.clone()))
                    .with_meta("is_error", Value::Bool(result.is_err())),
            );
            messages.push(Message::tool_result(call.id.clone(), content));
            tool_results.push((call, result));
        }

        on_chunk(StreamChunk::new(ChunkType::Completion, ""));

        Ok(TurnOutcome {
            assistant_text,
            messages,
            tool_results,
            terminated,
            final_answer,
            raw: response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::tools::{FnTool, ToolParam};
    use std::sync::Mutex;

    fn adder() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            "adder",
            "adds numbers",
            vec![
                ToolParam::required("a", "integer", "first"),
                ToolParam::required("b", "integer", "second"),
            ],
            Arc::new(|args| {
                Ok(serde_json::json!(
                    args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)
                ))
            }),
        ))
    }

    #[tokio::test]
    async fn test_plain_text_turn() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text("plain answer");
        let node = ActionNode::new(provider);
        let outcome = node
            .execute(&[Message::user("q")], &[], ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(outcome.assistant_text, "plain answer");
        assert!(!outcome.terminated);
        assert_eq!(outcome.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_dispatch_in_order() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_response(
            LlmResponse::text("calling tools").with_tool_calls(vec![
                ToolCall::new("c1", "adder", serde_json::json!({"a": 1, "b": 2})),
                ToolCall::new("c2", "adder", serde_json::json!({"a": 3, "b": 4})),
            ]),
        );
        let node = ActionNode::new(provider);
        let outcome = node
            .execute(&[Message::user("q")], &[adder()], ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(outcome.tool_results.len(), 2);
        assert_eq!(outcome.tool_results[0].1.as_ref().unwrap(), &serde_json::json!(3));
        assert_eq!(outcome.tool_results[1].1.as_ref().unwrap(), &serde_json::json!(7));
        // assistant message + two tool messages, in order
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(outcome.messages[2].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_payload_not_abort() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_response(LlmResponse::text("").with_tool_calls(vec![
            ToolCall::new("c1", "missing", serde_json::json!({})),
            ToolCall::new("c2", "adder", serde_json::json!({"a": 1, "b": 1})),
        ]));
        let node = ActionNode::new(provider);
        let outcome = node
            .execute(&[Message::user("q")], &[adder()], ToolChoice::Auto)
            .await
            .unwrap();
        assert!(outcome.tool_results[0].1.as_ref().unwrap_err().contains("Tool not found"));
        // the loop continued past the failure
        assert_eq!(outcome.tool_results[1].1.as_ref().unwrap(), &serde_json::json!(2));
        assert!(!outcome.terminated);
    }

    #[tokio::test]
    async fn test_final_answer_stops_dispatch() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_response(LlmResponse::text("").with_tool_calls(vec![
            ToolCall::new("c1", "final_answer", serde_json::json!({"answer": "42"})),
            ToolCall::new("c2", "adder", serde_json::json!({"a": 1, "b": 1})),
        ]));
        let node = ActionNode::new(provider);
        let outcome = node
            .execute(&[Message::user("q")], &[adder()], ToolChoice::Auto)
            .await
            .unwrap();
        assert!(outcome.terminated);
        assert_eq!(outcome.final_answer, Some(serde_json::json!("42")));
        // the second call was never dispatched
        assert_eq!(outcome.tool_results.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_concatenation_equals_full_text() {
        let text = "the quick brown fox jumps over the lazy dog";
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text(text);
        let node = ActionNode::new(provider);

        let chunks = Mutex::new(Vec::new());
        let outcome = node
            .execute_stream(&[Message::user("q")], &[], ToolChoice::Auto, &mut |c| {
                chunks.lock().unwrap().push(c)
            })
            .await
            .unwrap();

        let accumulated: String = chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_textual())
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(accumulated, text);
        assert_eq!(outcome.assistant_text, text);
    }
}
