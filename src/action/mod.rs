//! Single atomic LLM turns and the streaming chunk model.
//!
//! An [`ActionNode`] runs exactly one provider turn: build messages, call
//! the provider, dispatch any tool calls in order, and detect the
//! final-answer signal. Streaming preserves per-turn chunk order so that
//! concatenating `Text`/`LlmOutput` chunk content reconstructs the
//! assistant text byte for byte.

mod node;

pub use node::{ActionNode, TurnOutcome};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::CostRecord;
use crate::schema::Message;

/// Kind tag of a streaming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    LlmOutput,
    ToolCall,
    ToolResponse,
    StepStart,
    StepEnd,
    Completion,
    Warning,
    Error,
    FinalAnswer,
}

/// Ordered unit of streaming output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: f64,
}

impl StreamChunk {
    pub fn new(chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chunk_type,
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Text, content)
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Warning, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Error, content)
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this chunk contributes to the accumulated assistant text.
    pub fn is_textual(&self) -> bool {
        matches!(self.chunk_type, ChunkType::Text | ChunkType::LlmOutput)
    }
}

/// Terminal result of a worker or agent step.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub answer: String,
    /// Quality score in [0, 1].
    pub score: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub is_final_answer: bool,
    /// Conversation history at termination.
    pub messages: Vec<Message>,
    /// Last raw provider reply text.
    pub raw_reply: String,
    pub cost: CostRecord,
    /// Free-form extras (route taken, check results, ...).
    pub info: HashMap<String, Value>,
}

impl AgentResponse {
    pub fn answered(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            score: 1.0,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let mut info = HashMap::new();
        info.insert("error".to_string(), Value::String(error.clone()));
        Self {
            answer: error,
            score: 0.0,
            terminated: true,
            is_final_answer: false,
            info,
            ..Default::default()
        }
    }

    pub fn with_final_answer(mut self, value: bool) -> Self {
        self.is_final_answer = value;
        if value {
            self.terminated = true;
        }
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_accumulation_filter() {
        let chunks = vec![
            StreamChunk::new(ChunkType::StepStart, ""),
            StreamChunk::text("hello "),
            StreamChunk::new(ChunkType::ToolCall, "{}"),
            StreamChunk::new(ChunkType::LlmOutput, "world"),
            StreamChunk::new(ChunkType::Completion, ""),
        ];
        let text: String = chunks
            .iter()
            .filter(|c| c.is_textual())
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_failed_response_shape() {
        let response = AgentResponse::failed("Tool error: boom");
        assert!(response.terminated);
        assert!(!response.is_final_answer);
        assert_eq!(response.score, 0.0);
        assert_eq!(response.info["error"], Value::String("Tool error: boom".to_string()));
    }
}
