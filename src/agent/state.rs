//! Per-invocation agent state.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::schema::Message;
use crate::workers::Input;

/// Marker left behind when a large historical message is moved to a file.
#[derive(Debug, Clone)]
pub struct DecayMarker {
    /// Index of the decayed message in `AgentState::messages`.
    pub message_index: usize,
    pub file_path: PathBuf,
    pub original_size: usize,
}

/// State of one live agent invocation.
pub struct AgentState {
    pub input: Input,
    pub messages: Vec<Message>,
    /// Step at which each message arrived; parallel to `messages`.
    pub message_steps: Vec<usize>,
    pub step_count: usize,
    pub done: bool,
    pub score: f64,
    /// Per-agent scratch variables.
    pub scratch: HashMap<String, Value>,
    /// Decayed message markers; each points at an existing cache file until
    /// the agent closes.
    pub decayed: Vec<DecayMarker>,
}

impl AgentState {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            messages: Vec::new(),
            message_steps: Vec::new(),
            step_count: 0,
            done: false,
            score: 0.0,
            scratch: HashMap::new(),
            decayed: Vec::new(),
        }
    }

    /// Append messages produced in the current step.
    pub fn push_messages(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.messages.push(message);
            self.message_steps.push(self.step_count);
        }
    }

    pub fn is_decayed(&self, index: usize) -> bool {
        self.decayed.iter().any(|m| m.message_index == index)
    }
}
