//! Single-call worker strategies: raw, native, cot, dcot.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::action::{ActionNode, AgentResponse, StreamChunk};
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::provider::ToolChoice;
use crate::schema::{canonicalize, Message};
use crate::workers::extract::{extract_final_answer, split_think, PostProcessing};
use crate::workers::prompts::{worker_prompt, COT_INSTRUCTION, DCOT_INSTRUCTION};
use crate::workers::{Input, Worker};

/// Directly queries the LLM without any prompt processing.
pub struct RawMinion;

#[async_trait(?Send)]
impl Worker for RawMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let messages = canonicalize(&input.query, input.system_prompt.as_deref());
        let outcome = node
            .execute(&messages, &brain.tools(), ToolChoice::Auto)
            .await?;

        // a final_answer tool call supplies the answer; otherwise the full
        // assistant text does
        let answer = match &outcome.final_answer {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => split_think(&outcome.assistant_text).1,
        };
        input.set_candidate(answer.clone(), outcome.assistant_text.clone());

        Ok(AgentResponse {
            answer,
            score: 1.0,
            terminated: outcome.terminated,
            truncated: false,
            is_final_answer: outcome.final_answer.is_some(),
            messages: outcome.messages,
            raw_reply: outcome.assistant_text,
            cost: brain.provider().cost(),
            info: HashMap::new(),
        })
    }

    async fn execute_stream(
        &self,
        input: &mut Input,
        brain: &Brain,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let messages = canonicalize(&input.query, input.system_prompt.as_deref());
        let outcome = node
            .execute_stream(&messages, &brain.tools(), ToolChoice::Auto, on_chunk)
            .await?;
        let (_, answer) = split_think(&outcome.assistant_text);
        input.set_candidate(answer.clone(), outcome.assistant_text.clone());
        Ok(AgentResponse {
            answer,
            raw_reply: outcome.assistant_text,
            messages: outcome.messages,
            score: 1.0,
            cost: brain.provider().cost(),
            ..Default::default()
        })
    }
}

/// Asks the LLM with the standard worker prompt.
pub struct NativeMinion;

#[async_trait(?Send)]
impl Worker for NativeMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let mut messages = Vec::new();
        if let Some(system) = &input.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(worker_prompt(input)));

        let outcome = node
            .execute(&messages, &brain.tools(), ToolChoice::Auto)
            .await?;
        let (_, answer) = split_think(&outcome.assistant_text);
        input.set_candidate(answer.clone(), outcome.assistant_text.clone());

        Ok(AgentResponse {
            answer,
            score: 1.0,
            messages: outcome.messages,
            raw_reply: outcome.assistant_text,
            cost: brain.provider().cost(),
            ..Default::default()
        })
    }
}

/// Chain-of-thought: think step by step, extract the final answer.
pub struct CotMinion;

#[async_trait(?Send)]
impl Worker for CotMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let mut messages = Vec::new();
        if let Some(system) = &input.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(format!(
            "{}\n\n{}",
            COT_INSTRUCTION,
            worker_prompt(input)
        )));

        let outcome = node
            .execute(&messages, &brain.tools(), ToolChoice::Auto)
            .await?;
        let (_, cleaned) = split_think(&outcome.assistant_text);

        // code answers are extracted downstream; everything else takes the
        // final-answer line
        let answer = if input.post_processing == PostProcessing::ExtractPython
            || input.query_type == "code_solution"
        {
            cleaned
        } else {
            extract_final_answer(&cleaned)
        };
        input.set_candidate(answer.clone(), outcome.assistant_text.clone());

        Ok(AgentResponse {
            answer,
            score: 1.0,
            terminated: true,
            is_final_answer: true,
            messages: outcome.messages,
            raw_reply: outcome.assistant_text,
            cost: brain.provider().cost(),
            ..Default::default()
        })
    }
}

/// Dynamic chain of thought with self-consistency: N samples, majority vote.
pub struct DcotMinion {
    pub samples: usize,
}

impl Default for DcotMinion {
    fn default() -> Self {
        Self { samples: 3 }
    }
}

#[async_trait(?Send)]
impl Worker for DcotMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let mut messages = Vec::new();
        if let Some(system) = &input.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(format!(
            "{}\n\n{}",
            DCOT_INSTRUCTION,
            worker_prompt(input)
        )));

        // independent samples, voted on after extraction
        let calls = (0..self.samples.max(1))
            .map(|_| node.execute(&messages, &[], ToolChoice::None))
            .collect::<Vec<_>>();
        let outcomes = futures::future::join_all(calls).await;

        let mut answers: Vec<(String, String)> = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            let (_, cleaned) = split_think(&outcome.assistant_text);
            answers.push((extract_final_answer(&cleaned), outcome.assistant_text));
        }
        if answers.is_empty() {
            return Err(MinionError::Other("dcot produced no samples".to_string()));
        }

        // majority vote; ties break toward the earliest sample
        let mut counts: Vec<(String, usize)> = Vec::new();
        for (answer, _) in &answers {
            match counts.iter_mut().find(|(a, _)| a == answer) {
                Some(entry) => entry.1 += 1,
                None => counts.push((answer.clone(), 1)),
            }
        }
        let (winner, votes) = counts
            .iter()
            .max_by_key(|(_, count)| *count)
            .cloned()
            .unwrap_or_default();
        let raw = answers
            .iter()
            .find(|(a, _)| *a == winner)
            .map(|(_, raw)| raw.clone())
            .unwrap_or_default();

        input.set_candidate(winner.clone(), raw.clone());
        let consensus = votes as f64 / answers.len() as f64;

        Ok(AgentResponse {
            answer: winner,
            score: consensus,
            terminated: true,
            is_final_answer: true,
            raw_reply: raw,
            cost: brain.provider().cost(),
            ..Default::default()
        }
        .with_info("samples", serde_json::json!(answers.len()))
        .with_info("votes", serde_json::json!(votes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Brain;
    use crate::provider::ScriptedProvider;
    use std::sync::Arc;

    fn brain_with(responses: &[&str]) -> Brain {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        for response in responses {
            provider.push_text(*response);
        }
        Brain::with_provider(provider)
    }

    #[tokio::test]
    async fn test_raw_returns_full_text() {
        let brain = brain_with(&["full assistant text"]);
        let mut input = Input::new("q");
        let response = RawMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "full assistant text");
        assert!(!response.terminated);
    }

    #[tokio::test]
    async fn test_cot_extracts_final_answer() {
        let brain = brain_with(&["Step 1: multiply.\nStep 2: done.\nFinal answer: 132912"]);
        let mut input = Input::new("what's 234*568");
        let response = CotMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "132912");
        assert!(response.terminated);
        assert!(response.is_final_answer);
        assert_eq!(input.answer, "132912");
    }

    #[tokio::test]
    async fn test_cot_strips_think_tags() {
        let brain = brain_with(&["<think>hidden chain</think>Final answer: 7"]);
        let mut input = Input::new("q");
        let response = CotMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "7");
        assert!(!response.answer.contains("hidden"));
    }

    #[tokio::test]
    async fn test_dcot_majority_voting() {
        let brain = brain_with(&[
            "Final answer: 42",
            "Final answer: 41",
            "Final answer: 42",
        ]);
        let mut input = Input::new("q");
        let response = DcotMinion { samples: 3 }.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "42");
        assert!((response.score - 2.0 / 3.0).abs() < 1e-9);
    }
}
