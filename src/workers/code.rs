//! Code-producing workers: one-shot python and the Thought/Code/Observation
//! cycle.

use async_trait::async_trait;

use crate::action::{ActionNode, AgentResponse, ChunkType, StreamChunk};
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::provider::ToolChoice;
use crate::schema::Message;
use crate::workers::extract::{extract_code_block, split_think};
use crate::workers::prompts::{code_agent_system_prompt, python_prompt};
use crate::workers::{Input, Worker};

/// Generates a Python snippet, executes it, and feeds errors back as
/// observations for up to `max_rounds` attempts.
pub struct PythonMinion {
    pub max_rounds: usize,
}

impl Default for PythonMinion {
    fn default() -> Self {
        Self { max_rounds: 5 }
    }
}

#[async_trait(?Send)]
impl Worker for PythonMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());
        let mut error = String::new();

        for round in 0..self.max_rounds {
            let mut messages = Vec::new();
            if let Some(system) = &input.system_prompt {
                messages.push(Message::system(system.clone()));
            }
            messages.push(Message::user(python_prompt(input, &error)));

            let outcome = node.execute(&messages, &[], ToolChoice::None).await?;
            let (_, cleaned) = split_think(&outcome.assistant_text);
            let Some(code) = extract_code_block(&cleaned) else {
                error = "No ```python code block found in the reply.".to_string();
                tracing::warn!(round = round, "python worker reply had no code block");
                continue;
            };
            input.answer_code = code.clone();

            let result = brain.interpreter().lock().await.run(&code).await;
            if let Some(exec_error) = &result.error {
                error = exec_error.clone();
                input.error = error.clone();
                tracing::debug!(round = round, error = %error, "code execution failed, retrying");
                continue;
            }

            let answer = if result.is_final_answer {
                result.value_text.clone()
            } else if !result.logs.trim().is_empty() {
                result.logs.trim_end().to_string()
            } else {
                result.value_text.clone()
            };
            input.set_candidate(answer.clone(), outcome.assistant_text.clone());
            input.error.clear();

            return Ok(AgentResponse {
                answer,
                score: 1.0,
                terminated: result.is_final_answer,
                is_final_answer: result.is_final_answer,
                raw_reply: outcome.assistant_text,
                cost: brain.provider().cost(),
                ..Default::default()
            }
            .with_info("rounds", serde_json::json!(round + 1)));
        }

        input.set_candidate(format!("error: {}", error), String::new());
        Ok(AgentResponse {
            answer: input.answer.clone(),
            score: 0.0,
            terminated: false,
            cost: brain.provider().cost(),
            ..Default::default()
        }
        .with_info("execution_failed", serde_json::json!(true)))
    }
}

/// Thought -> Code -> Observation cycle with persistent interpreter state.
pub struct CodeMinion {
    pub max_iterations: usize,
}

impl Default for CodeMinion {
    fn default() -> Self {
        Self { max_iterations: 5 }
    }
}

impl CodeMinion {
    async fn run_cycle(
        &self,
        input: &mut Input,
        brain: &Brain,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        let node = ActionNode::new(brain.provider());

        // expose the shared tool surface inside the interpreter
        {
            let mut interpreter = brain.interpreter().lock().await;
            interpreter.send_tools(brain.tools());
            if !input.symbols.is_empty() {
                interpreter.send_variables(input.symbols.clone());
            }
        }

        let tool_lines: Vec<String> = brain
            .tools()
            .iter()
            .map(|t| format!("- {}({}): {}", crate::tools::sanitize_tool_name(t.name()),
                t.inputs().iter().map(|p| p.name.clone()).collect::<Vec<_>>().join(", "),
                t.description()))
            .collect();

        let mut messages = vec![
            Message::system(match &input.system_prompt {
                Some(extra) => format!("{}\n\n{}", code_agent_system_prompt(&tool_lines), extra),
                None => code_agent_system_prompt(&tool_lines),
            }),
            Message::user(input.query_text()),
        ];

        for step in 0..self.max_iterations {
            on_chunk(
                StreamChunk::new(ChunkType::StepStart, "")
                    .with_meta("step", serde_json::json!(step + 1)),
            );

            let outcome = node.execute(&messages, &[], ToolChoice::None).await?;
            let (_, cleaned) = split_think(&outcome.assistant_text);
            on_chunk(StreamChunk::new(ChunkType::LlmOutput, cleaned.clone()));

            messages.push(Message::assistant(outcome.assistant_text.clone()));

            let Some(code) = extract_code_block(&cleaned) else {
                // no code block means the model is answering directly
                input.set_candidate(cleaned.clone(), outcome.assistant_text.clone());
                return Ok(AgentResponse {
                    answer: cleaned,
                    score: 1.0,
                    terminated: true,
                    messages,
                    raw_reply: outcome.assistant_text,
                    cost: brain.provider().cost(),
                    ..Default::default()
                });
            };
            input.answer_code = code.clone();

            let result = brain.interpreter().lock().await.run(&code).await;
            let observation = result.observation();
            on_chunk(
                StreamChunk::new(ChunkType::ToolResponse, observation.clone())
                    .with_meta("is_error", serde_json::json!(result.is_error())),
            );

            if result.is_final_answer {
                let answer = result.value_text.clone();
                input.set_candidate(answer.clone(), outcome.assistant_text.clone());
                on_chunk(StreamChunk::new(ChunkType::FinalAnswer, answer.clone()));
                return Ok(AgentResponse {
                    answer,
                    score: 1.0,
                    terminated: true,
                    is_final_answer: true,
                    messages,
                    raw_reply: outcome.assistant_text,
                    cost: brain.provider().cost(),
                    ..Default::default()
                }
                .with_info("steps", serde_json::json!(step + 1)));
            }

            messages.push(Message::user(format!("Observation: {}", observation)));
        }

        // out of iterations; report the best we have
        input.error = "max iterations reached".to_string();
        Ok(AgentResponse {
            answer: input.answer.clone(),
            score: 0.0,
            terminated: false,
            truncated: true,
            messages,
            cost: brain.provider().cost(),
            ..Default::default()
        })
    }
}

#[async_trait(?Send)]
impl Worker for CodeMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        self.run_cycle(input, brain, &mut |_| {}).await
    }

    async fn execute_stream(
        &self,
        input: &mut Input,
        brain: &Brain,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        self.run_cycle(input, brain, on_chunk).await
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
    async fn test_python_worker_executes_code() {
        let brain = brain_with(&["```python\nresult = 234 * 568\nfinal_answer(result)\n```"]);
        let mut input = Input::new("what's the solution 234*568");
        let response = PythonMinion::default().execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "132912");
        assert!(response.terminated);
        assert!(response.is_final_answer);
        assert_eq!(response.info["rounds"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_python_worker_retries_on_error() {
        let brain = brain_with(&[
            "```python\nresult = undefined_name + 1\n```",
            "```python\nfinal_answer(21 * 2)\n```",
        ]);
        let mut input = Input::new("q");
        let response = PythonMinion::default().execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "42");
        assert_eq!(response.info["rounds"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_python_worker_fails_after_budget() {
        let responses = ["```python\nboom(\n```"; 5];
        let brain = brain_with(&responses);
        let mut input = Input::new("q");
        let response = PythonMinion::default().execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.score, 0.0);
        assert!(response.info.contains_key("execution_failed"));
    }

    #[tokio::test]
    async fn test_code_worker_observation_cycle() {
        let brain = brain_with(&[
            "Thought: compute first.\n```python\nx = 40\nprint(x)\n```<end_code>",
            "Thought: finish.\n```python\nfinal_answer(x + 2)\n```<end_code>",
        ]);
        let mut input = Input::new("q");
        let response = CodeMinion::default().execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "42");
        assert!(response.is_final_answer);
        assert_eq!(response.info["steps"], serde_json::json!(2));
        // observation from step 1 was fed back as a user message
        assert!(response
            .messages
            .iter()
            .any(|m| m.text_content().map(|t| t.starts_with("Observation: 40")).unwrap_or(false)));
    }

    #[tokio::test]
    async fn test_code_worker_direct_answer_without_block() {
        let brain = brain_with(&["The answer is simply 4."]);
        let mut input = Input::new("2+2?");
        let response = CodeMinion::default().execute(&mut input, &brain).await.unwrap();
        assert!(response.terminated);
        assert_eq!(response.answer, "The answer is simply 4.");
    }
}
