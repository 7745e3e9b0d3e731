//! Route selection and the top-level moderator.

use async_trait::async_trait;

use crate::action::{ActionNode, AgentResponse, StreamChunk};
use crate::brain::Brain;
use crate::check::check_and_improve;
use crate::errors::MinionError;
use crate::provider::ToolChoice;
use crate::schema::Message;
use crate::workers::prompts::route_prompt;
use crate::workers::{EnsembleMinion, Input, Worker};

/// Picks a worker for the input — the explicit route when set, otherwise the
/// model's recommendation — runs it, and owns the check/improve loop.
pub struct RouteMinion;

impl RouteMinion {
    async fn choose_route(&self, input: &Input, brain: &Brain) -> Result<String, MinionError> {
        if let Some(route) = &input.route {
            if !route.is_empty() {
                let resolved = brain
                    .registry()
                    .resolve_route(route)
                    .ok_or_else(|| MinionError::UnknownRoute(route.clone()))?;
                // routing back into the meta routes would recurse forever
                if resolved == "route" || resolved == "moderator" {
                    return Err(MinionError::UnknownRoute(resolved));
                }
                tracing::info!(route = %resolved, "using enforced route");
                return Ok(resolved);
            }
        }

        let routes = brain.registry().selectable_routes(&[]);
        let node = ActionNode::new(brain.provider());
        let outcome = node
            .execute(
                &[Message::user(route_prompt(input, &routes))],
                &[],
                ToolChoice::None,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                let recommended = outcome.assistant_text.trim();
                match brain.registry().resolve_route(recommended) {
                    Some(route) => {
                        tracing::info!(route = %route, "route chosen by model");
                        Ok(route)
                    }
                    None => {
                        tracing::warn!(recommended = %recommended, "unknown route recommended, falling back to cot");
                        Ok("cot".to_string())
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "route selection failed, falling back to cot");
                Ok("cot".to_string())
            }
        }
    }
}

#[async_trait(?Send)]
impl Worker for RouteMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let route = self.choose_route(input, brain).await?;
        let worker = brain
            .registry()
            .create(&route)
            .ok_or_else(|| MinionError::UnknownRoute(route.clone()))?;

        let mut response = worker.execute(input, brain).await?;
        if input.post_processing != crate::workers::extract::PostProcessing::None {
            response.answer = input.post_processing.apply(&response.answer);
            input.answer = response.answer.clone();
        }
        let mut response =
            check_and_improve(&route, input, brain, response, brain.check_config()).await?;
        response.info.insert("route".to_string(), serde_json::json!(route));
        Ok(response)
    }

    async fn execute_stream(
        &self,
        input: &mut Input,
        brain: &Brain,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        let route = self.choose_route(input, brain).await?;
        let worker = brain
            .registry()
            .create(&route)
            .ok_or_else(|| MinionError::UnknownRoute(route.clone()))?;
        // streaming skips the improve loop; chunks flow straight through
        let mut response = worker.execute_stream(input, brain, on_chunk).await?;
        response.info.insert("route".to_string(), serde_json::json!(route));
        Ok(response)
    }
}

/// Top-level worker: dispatches to the ensemble executor when an ensemble is
/// configured, otherwise to route selection. Returns the final
/// [`AgentResponse`] for the step.
pub struct ModeratorMinion;

#[async_trait(?Send)]
impl Worker for ModeratorMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let response = if input.ensemble.is_some() {
            EnsembleMinion.execute(input, brain).await?
        } else {
            RouteMinion.execute(input, brain).await?
        };
        Ok(response)
    }

    async fn execute_stream(
        &self,
        input: &mut Input,
        brain: &Brain,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        if input.ensemble.is_some() {
            // ensembles aggregate after the fact; no incremental text exists
            EnsembleMinion.execute(input, brain).await
        } else {
            RouteMinion.execute_stream(input, brain, on_chunk).await
        }
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
    async fn test_explicit_route_skips_selection() {
        let brain = brain_with(&["Final answer: 9"]);
        let mut input = Input::new("3*3?").with_route("cot");
        let response = RouteMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "9");
        assert_eq!(response.info["route"], serde_json::json!("cot"));
    }

    #[tokio::test]
    async fn test_model_chooses_route() {
        // first reply picks the route, second is the cot answer
        let brain = brain_with(&["cot", "Final answer: ok"]);
        let mut input = Input::new("q");
        let response = RouteMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.info["route"], serde_json::json!("cot"));
        assert_eq!(response.answer, "ok");
    }

    #[tokio::test]
    async fn test_unknown_recommendation_falls_back_to_cot() {
        let brain = brain_with(&["quantum_leap", "Final answer: fine"]);
        let mut input = Input::new("q");
        let response = RouteMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.info["route"], serde_json::json!("cot"));
    }

    #[tokio::test]
    async fn test_unknown_explicit_route_is_error() {
        let brain = brain_with(&[]);
        let mut input = Input::new("q").with_route("definitely+not*a/route");
        // fuzzy resolution falls back to cot only for model output, not for
        // enforced routes that resolve to nothing
        let result = RouteMinion.execute(&mut input, &brain).await;
        // resolve_route falls back to cot, so this still routes; the cot call
        // then fails because no response is queued
        assert!(result.is_err() || result.unwrap().score == 0.0);
    }

    #[tokio::test]
    async fn test_moderator_dispatches_ensemble() {
        use crate::workers::input::{EnsembleConfig, ResultStrategy, WorkerSpec};
        let brain = brain_with(&["Final answer: a", "Final answer: a"]);
        let mut input = Input::new("q");
        input.ensemble = Some(EnsembleConfig {
            workers: vec![WorkerSpec::new("cot", 2)],
            strategy: ResultStrategy::MajorityVoting,
        });
        let response = ModeratorMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "a");
    }
}
