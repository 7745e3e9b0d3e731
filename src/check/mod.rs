//! Grading and refinement of candidate answers.
//!
//! A checker grades `input.answer` into a [`CheckResult`]; the improve loop
//! feeds the critic's feedback back into a sub-worker until the candidate is
//! accepted, the score stops improving, or the round budget runs out.
//! Checker infrastructure failures never propagate: they grade as zero with
//! the failure description as feedback.

mod critic;
mod runner;

pub use critic::CheckMinion;
pub use runner::{CodiumCheckMinion, DoctestMinion, TestMinion};

use serde_json::Value;

use crate::action::AgentResponse;
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::workers::{Input, Worker};

/// Result of grading one candidate.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Quality score in [0, 1].
    pub score: f64,
    pub correct: bool,
    pub feedback: String,
}

impl CheckResult {
    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            correct: false,
            feedback: description.into(),
        }
    }
}

/// Check/improve loop configuration.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub max_improve_rounds: u32,
    pub acceptance_threshold: f64,
    /// Tolerance for numeric output comparison.
    pub numeric_tolerance: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            max_improve_rounds: 3,
            acceptance_threshold: 0.8,
            numeric_tolerance: 1e-6,
        }
    }
}

/// Pick the checker matching the input and grade the candidate.
///
/// Routing: an explicit `check_route` metadata key wins; otherwise
/// input/output test cases select the stdin/stdout runner, a test-case list
/// selects the assertion runner, a candidate containing doctest examples
/// selects the doctest runner, and everything else goes to the LLM critic.
pub async fn run_check(input: &Input, brain: &Brain, config: &CheckConfig) -> CheckResult {
    let route = match input.metadata.get("check_route").and_then(Value::as_str) {
        Some(explicit) => explicit.to_string(),
        None => match input.metadata.get("test_cases") {
            Some(Value::Object(_)) => "codium".to_string(),
            Some(Value::Array(_)) => "test".to_string(),
            _ => {
                if input.answer.contains(">>>") {
                    "doctest".to_string()
                } else {
                    "check".to_string()
                }
            }
        },
    };

    let outcome = match route.as_str() {
        "codium" => CodiumCheckMinion::new(config.numeric_tolerance).check(input).await,
        "test" => TestMinion::new().check(input).await,
        "doctest" => DoctestMinion::new().check(input, brain).await,
        _ => CheckMinion::new().check(input, brain).await,
    };

    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(route = %route, error = %e, "checker infrastructure failed");
            CheckResult::failure(format!("checker failed: {}", e))
        }
    }
}

/// Improver: delegates back to a sub-worker with the critic's feedback
/// attached to the input.
pub struct FeedbackMinion {
    route: String,
}

impl FeedbackMinion {
    pub fn new(route: impl Into<String>) -> Self {
        Self { route: route.into() }
    }

    pub async fn improve(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let worker = brain
            .registry()
            .create(&self.route)
            .ok_or_else(|| MinionError::UnknownRoute(self.route.clone()))?;
        worker.execute(input, brain).await
    }
}

/// Run the check/improve loop over a fresh worker response.
///
/// Terminates when the candidate is accepted (correct, or score at or above
/// the threshold), when the score fails to improve across two consecutive
/// rounds, or when the round budget is exhausted.
pub async fn check_and_improve(
    route: &str,
    input: &mut Input,
    brain: &Brain,
    mut response: AgentResponse,
    config: &CheckConfig,
) -> Result<AgentResponse, MinionError> {
    let rounds = input.check.min(config.max_improve_rounds);
    if rounds == 0 {
        return Ok(response);
    }

    let improver = FeedbackMinion::new(route);
    let mut previous_scores: Vec<f64> = Vec::new();

    for round in 0..rounds {
        let check = run_check(input, brain, config).await;
        tracing::info!(
            round = round,
            score = check.score,
            correct = check.correct,
            "check round complete"
        );
        response.score = check.score;
        response
            .info
            .insert("check_feedback".to_string(), Value::String(check.feedback.clone()));

        if check.correct || check.score >= config.acceptance_threshold {
            response.terminated = true;
            return Ok(response);
        }

        // stop when two consecutive rounds fail to improve
        if previous_scores.len() >= 2 {
            let n = previous_scores.len();
            if check.score <= previous_scores[n - 1] && previous_scores[n - 1] <= previous_scores[n - 2] {
                tracing::info!("score stopped improving, ending improve loop");
                return Ok(response);
            }
        }
        previous_scores.push(check.score);

        if round + 1 == rounds {
            break;
        }

        input.feedback = check.feedback;
        response = improver.improve(input, brain).await?;
        input.feedback.clear();
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn test_checker_failure_scores_zero() {
        // the scripted provider is exhausted, so the critic call fails
        let brain = brain_with(&[]);
        let mut input = Input::new("q");
        input.answer = "candidate".to_string();
        let result = run_check(&input, &brain, &CheckConfig::default()).await;
        assert_eq!(result.score, 0.0);
        assert!(!result.correct);
        assert!(result.feedback.contains("checker failed"));
    }

    #[tokio::test]
    async fn test_accepted_candidate_terminates_loop() {
        let brain = brain_with(&[
            "<root><feedback>looks right</feedback><correct>true</correct><score>0.95</score></root>",
        ]);
        let mut input = Input::new("q").with_check(3);
        input.answer = "42".to_string();
        let response = AgentResponse::answered("42");
        let result = check_and_improve("cot", &mut input, &brain, response, &CheckConfig::default())
            .await
            .unwrap();
        assert!(result.terminated);
        assert!((result.score - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_check_triggers_improver() {
        let brain = brain_with(&[
            // round 0: critic rejects
            "<root><feedback>wrong sign</feedback><correct>false</correct><score>0.2</score></root>",
            // improver (cot) produces a new candidate
            "Final answer: 42",
            // round 1: critic accepts
            "<root><feedback>fixed</feedback><correct>true</correct><score>0.9</score></root>",
        ]);
        let mut input = Input::new("q").with_check(3);
        input.answer = "-42".to_string();
        let response = AgentResponse::answered("-42");
        let result = check_and_improve("cot", &mut input, &brain, response, &CheckConfig::default())
            .await
            .unwrap();
        assert_eq!(result.answer, "42");
        assert!(result.terminated);
    }

    #[tokio::test]
    async fn test_check_zero_rounds_is_noop() {
        let brain = brain_with(&[]);
        let mut input = Input::new("q");
        let response = AgentResponse::answered("x");
        let result = check_and_improve("cot", &mut input, &brain, response, &CheckConfig::default())
            .await
            .unwrap();
        assert_eq!(result.answer, "x");
    }
}
