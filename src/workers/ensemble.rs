//! Ensemble worker: run configured sub-workers and merge their answers.

use async_trait::async_trait;

use crate::action::AgentResponse;
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::workers::input::{ResultStrategy, WorkerSpec};
use crate::workers::{Input, Worker};

/// Runs the sub-workers declared in `input.ensemble` and aggregates with the
/// configured result strategy.
///
/// Tie-breaking for majority voting: the most common answer wins; among
/// equally common answers, the one whose best individual score is highest;
/// remaining ties go to the lexicographically smallest answer.
pub struct EnsembleMinion;

struct Candidate {
    answer: String,
    score: f64,
    terminated: bool,
    is_final_answer: bool,
}

impl EnsembleMinion {
    async fn run_workers(
        &self,
        specs: &[WorkerSpec],
        input: &Input,
        brain: &Brain,
    ) -> Result<Vec<Candidate>, MinionError> {
        // build one (worker, input) pair per copy, then run them concurrently
        let mut jobs = Vec::new();
        for spec in specs {
            for _ in 0..spec.count.max(1) {
                let worker = brain
                    .registry()
                    .create(&spec.name)
                    .ok_or_else(|| MinionError::UnknownRoute(spec.name.clone()))?;
                let mut sub_input = input.clone();
                sub_input.ensemble = None;
                sub_input.route = Some(spec.name.clone());
                if let Some(post) = spec.post_processing {
                    sub_input.post_processing = post;
                }
                if let Some(check) = spec.check {
                    sub_input.check = check;
                }
                jobs.push((worker, sub_input, spec.post_processing));
            }
        }

        let futures: Vec<_> = jobs
            .into_iter()
            .map(|(worker, mut sub_input, post)| async move {
                let mut response = worker.execute(&mut sub_input, brain).await?;
                if sub_input.check > 0 {
                    let route = sub_input.route.clone().unwrap_or_default();
                    response = crate::check::check_and_improve(
                        &route,
                        &mut sub_input,
                        brain,
                        response,
                        brain.check_config(),
                    )
                    .await?;
                }
                let answer = match post {
                    Some(p) => p.apply(&response.answer),
                    None => response.answer.clone(),
                };
                Ok::<Candidate, MinionError>(Candidate {
                    answer,
                    score: response.score,
                    terminated: response.terminated,
                    is_final_answer: response.is_final_answer,
                })
            })
            .collect();

        let mut candidates = Vec::new();
        for result in futures::future::join_all(futures).await {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    // one failing copy does not sink the ensemble
                    tracing::warn!(error = %e, "ensemble sub-worker failed");
                }
            }
        }
        if candidates.is_empty() {
            return Err(MinionError::Other("all ensemble sub-workers failed".to_string()));
        }
        Ok(candidates)
    }

    fn aggregate(strategy: ResultStrategy, candidates: &[Candidate]) -> (String, f64) {
        let mean_score: f64 =
            candidates.iter().map(|c| c.score).sum::<f64>() / candidates.len() as f64;

        match strategy {
            ResultStrategy::BestScore => {
                let best = candidates.iter().fold(&candidates[0], |best, c| {
                    if c.score > best.score {
                        c
                    } else {
                        best
                    }
                });
                (best.answer.clone(), best.score)
            }
            ResultStrategy::Weighted | ResultStrategy::MajorityVoting => {
                // group candidates by answer
                let mut groups: Vec<(String, f64, f64, usize)> = Vec::new(); // (answer, weight, best, count)
                for candidate in candidates {
                    let weight = match strategy {
                        ResultStrategy::Weighted => candidate.score,
                        _ => 1.0,
                    };
                    match groups.iter_mut().find(|(a, _, _, _)| *a == candidate.answer) {
                        Some(group) => {
                            group.1 += weight;
                            group.2 = group.2.max(candidate.score);
                            group.3 += 1;
                        }
                        None => groups.push((candidate.answer.clone(), weight, candidate.score, 1)),
                    }
                }
                groups.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                        .then_with(|| a.0.cmp(&b.0))
                });
                let winner = &groups[0];
                let winner_mean: f64 = candidates
                    .iter()
                    .filter(|c| c.answer == winner.0)
                    .map(|c| c.score)
                    .sum::<f64>()
                    / winner.3 as f64;
                (winner.0.clone(), mean_score.max(winner_mean))
            }
        }
    }
}

#[async_trait(?Send)]
impl Worker for EnsembleMinion {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError> {
        let config = input
            .ensemble
            .clone()
            .ok_or_else(|| MinionError::Config("ensemble worker requires an ensemble config".to_string()))?;
        if config.workers.is_empty() {
            return Err(MinionError::Config("ensemble config has no workers".to_string()));
        }

        let candidates = self.run_workers(&config.workers, input, brain).await?;
        let (answer, score) = Self::aggregate(config.strategy, &candidates);

        let terminated = candidates.iter().any(|c| c.terminated || c.is_final_answer);
        input.set_candidate(answer.clone(), answer.clone());

        tracing::info!(
            candidates = candidates.len(),
            strategy = ?config.strategy,
            "ensemble aggregated"
        );
        Ok(AgentResponse {
            answer,
            score,
            terminated,
            is_final_answer: terminated,
            cost: brain.provider().cost(),
            ..Default::default()
        }
        .with_info("ensemble_count", serde_json::json!(candidates.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Brain;
    use crate::provider::ScriptedProvider;
    use crate::workers::input::EnsembleConfig;
    use std::sync::Arc;

    fn candidate(answer: &str, score: f64) -> Candidate {
        Candidate {
            answer: answer.to_string(),
            score,
            terminated: true,
            is_final_answer: true,
        }
    }

    #[test]
    fn test_majority_voting_score_at_least_mean() {
        let candidates = vec![
            candidate("42", 0.9),
            candidate("42", 0.8),
            candidate("42", 0.7),
            candidate("41", 1.0),
            candidate("41", 1.0),
        ];
        let (answer, score) = EnsembleMinion::aggregate(ResultStrategy::MajorityVoting, &candidates);
        assert_eq!(answer, "42");
        let mean = (0.9 + 0.8 + 0.7 + 1.0 + 1.0) / 5.0;
        assert!(score >= mean);
    }

    #[test]
    fn test_tie_breaks_by_best_individual_score() {
        let candidates = vec![
            candidate("a", 0.5),
            candidate("b", 0.9),
        ];
        let (answer, _) = EnsembleMinion::aggregate(ResultStrategy::MajorityVoting, &candidates);
        assert_eq!(answer, "b");
    }

    #[test]
    fn test_weighted_strategy() {
        let candidates = vec![
            candidate("x", 0.2),
            candidate("x", 0.2),
            candidate("y", 0.9),
        ];
        let (answer, _) = EnsembleMinion::aggregate(ResultStrategy::Weighted, &candidates);
        assert_eq!(answer, "y");
    }

    #[test]
    fn test_best_score_strategy() {
        let candidates = vec![candidate("low", 0.1), candidate("high", 0.95)];
        let (answer, score) = EnsembleMinion::aggregate(ResultStrategy::BestScore, &candidates);
        assert_eq!(answer, "high");
        assert_eq!(score, 0.95);
    }

    #[tokio::test]
    async fn test_ensemble_runs_configured_workers() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        for answer in ["Final answer: 42", "Final answer: 42", "Final answer: 41"] {
            provider.push_text(answer);
        }
        let brain = Brain::with_provider(provider);

        let mut input = Input::new("q");
        input.ensemble = Some(EnsembleConfig {
            workers: vec![WorkerSpec::new("cot", 3)],
            strategy: ResultStrategy::MajorityVoting,
        });
        let response = EnsembleMinion.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "42");
        assert_eq!(response.info["ensemble_count"], serde_json::json!(3));
        assert!(response.terminated);
    }
}
