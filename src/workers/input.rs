//! The mutable unit of work flowing through workers.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use uuid::Uuid;

use crate::schema::Query;
use crate::workers::extract::PostProcessing;

/// Per-worker configuration inside an ensemble.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Route name of the sub-worker.
    pub name: String,
    /// Number of copies to run.
    pub count: usize,
    pub post_processing: Option<PostProcessing>,
    /// Check rounds for this worker (overrides `Input::check`).
    pub check: Option<u32>,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            post_processing: None,
            check: None,
        }
    }
}

/// How an ensemble merges its sub-worker answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultStrategy {
    #[default]
    MajorityVoting,
    /// Weight each answer by its worker's score.
    Weighted,
    /// Take the single highest-scored answer.
    BestScore,
}

/// Ensemble configuration attached to an input.
#[derive(Debug, Clone, Default)]
pub struct EnsembleConfig {
    pub workers: Vec<WorkerSpec>,
    pub strategy: ResultStrategy,
}

/// A query plus the working state the strategies read and update. Created by
/// the caller, mutated only by the owning worker.
#[derive(Debug, Clone)]
pub struct Input {
    pub query: Query,
    pub query_type: String,
    /// Explicit route; empty means the route worker chooses.
    pub route: Option<String>,
    pub system_prompt: Option<String>,

    /// Current candidate answer.
    pub answer: String,
    /// Raw assistant text the candidate was extracted from.
    pub answer_raw: String,
    /// Candidate in code form, when applicable.
    pub answer_code: String,
    /// Critic feedback for the improver.
    pub feedback: String,
    /// Last execution error, for retry prompts.
    pub error: String,

    /// Function name expected by code checks.
    pub entry_point: String,
    pub dataset: Option<String>,
    pub cache_plan: Option<PathBuf>,
    pub stream: bool,
    /// Check/improve rounds budget (0 disables checking).
    pub check: u32,
    pub post_processing: PostProcessing,
    pub ensemble: Option<EnsembleConfig>,

    /// Free-form metadata, e.g. test cases for checkers.
    pub metadata: HashMap<String, Value>,
    /// Outputs of completed plan tasks, keyed by output key.
    pub symbols: HashMap<String, Value>,

    pub query_id: Uuid,
}

impl Input {
    pub fn new(query: impl Into<Query>) -> Self {
        Self {
            query: query.into(),
            query_type: String::new(),
            route: None,
            system_prompt: None,
            answer: String::new(),
            answer_raw: String::new(),
            answer_code: String::new(),
            feedback: String::new(),
            error: String::new(),
            entry_point: String::new(),
            dataset: None,
            cache_plan: None,
            stream: false,
            check: 0,
            post_processing: PostProcessing::None,
            ensemble: None,
            metadata: HashMap::new(),
            symbols: HashMap::new(),
            query_id: Uuid::new_v4(),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_check(mut self, rounds: u32) -> Self {
        self.check = rounds;
        self
    }

    pub fn query_text(&self) -> String {
        self.query.as_text()
    }

    /// Record a new candidate produced by a worker.
    pub fn set_candidate(&mut self, answer: impl Into<String>, raw: impl Into<String>) {
        self.answer = answer.into();
        self.answer_raw = raw.into();
    }
}
