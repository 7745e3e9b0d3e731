//! Worker strategies ("minions") and their registry.
//!
//! Every worker implements the same contract: take a mutable [`Input`],
//! consult the [`Brain`], and return an [`AgentResponse`]. Workers are
//! registered by route name in a [`MinionRegistry`]; registration is by
//! explicit `register` calls so tests can build isolated registries.

mod basic;
mod code;
mod ensemble;
pub mod extract;
pub mod input;
mod plan;
pub mod prompts;
mod route;

pub use basic::{CotMinion, DcotMinion, NativeMinion, RawMinion};
pub use code::{CodeMinion, PythonMinion};
pub use ensemble::EnsembleMinion;
pub use input::{EnsembleConfig, Input, ResultStrategy, WorkerSpec};
pub use plan::{PlanMinion, Task, TaskStatus};
pub use route::{ModeratorMinion, RouteMinion};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::action::{AgentResponse, StreamChunk};
use crate::brain::Brain;
use crate::errors::MinionError;

/// A named reasoning strategy.
#[async_trait(?Send)]
pub trait Worker {
    async fn execute(&self, input: &mut Input, brain: &Brain) -> Result<AgentResponse, MinionError>;

    /// Streaming variant; the default runs `execute` and emits nothing.
    async fn execute_stream(
        &self,
        input: &mut Input,
        brain: &Brain,
        _on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        self.execute(input, brain).await
    }
}

pub type WorkerCtor = fn() -> Box<dyn Worker>;

struct RegistryEntry {
    description: String,
    ctor: WorkerCtor,
}

/// Registry mapping route name to worker constructor.
#[derive(Default)]
pub struct MinionRegistry {
    entries: HashMap<String, RegistryEntry>,
    order: Vec<String>,
}

impl MinionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, description: &str, ctor: WorkerCtor) {
        if !self.entries.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                description: description.to_string(),
                ctor,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Worker>> {
        self.entries.get(name).map(|e| (e.ctor)())
    }

    /// (name, description) pairs in registration order, for route prompts.
    /// Meta routes are excluded along with anything in `exclude`.
    pub fn selectable_routes(&self, exclude: &[&str]) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter(|name| {
                !exclude.contains(&name.as_str())
                    && name.as_str() != "route"
                    && name.as_str() != "moderator"
            })
            .map(|name| (name.clone(), self.entries[name].description.clone()))
            .collect()
    }

    /// Find the registered route closest to `name`: exact match, then
    /// containment either way, then the chain-of-thought fallback. Fuzzy
    /// matching never lands on the meta routes.
    pub fn resolve_route(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if self.contains(name) {
            return Some(name.to_string());
        }
        let lowered = name.to_lowercase();
        for candidate in &self.order {
            if candidate == "route" || candidate == "moderator" {
                continue;
            }
            if lowered.contains(candidate.as_str()) || candidate.contains(&lowered) {
                return Some(candidate.clone());
            }
        }
        if self.contains("cot") {
            return Some("cot".to_string());
        }
        None
    }

    /// Registry with the standard strategy set.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(
            "raw",
            "Directly query the model without any prompt processing.",
            || Box::new(RawMinion),
        );
        registry.register(
            "native",
            "Ask the model for an answer with the standard worker prompt.",
            || Box::new(NativeMinion),
        );
        registry.register(
            "cot",
            "Chain of thought: think step by step, best for reasoning problems that need no external data.",
            || Box::new(CotMinion),
        );
        registry.register(
            "dcot",
            "Dynamic chain of thought with self-consistency over several samples.",
            || Box::new(DcotMinion::default()),
        );
        registry.register(
            "python",
            "Write Python code and execute it; best for calculation problems.",
            || Box::new(PythonMinion::default()),
        );
        registry.register(
            "code",
            "Thought/Code/Observation cycles with persistent interpreter state; best for multi-step code tasks.",
            || Box::new(CodeMinion::default()),
        );
        registry.register(
            "plan",
            "Divide and conquer: plan subtasks and solve them in dependency order.",
            || Box::new(PlanMinion::default()),
        );
        registry.register(
            "ensemble",
            "Run several workers and merge their answers with a result strategy.",
            || Box::new(EnsembleMinion),
        );
        registry.register(
            "route",
            "Pick the best strategy for the query, then delegate to it.",
            || Box::new(RouteMinion),
        );
        registry.register(
            "moderator",
            "Top-level worker owning route selection and the check/improve budget.",
            || Box::new(ModeratorMinion),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_routes() {
        let registry = MinionRegistry::standard();
        for route in ["raw", "native", "cot", "dcot", "python", "code", "plan", "ensemble", "route", "moderator"] {
            assert!(registry.contains(route), "missing route {}", route);
        }
    }

    #[test]
    fn test_selectable_routes_exclude_meta() {
        let registry = MinionRegistry::standard();
        let routes = registry.selectable_routes(&["plan"]);
        let names: Vec<&str> = routes.iter().map(|(n, _)| n.as_str()).collect();
        assert!(!names.contains(&"route"));
        assert!(!names.contains(&"moderator"));
        assert!(!names.contains(&"plan"));
        assert!(names.contains(&"cot"));
    }

    #[test]
    fn test_resolve_route_fuzzy() {
        let registry = MinionRegistry::standard();
        assert_eq!(registry.resolve_route("cot").as_deref(), Some("cot"));
        assert_eq!(registry.resolve_route("CotMinion").as_deref(), Some("cot"));
        assert_eq!(registry.resolve_route("unknown-strategy").as_deref(), Some("cot"));
    }

    #[test]
    fn test_isolated_registry() {
        let mut registry = MinionRegistry::new();
        assert!(!registry.contains("raw"));
        registry.register("raw", "raw calls", || Box::new(RawMinion));
        assert!(registry.contains("raw"));
        assert!(registry.create("raw").is_some());
        assert!(registry.create("cot").is_none());
    }
}
