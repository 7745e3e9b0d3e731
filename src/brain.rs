//! Brain: the entry-point orchestrator.
//!
//! Owns process-wide configuration, the provider map, the worker registry,
//! the shared tool surface, and the sandboxed interpreter. A call to
//! [`Brain::step`] wraps the query into an [`Input`] and delegates to the
//! moderator worker, returning one answer.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::action::{AgentResponse, StreamChunk};
use crate::check::CheckConfig;
use crate::config::Config;
use crate::errors::MinionError;
use crate::interpreter::AsyncPythonExecutor;
use crate::provider::LlmProvider;
use crate::schema::Query;
use crate::tools::Tool;
use crate::workers::{Input, MinionRegistry, ModeratorMinion, Worker};

/// Arguments for one reasoning step.
#[derive(Default)]
pub struct StepRequest {
    pub query: Option<Query>,
    pub query_type: String,
    pub route: Option<String>,
    pub system_prompt: Option<String>,
    pub stream: bool,
    /// Check/improve rounds for this step.
    pub check: u32,
    pub dataset: Option<String>,
    pub cache_plan: Option<std::path::PathBuf>,
    pub ensemble: Option<crate::workers::EnsembleConfig>,
    pub metadata: HashMap<String, Value>,
}

impl StepRequest {
    pub fn query(query: impl Into<Query>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
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

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of one step: the answer plus the usual termination flags.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub answer: String,
    pub score: f64,
    pub terminated: bool,
    pub truncated: bool,
    /// The full worker response, including cost and route info.
    pub response: AgentResponse,
}

pub struct Brain {
    config: Config,
    default_provider: Arc<dyn LlmProvider>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    registry: MinionRegistry,
    tools: Vec<Arc<dyn Tool>>,
    interpreter: Mutex<AsyncPythonExecutor>,
    check_config: CheckConfig,
}

impl Brain {
    /// Brain with defaults: standard registry, empty tool surface, fresh
    /// interpreter.
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: Arc<dyn LlmProvider>) -> BrainBuilder {
        BrainBuilder {
            config: Config::default(),
            default_provider: provider,
            providers: HashMap::new(),
            registry: None,
            tools: Vec::new(),
            additional_authorized_imports: Vec::new(),
            check_config: None,
        }
    }

    /// The default provider.
    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        self.default_provider.clone()
    }

    /// A named provider from the model registry.
    pub fn provider_for(&self, alias: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(alias).cloned()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &MinionRegistry {
        &self.registry
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// The shared sandboxed interpreter.
    pub fn interpreter(&self) -> &Mutex<AsyncPythonExecutor> {
        &self.interpreter
    }

    pub fn check_config(&self) -> &CheckConfig {
        &self.check_config
    }

    fn build_input(&self, request: StepRequest) -> Result<Input, MinionError> {
        let query = request
            .query
            .ok_or_else(|| MinionError::Config("step requires a query".to_string()))?;
        let mut input = Input::new(query);
        input.query_type = request.query_type;
        input.route = request.route;
        input.system_prompt = request.system_prompt;
        input.stream = request.stream;
        input.check = request.check;
        input.dataset = request.dataset;
        input.cache_plan = request.cache_plan;
        input.ensemble = request.ensemble;
        input.metadata = request.metadata;
        Ok(input)
    }

    /// Run one reasoning step.
    pub async fn step(&self, request: StepRequest) -> Result<StepResult, MinionError> {
        let mut input = self.build_input(request)?;
        tracing::info!(query_id = %input.query_id, route = ?input.route, "brain step starting");

        let response = ModeratorMinion.execute(&mut input, self).await?;

        tracing::info!(
            query_id = %input.query_id,
            score = response.score,
            terminated = response.terminated,
            "brain step finished"
        );
        Ok(StepResult {
            answer: response.answer.clone(),
            score: response.score,
            terminated: response.terminated,
            truncated: response.truncated,
            response,
        })
    }

    /// Run one reasoning step, forwarding stream chunks as they arrive.
    pub async fn step_stream(
        &self,
        request: StepRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<StepResult, MinionError> {
        let mut input = self.build_input(request)?;
        input.stream = true;
        let response = ModeratorMinion.execute_stream(&mut input, self, on_chunk).await?;
        Ok(StepResult {
            answer: response.answer.clone(),
            score: response.score,
            terminated: response.terminated,
            truncated: response.truncated,
            response,
        })
    }
}

pub struct BrainBuilder {
    config: Config,
    default_provider: Arc<dyn LlmProvider>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    registry: Option<MinionRegistry>,
    tools: Vec<Arc<dyn Tool>>,
    additional_authorized_imports: Vec<String>,
    check_config: Option<CheckConfig>,
}

impl BrainBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register a provider under a model alias.
    pub fn provider(mut self, alias: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(alias.into(), provider);
        self
    }

    pub fn registry(mut self, registry: MinionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn additional_authorized_imports(mut self, imports: Vec<String>) -> Self {
        self.additional_authorized_imports = imports;
        self
    }

    pub fn check_config(mut self, check_config: CheckConfig) -> Self {
        self.check_config = Some(check_config);
        self
    }

    pub fn build(self) -> Brain {
        let check_config = self.check_config.unwrap_or_else(|| {
            let defaults = self.config.check();
            CheckConfig {
                max_improve_rounds: defaults.max_improve_rounds,
                acceptance_threshold: defaults.acceptance_threshold,
                numeric_tolerance: defaults.numeric_tolerance,
            }
        });
        let mut interpreter = AsyncPythonExecutor::new(self.additional_authorized_imports);
        interpreter.send_tools(self.tools.clone());
        Brain {
            config: self.config,
            default_provider: self.default_provider,
            providers: self.providers,
            registry: self.registry.unwrap_or_else(MinionRegistry::standard),
            tools: self.tools,
            interpreter: Mutex::new(interpreter),
            check_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    #[tokio::test]
    async fn test_step_returns_answer_tuple() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text("Final answer: 4");
        let brain = Brain::with_provider(provider);

        let result = brain
            .step(StepRequest::query("2+2?").with_route("cot"))
            .await
            .unwrap();
        assert_eq!(result.answer, "4");
        assert!(result.terminated);
        assert!(!result.truncated);
        assert!(result.response.cost.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_step_requires_query() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        let brain = Brain::with_provider(provider);
        assert!(brain.step(StepRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_code_route_uses_interpreter() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text("Thought: multiply.\n```python\nfinal_answer(234 * 568)\n```<end_code>");
        let brain = Brain::with_provider(provider);

        let result = brain
            .step(StepRequest::query("what's the solution 234*568").with_route("code"))
            .await
            .unwrap();
        assert_eq!(result.answer, "132912");
        assert!(result.terminated);
        assert!(result.response.is_final_answer);
    }

    #[tokio::test]
    async fn test_named_providers() {
        let main = Arc::new(ScriptedProvider::new("gpt-4o"));
        let cheap = Arc::new(ScriptedProvider::new("gpt-4o-mini"));
        let brain = Brain::builder(main).provider("cheap", cheap).build();
        assert!(brain.provider_for("cheap").is_some());
        assert!(brain.provider_for("missing").is_none());
    }
}
