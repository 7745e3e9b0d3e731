//! Long-running agents over the brain, interpreter, and tool surface.
//!
//! An agent owns a [`Brain`], a tool list, optional tool collections
//! (skills, MCP), per-agent state, and the context-management knobs. The
//! lifecycle is `setup()` -> repeated steps under `run()` -> `close()`;
//! `Agent::create` combines construction and setup.

mod context;
mod state;

pub use context::{
    auto_compact, auto_decay, estimate_tokens, CompactOutcome, CompactPolicy, DecayPolicy,
    SUMMARY_LABEL,
};
pub use state::{AgentState, DecayMarker};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::action::{AgentResponse, ChunkType, StreamChunk};
use crate::brain::{Brain, StepRequest};
use crate::errors::MinionError;
use crate::memory::Memory;
use crate::schema::Query;
use crate::tools::{
    convert_callable, LoadToolTool, LoadedSink, RawCallable, Tool, ToolCollection, ToolRegistry,
    ToolSearchTool,
};
use crate::workers::Input;

/// Context-management and loop knobs for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub context_window: usize,
    pub auto_compact_threshold: f64,
    pub auto_compact_keep_recent: usize,
    pub decay_min_size: usize,
    pub decay_ttl_steps: usize,
    /// Default route when neither the run call nor the input names one.
    pub default_route: Option<String>,
    /// Decay cache directory; a temp dir per agent when unset.
    pub cache_dir: Option<PathBuf>,
    /// Model alias used for compaction summaries; the default provider
    /// otherwise.
    pub compact_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let defaults = crate::config::AgentDefaults::default();
        Self {
            max_steps: defaults.max_steps,
            context_window: defaults.context_window,
            auto_compact_threshold: defaults.auto_compact_threshold,
            auto_compact_keep_recent: defaults.auto_compact_keep_recent,
            decay_min_size: defaults.decay_min_size,
            decay_ttl_steps: defaults.decay_ttl_steps,
            default_route: None,
            cache_dir: None,
            compact_model: None,
        }
    }
}

impl AgentConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let agent = config.agent();
        Self {
            max_steps: agent.max_steps,
            context_window: agent.context_window,
            auto_compact_threshold: agent.auto_compact_threshold,
            auto_compact_keep_recent: agent.auto_compact_keep_recent,
            decay_min_size: agent.decay_min_size,
            decay_ttl_steps: agent.decay_ttl_steps,
            default_route: None,
            cache_dir: None,
            compact_model: agent.compact_model.clone(),
        }
    }
}

/// Base agent driving Thought/Code/Observation steps with context
/// management.
pub struct BaseAgent {
    brain: Brain,
    config: AgentConfig,
    raw_callables: Vec<RawCallable>,
    collections: Vec<Box<dyn ToolCollection>>,
    pub memory: Memory,
    cache_dir: PathBuf,
    owns_cache_dir: bool,
    set_up: bool,
    closed: bool,
    /// Tools loaded at runtime through `load_tool` land here.
    loaded_sink: LoadedSink,
    skill_instructions: Vec<String>,
}

impl BaseAgent {
    pub fn new(brain: Brain, config: AgentConfig) -> Self {
        let (cache_dir, owns_cache_dir) = match &config.cache_dir {
            Some(dir) => (dir.clone(), false),
            None => (
                std::env::temp_dir().join(format!("minion-agent-{}", uuid::Uuid::new_v4())),
                true,
            ),
        };
        Self {
            brain,
            config,
            raw_callables: Vec::new(),
            collections: Vec::new(),
            memory: Memory::default(),
            cache_dir,
            owns_cache_dir,
            set_up: false,
            closed: false,
            loaded_sink: Arc::new(Mutex::new(Vec::new())),
            skill_instructions: Vec::new(),
        }
    }

    /// Construct and set up in one call.
    pub async fn create(brain: Brain, config: AgentConfig) -> Result<Self, MinionError> {
        let mut agent = Self::new(brain, config);
        agent.setup().await?;
        Ok(agent)
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.brain.add_tool(tool);
    }

    /// Register a raw callable; it is converted to a tool during setup.
    pub fn add_raw_callable(&mut self, raw: RawCallable) {
        self.raw_callables.push(raw);
    }

    pub fn add_collection(&mut self, collection: Box<dyn ToolCollection>) {
        self.collections.push(collection);
    }

    /// Enable dynamic tool discovery over a registry: installs the
    /// `tool_search` and `load_tool` meta-tools.
    pub fn with_tool_registry(&mut self, registry: Arc<RwLock<ToolRegistry>>) {
        self.brain
            .add_tool(Arc::new(ToolSearchTool::new(registry.clone())));
        self.brain
            .add_tool(Arc::new(LoadToolTool::new(registry, self.loaded_sink.clone())));
    }

    /// Idempotent setup: collections, callable conversion, skill injection.
    pub async fn setup(&mut self) -> Result<(), MinionError> {
        if self.set_up {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| MinionError::Config(format!("cannot create cache dir: {}", e)))?;

        // 1. collections
        for collection in &mut self.collections {
            collection
                .setup()
                .await
                .map_err(|e| MinionError::Config(format!("collection setup failed: {}", e)))?;
            for tool in collection.tools() {
                self.brain.add_tool(tool);
            }
            if let Some(instructions) = collection.instructions() {
                self.skill_instructions.push(instructions);
            }
        }

        // 2. raw callables become tools; failures are logged and skipped
        for raw in self.raw_callables.drain(..) {
            if let Some(tool) = convert_callable(raw) {
                self.brain.add_tool(tool);
            }
        }

        // 3. tool surface and skill scripts land in the interpreter
        {
            let mut interpreter = self.brain.interpreter().lock().await;
            interpreter.send_tools(self.brain.tools());
            for collection in &self.collections {
                for skill in collection.skills() {
                    for (name, source) in &skill.scripts {
                        let outcome = interpreter.run(source).await;
                        if let Some(error) = outcome.error {
                            tracing::warn!(
                                skill = %skill.name,
                                script = %name,
                                error = %error,
                                "skill script failed to load"
                            );
                        }
                    }
                }
            }
        }

        self.set_up = true;
        Ok(())
    }

    fn enhanced_system_prompt(&self, base: Option<&str>) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();
        if let Some(base) = base {
            sections.push(base.to_string());
        }
        if !self.skill_instructions.is_empty() {
            sections.push(self.skill_instructions.join("\n\n---\n\n"));
        }
        let tools = self.brain.tools();
        if !tools.is_empty() {
            let listing: Vec<String> = tools
                .iter()
                .map(|t| format!("- {}: {}", t.name(), t.description()))
                .collect();
            sections.push(format!("Available tools:\n{}", listing.join("\n")));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Drain tools loaded via `load_tool` into the brain and interpreter.
    /// Runs automatically after each step; callable directly by embedders
    /// that dispatch meta-tools themselves.
    pub async fn absorb_loaded_tools(&mut self) {
        let loaded: Vec<Arc<dyn Tool>> = self.loaded_sink.lock().unwrap().drain(..).collect();
        if loaded.is_empty() {
            return;
        }
        let mut interpreter = self.brain.interpreter().lock().await;
        interpreter.send_tools(loaded.clone());
        drop(interpreter);
        for tool in loaded {
            tracing::info!(tool = %tool.name(), "tool injected into agent surface");
            self.brain.add_tool(tool);
        }
    }

    /// One step: compact before, delegate to the brain, merge messages,
    /// decay after.
    pub async fn execute_step(
        &mut self,
        state: &mut AgentState,
        route_override: Option<&str>,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        // compaction ensures the next call fits
        let compact_policy = CompactPolicy {
            context_window: self.config.context_window,
            threshold: self.config.auto_compact_threshold,
            keep_recent: self.config.auto_compact_keep_recent,
        };
        let compact_provider = self
            .config
            .compact_model
            .as_deref()
            .and_then(|alias| self.brain.provider_for(alias))
            .unwrap_or_else(|| self.brain.provider());
        match auto_compact(state, compact_provider.as_ref(), &compact_policy).await {
            CompactOutcome::Failed(reason) => {
                on_chunk(StreamChunk::warning(format!("auto-compact failed: {}", reason)));
            }
            CompactOutcome::Compacted { summarized_messages } => {
                tracing::info!(summarized = summarized_messages, "pre-step compaction applied");
            }
            CompactOutcome::NotNeeded => {}
        }

        // route precedence: run arg > input.route > agent default
        let route = route_override
            .map(str::to_string)
            .or_else(|| state.input.route.clone())
            .or_else(|| self.config.default_route.clone());

        let build_request = |agent: &Self, state: &AgentState, route: Option<String>| {
            let mut request = StepRequest::query(state.input.query.clone());
            request.query_type = state.input.query_type.clone();
            request.route = route;
            request.system_prompt =
                agent.enhanced_system_prompt(state.input.system_prompt.as_deref());
            request.check = state.input.check;
            request.metadata = state.input.metadata.clone();
            request.ensemble = state.input.ensemble.clone();
            request
        };

        let request = build_request(self, state, route.clone());
        let attempt = if state.input.stream {
            self.brain.step_stream(request, on_chunk).await
        } else {
            self.brain.step(request).await
        };
        let result = match attempt {
            Ok(result) => result,
            // a context overflow gets one forced compaction and one retry
            Err(MinionError::Provider(e))
                if e.kind == crate::provider::LlmErrorKind::ContextOverflow =>
            {
                tracing::warn!("provider rejected context, forcing compaction and retrying");
                let force = CompactPolicy {
                    threshold: 0.0,
                    ..compact_policy
                };
                if matches!(
                    auto_compact(state, compact_provider.as_ref(), &force).await,
                    CompactOutcome::Failed(_)
                ) {
                    return Err(MinionError::Provider(e));
                }
                let retry_request = build_request(self, state, route);
                self.brain.step(retry_request).await?
            }
            Err(e) => return Err(e),
        };

        state.push_messages(result.response.messages.clone());
        state.step_count += 1;
        state.score = result.score;
        state.input.answer = result.answer.clone();
        state.done = result.terminated || state.step_count >= self.config.max_steps;

        self.memory.append_episodic(serde_json::json!({
            "step": state.step_count,
            "answer": result.answer,
            "score": result.score,
        }));

        self.absorb_loaded_tools().await;

        // decay prunes what just arrived, if large and old enough
        let decay_policy = DecayPolicy {
            min_size: self.config.decay_min_size,
            ttl_steps: self.config.decay_ttl_steps,
        };
        if let Err(e) = auto_decay(state, &self.cache_dir, &decay_policy).await {
            tracing::warn!(error = %e, "auto-decay pass failed");
        }

        Ok(result.response)
    }

    /// Drive steps until the task terminates or `max_steps` is reached.
    ///
    /// Cancellation-safe: dropping the future between awaits dispatches no
    /// further tool calls; `close()` still releases collections and cache.
    pub async fn run(
        &mut self,
        task: impl Into<Query>,
        state: Option<AgentState>,
        max_steps: Option<usize>,
        route: Option<&str>,
    ) -> Result<AgentResponse, MinionError> {
        self.run_with_chunks(task, state, max_steps, route, &mut |_| {}).await
    }

    pub async fn run_with_chunks(
        &mut self,
        task: impl Into<Query>,
        state: Option<AgentState>,
        max_steps: Option<usize>,
        route: Option<&str>,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<AgentResponse, MinionError> {
        if !self.set_up {
            self.setup().await?;
        }
        if self.closed {
            return Err(MinionError::Config("agent is closed".to_string()));
        }

        let mut state = state.unwrap_or_else(|| AgentState::new(Input::new(task.into())));
        let max_steps = max_steps.unwrap_or(self.config.max_steps);

        let mut last_response = AgentResponse::default();
        while !state.done {
            on_chunk(
                StreamChunk::new(ChunkType::StepStart, "")
                    .with_meta("step", serde_json::json!(state.step_count + 1)),
            );
            match self.execute_step(&mut state, route, on_chunk).await {
                Ok(response) => {
                    last_response = response;
                }
                Err(e) => {
                    on_chunk(StreamChunk::error(format!("{}: {}", e.kind(), e)));
                    return Err(e);
                }
            }
            on_chunk(StreamChunk::new(ChunkType::StepEnd, ""));
            // the run-level step budget overrides the agent default
            state.done = last_response.terminated || state.step_count >= max_steps;
            if state.done && !last_response.terminated {
                last_response.truncated = true;
            }
        }

        last_response.messages = state.messages.clone();
        Ok(last_response)
    }

    /// Release collections and decay cache files. Best-effort; idempotent.
    pub async fn close(&mut self) -> Result<(), MinionError> {
        if self.closed {
            return Ok(());
        }
        for collection in &mut self.collections {
            if let Err(e) = collection.close().await {
                tracing::warn!(collection = %collection.name(), error = %e, "collection close failed");
            }
        }
        if self.owns_cache_dir {
            context::cleanup_cache_dir(&self.cache_dir).await;
        }
        self.closed = true;
        Ok(())
    }
}

/// Code-oriented agent: identical to [`BaseAgent`] but defaulting to the
/// `code` route.
pub struct CodeAgent;

impl CodeAgent {
    pub fn new(brain: Brain, mut config: AgentConfig) -> BaseAgent {
        config.default_route.get_or_insert_with(|| "code".to_string());
        BaseAgent::new(brain, config)
    }

    pub async fn create(brain: Brain, config: AgentConfig) -> Result<BaseAgent, MinionError> {
        let mut agent = Self::new(brain, config);
        agent.setup().await?;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::tools::{FnTool, ToolInfo, ToolParam};

    fn scripted_brain(responses: &[&str]) -> (Arc<ScriptedProvider>, Brain) {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        for response in responses {
            provider.push_text(*response);
        }
        (provider.clone(), Brain::with_provider(provider))
    }

    #[tokio::test]
    async fn test_agent_lifecycle() {
        let (_, brain) = scripted_brain(&["Final answer: done"]);
        let mut agent = BaseAgent::create(brain, AgentConfig::default()).await.unwrap();
        let response = agent.run("do the thing", None, None, Some("cot")).await.unwrap();
        assert_eq!(response.answer, "done");
        agent.close().await.unwrap();
        assert!(agent.run("again", None, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let (_, brain) = scripted_brain(&[]);
        let mut agent = BaseAgent::new(brain, AgentConfig::default());
        agent.setup().await.unwrap();
        agent.setup().await.unwrap();
    }

    #[tokio::test]
    async fn test_route_precedence_run_arg_wins() {
        let (provider, brain) = scripted_brain(&[
            // cot route responds directly; if input.route (python) had won,
            // the reply would have been interpreted as code
            "Final answer: via-cot",
        ]);
        let mut config = AgentConfig::default();
        config.default_route = Some("raw".to_string());
        let mut agent = BaseAgent::create(brain, config).await.unwrap();

        let mut state = AgentState::new(Input::new("q").with_route("python"));
        state.input.check = 0;
        let response = agent
            .run_with_chunks("q", Some(state), None, Some("cot"), &mut |_| {})
            .await
            .unwrap();
        assert_eq!(response.answer, "via-cot");
        // exactly one provider call: the cot worker, no route selection call
        assert_eq!(provider.recorded_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_code_agent_defaults_to_code_route() {
        let (_, brain) = scripted_brain(&["```python\nfinal_answer(6 * 7)\n```<end_code>"]);
        let mut agent = CodeAgent::create(brain, AgentConfig::default()).await.unwrap();
        let response = agent.run("six times seven", None, None, None).await.unwrap();
        assert_eq!(response.answer, "42");
    }

    #[tokio::test]
    async fn test_raw_callable_conversion_at_setup() {
        let (_, brain) = scripted_brain(&[]);
        let mut agent = BaseAgent::new(brain, AgentConfig::default());
        agent.add_raw_callable(RawCallable::sync(
            "shout",
            "Uppercase the input.",
            vec![ToolParam::required("s", "string", "text")],
            Arc::new(|args| {
                Ok(serde_json::json!(args["s"].as_str().unwrap_or("").to_uppercase()))
            }),
        ));
        agent.setup().await.unwrap();
        assert!(agent.brain().tools().iter().any(|t| t.name() == "shout"));
    }

    #[tokio::test]
    async fn test_dynamic_tool_loading_flows_into_interpreter() {
        let (_, brain) = scripted_brain(&[]);
        let mut agent = BaseAgent::new(brain, AgentConfig::default());

        let mut registry = ToolRegistry::new();
        registry.register_factory(
            ToolInfo {
                name: "github.create_pull_request".to_string(),
                description: "Create a pull request".to_string(),
                parameters: vec![],
                category: "github".to_string(),
            },
            Box::new(|| {
                Ok(Arc::new(FnTool::new(
                    "github.create_pull_request",
                    "Create a pull request",
                    vec![ToolParam::required("repo", "string", "repository")],
                    Arc::new(|args| Ok(serde_json::json!(format!("pr on {}", args["repo"].as_str().unwrap_or(""))))),
                )) as Arc<dyn Tool>)
            }),
        );
        let registry = Arc::new(RwLock::new(registry));
        agent.with_tool_registry(registry);
        agent.setup().await.unwrap();

        // simulate the model calling load_tool during a step
        let load_tool = agent
            .brain()
            .tools()
            .into_iter()
            .find(|t| t.name() == "load_tool")
            .unwrap();
        load_tool
            .call(serde_json::json!({"tool_name": "github.create_pull_request"}))
            .await
            .unwrap();
        agent.absorb_loaded_tools().await;

        // the loaded tool is callable inside the interpreter by its
        // sanitized name
        let mut interpreter = agent.brain().interpreter().lock().await;
        let outcome = interpreter
            .run("github_create_pull_request(repo='o/r')")
            .await;
        assert!(!outcome.is_error(), "{:?}", outcome.error);
        assert_eq!(outcome.value, serde_json::json!("pr on o/r"));
    }

    #[tokio::test]
    async fn test_system_prompt_enhanced_with_tools() {
        let (_, brain) = scripted_brain(&[]);
        let mut agent = BaseAgent::new(brain, AgentConfig::default());
        agent.add_tool(Arc::new(FnTool::new(
            "lookup",
            "Look things up.",
            vec![],
            Arc::new(|_| Ok(serde_json::Value::Null)),
        )));
        let prompt = agent.enhanced_system_prompt(Some("base rules")).unwrap();
        assert!(prompt.starts_with("base rules"));
        assert!(prompt.contains("- lookup: Look things up."));
    }
}
