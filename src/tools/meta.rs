//! Meta-tools for dynamic discovery over a large registry.
//!
//! `tool_search` returns lightweight summaries without instantiating
//! anything; `load_tool` forces construction through the registry and hands
//! the tool to the owning agent through a shared sink, under a Python-safe
//! name.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{sanitize_tool_name, search_tools, SearchStrategy, Tool, ToolParam, ToolRegistry};

/// Tools loaded by `load_tool` land here; the owning agent drains the sink
/// after each step and injects the tools into its interpreter and tool set.
pub type LoadedSink = Arc<Mutex<Vec<Arc<dyn Tool>>>>;

/// Search the registry for tools matching a query.
pub struct ToolSearchTool {
    registry: Arc<RwLock<ToolRegistry>>,
}

impl ToolSearchTool {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ToolSearchTool {
    fn name(&self) -> &str {
        "tool_search"
    }

    fn description(&self) -> &str {
        "Search the tool registry for tools matching a query. Returns lightweight tool summaries; use load_tool to make a tool callable."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("query", "string", "Search query"),
            ToolParam::optional(
                "strategy",
                "string",
                "Search strategy: keyword, regex, or bm25",
                Value::String("keyword".to_string()),
            ),
            ToolParam::optional("top_k", "integer", "Maximum results", Value::from(5)),
            ToolParam::optional(
                "category",
                "string",
                "Restrict results to one category",
                Value::Null,
            ),
        ]
    }

    fn output_type(&self) -> &str {
        "array"
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'query' argument"))?;
        let strategy: SearchStrategy = args["strategy"]
            .as_str()
            .unwrap_or("keyword")
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let top_k = args["top_k"].as_u64().unwrap_or(5) as usize;
        let category = args["category"].as_str().filter(|c| !c.is_empty());

        let infos = self.registry.read().unwrap().infos();
        let results = search_tools(query, &infos, strategy, top_k, category);
        tracing::debug!(query = %query, hits = results.len(), "tool search");
        Ok(Value::Array(results.iter().map(|t| t.to_summary()).collect()))
    }
}

/// Force a deferred tool to load and expose it to the owning agent.
pub struct LoadToolTool {
    registry: Arc<RwLock<ToolRegistry>>,
    loaded: LoadedSink,
}

impl LoadToolTool {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, loaded: LoadedSink) -> Self {
        Self { registry, loaded }
    }
}

#[async_trait]
impl Tool for LoadToolTool {
    fn name(&self) -> &str {
        "load_tool"
    }

    fn description(&self) -> &str {
        "Load a tool from the registry by name so it becomes callable in generated code under its Python-safe name."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "tool_name",
            "string",
            "Registry name of the tool to load",
        )]
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let tool_name = args["tool_name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'tool_name' argument"))?;
        let tool = self.registry.write().unwrap().load_tool(tool_name)?;
        let callable_name = sanitize_tool_name(tool.name());
        self.loaded.lock().unwrap().push(tool);
        tracing::info!(tool = %tool_name, callable = %callable_name, "tool loaded");
        Ok(serde_json::json!({
            "loaded": tool_name,
            "callable_as": callable_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ToolInfo};

    fn registry_with_deferred() -> Arc<RwLock<ToolRegistry>> {
        let mut registry = ToolRegistry::new();
        for (name, description, category) in [
            ("github.create_pull_request", "Create a pull request", "github"),
            ("slack.send_message", "Send a Slack message", "slack"),
            ("jira.create_ticket", "Create a Jira ticket", "jira"),
        ] {
            let owned = name.to_string();
            registry.register_factory(
                ToolInfo {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters: vec![],
                    category: category.to_string(),
                },
                Box::new(move || {
                    Ok(Arc::new(FnTool::new(
                        owned,
                        "constructed",
                        vec![],
                        Arc::new(|_| Ok(Value::Null)),
                    )) as Arc<dyn Tool>)
                }),
            );
        }
        Arc::new(RwLock::new(registry))
    }

    #[tokio::test]
    async fn test_search_does_not_instantiate() {
        let registry = registry_with_deferred();
        let search = ToolSearchTool::new(registry.clone());
        let result = search
            .call(serde_json::json!({"query": "pull request", "strategy": "keyword"}))
            .await
            .unwrap();
        let hits = result.as_array().unwrap();
        assert_eq!(hits[0]["name"], "github.create_pull_request");
        assert_eq!(registry.read().unwrap().get_stats().loaded, 0);
    }

    #[tokio::test]
    async fn test_load_tool_pushes_to_sink() {
        let registry = registry_with_deferred();
        let sink: LoadedSink = Arc::new(Mutex::new(Vec::new()));
        let loader = LoadToolTool::new(registry.clone(), sink.clone());
        let result = loader
            .call(serde_json::json!({"tool_name": "github.create_pull_request"}))
            .await
            .unwrap();
        assert_eq!(result["callable_as"], "github_create_pull_request");
        assert_eq!(sink.lock().unwrap().len(), 1);
        assert_eq!(registry.read().unwrap().get_stats().loaded, 1);
    }

    #[tokio::test]
    async fn test_load_unknown_tool_fails() {
        let registry = registry_with_deferred();
        let sink: LoadedSink = Arc::new(Mutex::new(Vec::new()));
        let loader = LoadToolTool::new(registry, sink);
        assert!(loader
            .call(serde_json::json!({"tool_name": "nope"}))
            .await
            .is_err());
    }
}
