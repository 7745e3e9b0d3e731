//! Tool surface shared by the interpreter, the action node, and agents.
//!
//! A tool is a named callable with a declared schema, exposed both to the
//! LLM (as a function definition) and to the sandboxed interpreter (as a
//! callable in the namespace). Sync callables are adapted onto a blocking
//! executor; async callables suspend naturally.

mod collections;
mod convert;
mod meta;
mod registry;
mod search;
mod skills;

pub use collections::{McpCollection, McpToolSpec, McpTransport, ToolCollection};
pub use convert::{convert_callable, RawCallable, RawCallableKind};
pub use meta::{LoadToolTool, LoadedSink, ToolSearchTool};
pub use registry::{RegistryStats, ToolRegistry};
pub use search::{search_tools, SearchStrategy};
pub use skills::{Skill, SkillCollection};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{FunctionDefinition, ToolDefinition};

/// Declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParam {
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            optional: false,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            optional: true,
            default: Some(default),
        }
    }
}

/// Lightweight tool metadata for search without instantiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParam>,
    #[serde(default)]
    pub category: String,
}

impl ToolInfo {
    /// Compact representation returned to the LLM from `tool_search`.
    pub fn to_summary(&self) -> Value {
        let description: String = self.description.chars().take(200).collect();
        serde_json::json!({
            "name": self.name,
            "description": description,
            "parameters": self.parameters.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
            "category": self.category,
        })
    }
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// Declared parameters in order.
    fn inputs(&self) -> Vec<ToolParam>;

    /// Declared output type.
    fn output_type(&self) -> &str {
        "string"
    }

    /// Optional category used for registry search filtering.
    fn category(&self) -> &str {
        ""
    }

    /// Execute the tool with JSON arguments keyed by parameter name.
    async fn call(&self, args: Value) -> anyhow::Result<Value>;

    /// Render the provider-facing function definition.
    fn definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in self.inputs() {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if !param.optional {
                required.push(Value::String(param.name));
            }
        }
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            },
        }
    }

    /// Lightweight metadata for search indexing.
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.inputs(),
            category: self.category().to_string(),
        }
    }
}

/// Replace characters that are not valid in a Python identifier.
pub fn sanitize_tool_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

pub type SyncToolFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;
pub type AsyncToolFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Tool backed by a synchronous closure, executed on the blocking pool so it
/// cannot stall the event loop.
pub struct FnTool {
    name: String,
    description: String,
    inputs: Vec<ToolParam>,
    output_type: String,
    category: String,
    f: SyncToolFn,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        inputs: Vec<ToolParam>,
        f: SyncToolFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs,
            output_type: "string".to_string(),
            category: String::new(),
            f,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_output_type(mut self, output_type: impl Into<String>) -> Self {
        self.output_type = output_type.into();
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn inputs(&self) -> Vec<ToolParam> {
        self.inputs.clone()
    }

    fn output_type(&self) -> &str {
        &self.output_type
    }

    fn category(&self) -> &str {
        &self.category
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let f = self.f.clone();
        // a sync tool must not block the cooperative loop
        match tokio::runtime::Handle::try_current() {
            Ok(_) => tokio::task::spawn_blocking(move || f(args)).await?,
            Err(_) => f(args),
        }
    }
}

/// Tool backed by an async closure.
pub struct AsyncFnTool {
    name: String,
    description: String,
    inputs: Vec<ToolParam>,
    output_type: String,
    category: String,
    f: AsyncToolFn,
}

impl AsyncFnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        inputs: Vec<ToolParam>,
        f: AsyncToolFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs,
            output_type: "string".to_string(),
            category: String::new(),
            f,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

#[async_trait]
impl Tool for AsyncFnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn inputs(&self) -> Vec<ToolParam> {
        self.inputs.clone()
    }

    fn output_type(&self) -> &str {
        &self.output_type
    }

    fn category(&self) -> &str {
        &self.category
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        (self.f)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_schema() {
        let tool = FnTool::new(
            "adder",
            "adds two numbers",
            vec![
                ToolParam::required("a", "integer", "first"),
                ToolParam::optional("b", "integer", "second", serde_json::json!(0)),
            ],
            Arc::new(|_| Ok(Value::Null)),
        );
        let def = tool.definition();
        assert_eq!(def.function.name, "adder");
        assert_eq!(def.function.parameters["required"], serde_json::json!(["a"]));
        assert_eq!(def.function.parameters["properties"]["b"]["type"], "integer");
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(sanitize_tool_name("github.create-pull"), "github_create_pull");
    }

    #[tokio::test]
    async fn test_fn_tool_runs_on_blocking_pool() {
        let tool = FnTool::new(
            "slow",
            "sleeps briefly",
            vec![],
            Arc::new(|_| {
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(serde_json::json!("done"))
            }),
        );
        let result = tool.call(serde_json::json!({})).await.unwrap();
        assert_eq!(result, serde_json::json!("done"));
    }
}
