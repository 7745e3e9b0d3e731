//! External tool collections with a setup/close lifecycle.
//!
//! A collection adapts a remote source of tools (an MCP server, a skill
//! directory) to the local tool surface. Setup must complete before tools
//! are exposed; with `ignore_setup_errors` a failing collection is marked
//! unhealthy instead of failing the agent. Closed or unhealthy collections
//! reject all tool calls.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolParam};

const STATE_NEW: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_UNHEALTHY: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Lifecycle of an external tool collection.
#[async_trait]
pub trait ToolCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Connect and enumerate tools. Idempotent.
    async fn setup(&mut self) -> anyhow::Result<()>;

    /// Tools exposed by this collection; empty until setup succeeds.
    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    /// Instructions this collection contributes to the system prompt.
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Skills bundled by this collection, if any; their scripts are injected
    /// into the interpreter at agent setup.
    fn skills(&self) -> &[super::Skill] {
        &[]
    }

    fn is_healthy(&self) -> bool;

    /// Release the underlying source. Tools become uncallable.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Tool description reported by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool input (object with properties/required).
    pub input_schema: Value,
}

/// Transport to an MCP server (stdio, SSE, streamable HTTP). Concrete
/// transports are external collaborators; the core only needs this contract.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolSpec>>;
    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<Value>;
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Collection of tools served by one MCP server.
pub struct McpCollection {
    name: String,
    transport: Arc<dyn McpTransport>,
    state: Arc<AtomicU8>,
    tools: Vec<Arc<dyn Tool>>,
    ignore_setup_errors: bool,
}

impl McpCollection {
    pub fn new(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            state: Arc::new(AtomicU8::new(STATE_NEW)),
            tools: Vec::new(),
            ignore_setup_errors: false,
        }
    }

    pub fn with_ignore_setup_errors(mut self, ignore: bool) -> Self {
        self.ignore_setup_errors = ignore;
        self
    }
}

#[async_trait]
impl ToolCollection for McpCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self) -> anyhow::Result<()> {
        if self.state.load(Ordering::SeqCst) == STATE_READY {
            return Ok(());
        }
        let outcome = async {
            self.transport.initialize().await?;
            self.transport.list_tools().await
        }
        .await;

        match outcome {
            Ok(specs) => {
                self.tools = specs
                    .into_iter()
                    .map(|spec| {
                        Arc::new(McpTool {
                            spec,
                            transport: self.transport.clone(),
                            state: self.state.clone(),
                        }) as Arc<dyn Tool>
                    })
                    .collect();
                self.state.store(STATE_READY, Ordering::SeqCst);
                tracing::info!(collection = %self.name, tools = self.tools.len(), "MCP collection ready");
                Ok(())
            }
            Err(e) => {
                self.state.store(STATE_UNHEALTHY, Ordering::SeqCst);
                if self.ignore_setup_errors {
                    tracing::warn!(collection = %self.name, error = %e, "MCP setup failed, collection disabled");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        if self.state.load(Ordering::SeqCst) == STATE_READY {
            self.tools.clone()
        } else {
            Vec::new()
        }
    }

    fn is_healthy(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_READY
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if previous == STATE_READY {
            self.transport.shutdown().await?;
        }
        Ok(())
    }
}

struct McpTool {
    spec: McpToolSpec,
    transport: Arc<dyn McpTransport>,
    state: Arc<AtomicU8>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn inputs(&self) -> Vec<ToolParam> {
        // derive ordered parameters from the reported JSON schema
        let properties = self.spec.input_schema.get("properties").and_then(|p| p.as_object());
        let required: Vec<&str> = self
            .spec
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        properties
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| ToolParam {
                        name: name.clone(),
                        param_type: schema
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("string")
                            .to_string(),
                        description: schema
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .to_string(),
                        optional: !required.contains(&name.as_str()),
                        default: None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        match self.state.load(Ordering::SeqCst) {
            STATE_READY => self.transport.call_tool(&self.spec.name, args).await,
            STATE_CLOSED => anyhow::bail!("collection is closed"),
            _ => anyhow::bail!("collection is not healthy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeTransport {
        fail_init: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn initialize(&self) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("connection refused")
            }
            Ok(())
        }

        async fn list_tools(&self) -> anyhow::Result<Vec<McpToolSpec>> {
            Ok(vec![McpToolSpec {
                name: "remote_echo".to_string(),
                description: "echoes".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string", "description": "t"}},
                    "required": ["text"],
                }),
            }])
        }

        async fn call_tool(&self, _name: &str, args: Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args)
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_setup_exposes_tools() {
        let transport = Arc::new(FakeTransport {
            fail_init: false,
            calls: AtomicUsize::new(0),
        });
        let mut collection = McpCollection::new("fake", transport);
        assert!(collection.tools().is_empty());
        collection.setup().await.unwrap();
        assert!(collection.is_healthy());
        let tools = collection.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].inputs()[0].name, "text");
    }

    #[tokio::test]
    async fn test_setup_failure_propagates_by_default() {
        let transport = Arc::new(FakeTransport {
            fail_init: true,
            calls: AtomicUsize::new(0),
        });
        let mut collection = McpCollection::new("fake", transport);
        assert!(collection.setup().await.is_err());
        assert!(!collection.is_healthy());
    }

    #[tokio::test]
    async fn test_ignore_setup_errors_marks_unhealthy() {
        let transport = Arc::new(FakeTransport {
            fail_init: true,
            calls: AtomicUsize::new(0),
        });
        let mut collection = McpCollection::new("fake", transport).with_ignore_setup_errors(true);
        collection.setup().await.unwrap();
        assert!(!collection.is_healthy());
        assert!(collection.tools().is_empty());
    }

    #[tokio::test]
    async fn test_closed_collection_rejects_calls() {
        let transport = Arc::new(FakeTransport {
            fail_init: false,
            calls: AtomicUsize::new(0),
        });
        let mut collection = McpCollection::new("fake", transport);
        collection.setup().await.unwrap();
        let tool = collection.tools()[0].clone();
        collection.close().await.unwrap();
        let err = tool.call(serde_json::json!({"text": "x"})).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
