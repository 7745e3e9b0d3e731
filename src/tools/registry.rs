//! Tool registry with deferred loading.
//!
//! Tools register as instances or as factories; a factory is invoked at most
//! once per registry lifetime, on first load. Search operates over the
//! lightweight [`ToolInfo`] records, so deferred tools cost nothing until
//! they are actually loaded.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::{Tool, ToolInfo};

pub type ToolFactory = Box<dyn FnOnce() -> anyhow::Result<Arc<dyn Tool>> + Send + Sync>;

enum RegistryEntry {
    Loaded(Arc<dyn Tool>),
    Deferred {
        info: ToolInfo,
        /// Taken on first load; `None` afterwards.
        factory: Option<ToolFactory>,
    },
}

/// Snapshot of registry composition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub loaded: usize,
    pub deferred: usize,
    pub categories: usize,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded tool instance under its own name. Replaces any
    /// previous entry with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.entries.insert(name, RegistryEntry::Loaded(tool));
    }

    pub fn register_many(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Register a factory with its metadata; the tool is constructed on
    /// first `load_tool`.
    pub fn register_factory(&mut self, info: ToolInfo, factory: ToolFactory) {
        self.entries.insert(
            info.name.clone(),
            RegistryEntry::Deferred {
                info,
                factory: Some(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Get the tool if it is already loaded, without triggering a factory.
    pub fn get_loaded(&self, name: &str) -> Option<Arc<dyn Tool>> {
        match self.entries.get(name) {
            Some(RegistryEntry::Loaded(tool)) => Some(tool.clone()),
            _ => None,
        }
    }

    /// Load a tool by name, invoking its factory if it is still deferred.
    pub fn load_tool(&mut self, name: &str) -> anyhow::Result<Arc<dyn Tool>> {
        match self.entries.get_mut(name) {
            None => anyhow::bail!("tool '{}' not found in registry", name),
            Some(RegistryEntry::Loaded(tool)) => Ok(tool.clone()),
            Some(RegistryEntry::Deferred { factory, info }) => {
                let f = factory
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("factory for '{}' already failed", name))?;
                let tool = f()?;
                if tool.name() != info.name {
                    anyhow::bail!(
                        "factory for '{}' produced a tool named '{}'",
                        info.name,
                        tool.name()
                    );
                }
                tracing::debug!(tool = %name, "tool loaded from factory");
                self.entries
                    .insert(name.to_string(), RegistryEntry::Loaded(tool.clone()));
                Ok(tool)
            }
        }
    }

    pub fn get_all_tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_categories(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .infos()
            .into_iter()
            .map(|i| i.category)
            .filter(|c| !c.is_empty())
            .collect();
        set.into_iter().collect()
    }

    pub fn get_tools_by_category(&self, category: &str) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .infos()
            .into_iter()
            .filter(|i| i.category == category)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Metadata for every registered tool, loaded or not.
    pub fn infos(&self) -> Vec<ToolInfo> {
        self.entries
            .values()
            .map(|entry| match entry {
                RegistryEntry::Loaded(tool) => tool.info(),
                RegistryEntry::Deferred { info, .. } => info.clone(),
            })
            .collect()
    }

    pub fn get_stats(&self) -> RegistryStats {
        let loaded = self
            .entries
            .values()
            .filter(|e| matches!(e, RegistryEntry::Loaded(_)))
            .count();
        RegistryStats {
            total: self.entries.len(),
            loaded,
            deferred: self.entries.len() - loaded,
            categories: self.get_categories().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ToolParam};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn simple_tool(name: &str, category: &str) -> Arc<dyn Tool> {
        Arc::new(
            FnTool::new(
                name,
                format!("{} tool", name),
                vec![ToolParam::required("x", "string", "input")],
                Arc::new(|_| Ok(serde_json::json!("ok"))),
            )
            .with_category(category),
        )
    }

    #[test]
    fn test_register_and_load() {
        let mut registry = ToolRegistry::new();
        registry.register(simple_tool("alpha", "a"));
        assert!(registry.contains("alpha"));
        assert_eq!(registry.load_tool("alpha").unwrap().name(), "alpha");
        assert!(registry.load_tool("missing").is_err());
    }

    #[test]
    fn test_factory_invoked_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        let mut registry = ToolRegistry::new();
        registry.register_factory(
            ToolInfo {
                name: "lazy".to_string(),
                description: "deferred tool".to_string(),
                parameters: vec![],
                category: String::new(),
            },
            Box::new(|| {
                BUILDS.fetch_add(1, Ordering::SeqCst);
                Ok(simple_tool("lazy", ""))
            }),
        );
        assert_eq!(registry.get_stats().deferred, 1);
        registry.load_tool("lazy").unwrap();
        registry.load_tool("lazy").unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get_stats().loaded, 1);
    }

    #[test]
    fn test_factory_name_mismatch_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register_factory(
            ToolInfo {
                name: "expected".to_string(),
                description: String::new(),
                parameters: vec![],
                category: String::new(),
            },
            Box::new(|| Ok(simple_tool("different", ""))),
        );
        assert!(registry.load_tool("expected").is_err());
    }

    #[test]
    fn test_categories() {
        let mut registry = ToolRegistry::new();
        registry.register(simple_tool("a1", "github"));
        registry.register(simple_tool("a2", "github"));
        registry.register(simple_tool("b1", "slack"));
        assert_eq!(registry.get_categories(), vec!["github", "slack"]);
        assert_eq!(registry.get_tools_by_category("github").len(), 2);
        let stats = registry.get_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.categories, 2);
    }
}
