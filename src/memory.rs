//! Working / episodic / semantic memory.
//!
//! Three keyed stores per agent: `working` is ephemeral per-task state,
//! `episodic` is an append-only step log, `semantic` is long-term key/value
//! knowledge. Retrieval goes through an injectable [`SemanticIndex`] seam so
//! a vector store can replace the in-process fallback; reads are
//! side-effect free.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One episodic step record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub timestamp: DateTime<Utc>,
    pub content: Value,
}

/// Retrieval seam over the semantic store.
pub trait SemanticIndex: Send + Sync {
    fn index(&mut self, key: &str, text: &str);
    fn remove(&mut self, key: &str);
    /// Top-k (key, score) pairs for a query; must not mutate the index.
    fn query(&self, query: &str, k: usize) -> Vec<(String, f64)>;
}

/// In-process fallback index scoring by keyword overlap.
#[derive(Default)]
pub struct KeywordIndex {
    documents: HashMap<String, String>,
}

impl SemanticIndex for KeywordIndex {
    fn index(&mut self, key: &str, text: &str) {
        self.documents.insert(key.to_string(), text.to_lowercase());
    }

    fn remove(&mut self, key: &str) {
        self.documents.remove(key);
    }

    fn query(&self, query: &str, k: usize) -> Vec<(String, f64)> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(String, f64)> = self
            .documents
            .iter()
            .filter_map(|(key, text)| {
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                if hits == 0 {
                    None
                } else {
                    Some((key.clone(), hits as f64 / terms.len() as f64))
                }
            })
            .collect();
        scored.sort_by(|(ka, sa), (kb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ka.cmp(kb))
        });
        scored.truncate(k);
        scored
    }
}

/// Per-agent memory.
pub struct Memory {
    working: HashMap<String, Value>,
    episodic: Vec<EpisodicRecord>,
    semantic: HashMap<String, Value>,
    index: Box<dyn SemanticIndex>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(Box::new(KeywordIndex::default()))
    }
}

impl Memory {
    pub fn new(index: Box<dyn SemanticIndex>) -> Self {
        Self {
            working: HashMap::new(),
            episodic: Vec::new(),
            semantic: HashMap::new(),
            index,
        }
    }

    pub fn update_working(&mut self, key: impl Into<String>, value: Value) {
        self.working.insert(key.into(), value);
    }

    pub fn working(&self, key: &str) -> Option<&Value> {
        self.working.get(key)
    }

    /// Clear the per-task working store.
    pub fn reset_working(&mut self) {
        self.working.clear();
    }

    pub fn update_semantic(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.index.index(&key, &text);
        self.semantic.insert(key, value);
    }

    pub fn semantic(&self, key: &str) -> Option<&Value> {
        self.semantic.get(key)
    }

    pub fn append_episodic(&mut self, content: Value) {
        self.episodic.push(EpisodicRecord {
            timestamp: Utc::now(),
            content,
        });
    }

    /// Ordered step records, oldest first.
    pub fn episodic(&self) -> &[EpisodicRecord] {
        &self.episodic
    }

    /// Retrieve the semantic entries most relevant to a query.
    pub fn retrieve_relevant(&self, query: &str, k: usize) -> Vec<(String, Value)> {
        self.index
            .query(query, k)
            .into_iter()
            .filter_map(|(key, _)| self.semantic.get(&key).map(|v| (key, v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_store_is_resettable() {
        let mut memory = Memory::default();
        memory.update_working("cursor", serde_json::json!(5));
        assert_eq!(memory.working("cursor"), Some(&serde_json::json!(5)));
        memory.reset_working();
        assert!(memory.working("cursor").is_none());
    }

    #[test]
    fn test_episodic_is_append_only_and_ordered() {
        let mut memory = Memory::default();
        memory.append_episodic(serde_json::json!({"step": 1}));
        memory.append_episodic(serde_json::json!({"step": 2}));
        let records = memory.episodic();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp <= records[1].timestamp);
        assert_eq!(records[0].content["step"], 1);
    }

    #[test]
    fn test_semantic_retrieval() {
        let mut memory = Memory::default();
        memory.update_semantic("rust", serde_json::json!("a systems programming language"));
        memory.update_semantic("python", serde_json::json!("a dynamic scripting language"));
        memory.update_semantic("tokio", serde_json::json!("an async runtime for rust"));

        let hits = memory.retrieve_relevant("systems programming", 2);
        assert_eq!(hits[0].0, "rust");
    }

    #[test]
    fn test_retrieval_is_side_effect_free() {
        let mut memory = Memory::default();
        memory.update_semantic("k", serde_json::json!("value text"));
        let before = memory.retrieve_relevant("value", 5);
        let after = memory.retrieve_relevant("value", 5);
        assert_eq!(before.len(), after.len());
    }
}
