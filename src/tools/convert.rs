//! Conversion of raw callables into tools at agent setup.
//!
//! Anything callable that lacks a name and description is described by a
//! [`RawCallable`] record; conversion derives the tool schema from it and
//! wraps the closure in the matching adapter. A failed conversion logs a
//! warning and leaves the entry out rather than failing setup.

use std::sync::Arc;

use super::{AsyncFnTool, AsyncToolFn, FnTool, SyncToolFn, Tool, ToolParam};

pub enum RawCallableKind {
    Sync(SyncToolFn),
    Async(AsyncToolFn),
}

/// A bare callable plus the metadata a tool needs.
pub struct RawCallable {
    pub name: String,
    /// First paragraph becomes the tool description.
    pub doc: String,
    pub params: Vec<ToolParam>,
    pub output_type: String,
    pub kind: RawCallableKind,
}

impl RawCallable {
    pub fn sync(name: impl Into<String>, doc: impl Into<String>, params: Vec<ToolParam>, f: SyncToolFn) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            params,
            output_type: "string".to_string(),
            kind: RawCallableKind::Sync(f),
        }
    }

    pub fn asynchronous(
        name: impl Into<String>,
        doc: impl Into<String>,
        params: Vec<ToolParam>,
        f: AsyncToolFn,
    ) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            params,
            output_type: "string".to_string(),
            kind: RawCallableKind::Async(f),
        }
    }
}

/// Convert a raw callable into a tool. Returns `None` (with a warning) when
/// the callable cannot be described as a tool.
pub fn convert_callable(raw: RawCallable) -> Option<Arc<dyn Tool>> {
    if raw.name.is_empty() || !raw.name.chars().all(|c| c.is_alphanumeric() || "._-".contains(c)) {
        tracing::warn!(name = %raw.name, "cannot convert callable to tool: invalid name");
        return None;
    }
    let description = raw
        .doc
        .split("\n\n")
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    let description = if description.is_empty() {
        format!("Callable '{}'", raw.name)
    } else {
        description
    };

    Some(match raw.kind {
        RawCallableKind::Sync(f) => Arc::new(
            FnTool::new(raw.name, description, raw.params, f).with_output_type(raw.output_type),
        ),
        RawCallableKind::Async(f) => {
            Arc::new(AsyncFnTool::new(raw.name, description, raw.params, f))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_derives_description_from_first_paragraph() {
        let raw = RawCallable::sync(
            "word_count",
            "Count words in a text.\n\nLonger explanation that should be dropped.",
            vec![ToolParam::required("text", "string", "the text")],
            Arc::new(|args| {
                let n = args["text"].as_str().unwrap_or("").split_whitespace().count();
                Ok(serde_json::json!(n))
            }),
        );
        let tool = convert_callable(raw).unwrap();
        assert_eq!(tool.name(), "word_count");
        assert_eq!(tool.description(), "Count words in a text.");
    }

    #[test]
    fn test_invalid_name_rejected() {
        let raw = RawCallable::sync("bad name!", "", vec![], Arc::new(|_| Ok(serde_json::Value::Null)));
        assert!(convert_callable(raw).is_none());
    }

    #[tokio::test]
    async fn test_converted_tool_is_callable() {
        let raw = RawCallable::sync(
            "upper",
            "Uppercase a string.",
            vec![ToolParam::required("s", "string", "input")],
            Arc::new(|args| Ok(serde_json::json!(args["s"].as_str().unwrap_or("").to_uppercase()))),
        );
        let tool = convert_callable(raw).unwrap();
        let result = tool.call(serde_json::json!({"s": "abc"})).await.unwrap();
        assert_eq!(result, serde_json::json!("ABC"));
    }
}
