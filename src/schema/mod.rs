//! Chat message model shared by providers, workers, and agents.
//!
//! Messages are immutable once emitted. Content is either plain text or an
//! ordered list of parts (text and image references) so multimodal queries
//! keep their ordering through prompt rendering.

use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Content part for multimodal messages (text or image).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content
    Text { text: String },
    /// Image URL content (for vision models)
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL wrapper for vision content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    /// Optional detail level: "auto", "low", or "high"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ContentPart {
    /// Create a text content part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Create an image URL content part.
    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }

    /// Create an image part from raw bytes, inlined as a base64 data URL
    /// with an explicit media type (e.g. `png`, `jpeg`).
    pub fn image_base64(format: &str, bytes: &[u8]) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/{};base64,{}", format, base64_encode(bytes)),
                detail: None,
            },
        }
    }
}

/// Message content - either simple text or multimodal (text + images).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content (most common case)
    Text(String),
    /// Multimodal content array (for vision models)
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Create simple text content.
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text(text.into())
    }

    /// Create multimodal content with ordered parts.
    pub fn multimodal(parts: Vec<ContentPart>) -> Self {
        MessageContent::Parts(parts)
    }

    /// Get the text content (first text part if multimodal).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Concatenate every text part; image parts are skipped.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Approximate size in bytes of the rendered content.
    pub fn byte_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::ImageUrl { image_url } => image_url.url.len(),
                })
                .sum(),
        }
    }
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a simple text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: Some(MessageContent::text(content)),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::new(Role::Assistant, content)
    }

    /// Create a multimodal user message preserving part order.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message {
            role: Role::User,
            content: Some(MessageContent::multimodal(parts)),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a tool-result message answering the given tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: Some(MessageContent::text(content)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    /// Get the text content of this message.
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.as_text())
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Parse the JSON arguments string; missing or invalid arguments become `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or(serde_json::Value::Object(Default::default()))
    }
}

/// Function call details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string. May be empty for no-argument functions.
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition with schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Query input accepted by the brain and agents: a plain string, ordered
/// content parts, or a preformatted message list.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Text(String),
    Parts(Vec<ContentPart>),
    Messages(Vec<Message>),
}

impl Query {
    /// Best-effort plain-text rendering, used for prompts and logging.
    pub fn as_text(&self) -> String {
        match self {
            Query::Text(s) => s.clone(),
            Query::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Query::Messages(msgs) => msgs
                .iter()
                .filter_map(|m| m.text_content())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_multimodal(&self) -> bool {
        match self {
            Query::Text(_) => false,
            Query::Parts(parts) => parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })),
            Query::Messages(msgs) => msgs.iter().any(|m| {
                matches!(&m.content, Some(MessageContent::Parts(parts))
                    if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
            }),
        }
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Text(s.to_string())
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Query::Text(s)
    }
}

impl From<Vec<ContentPart>> for Query {
    fn from(parts: Vec<ContentPart>) -> Self {
        Query::Parts(parts)
    }
}

/// Convert a query into a canonical message list, prepending the system
/// prompt when given and not already present.
///
/// Conversion is idempotent: canonicalizing the messages produced by a
/// previous call returns an equal list.
pub fn canonicalize(query: &Query, system_prompt: Option<&str>) -> Vec<Message> {
    let mut messages = match query {
        Query::Text(s) => vec![Message::user(s.clone())],
        Query::Parts(parts) => vec![Message::user_parts(parts.clone())],
        Query::Messages(msgs) => msgs.clone(),
    };

    if let Some(prompt) = system_prompt {
        if !prompt.is_empty() && !matches!(messages.first(), Some(m) if m.role == Role::System) {
            messages.insert(0, Message::system(prompt));
        }
    }

    messages
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_text_query() {
        let msgs = canonicalize(&Query::from("hello"), Some("be brief"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].text_content(), Some("hello"));
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let parts = vec![
            ContentPart::text("Is this correct?"),
            ContentPart::image_url("https://example.com/x.png"),
            ContentPart::text("Explain briefly."),
        ];
        let first = canonicalize(&Query::Parts(parts), Some("sys"));
        let second = canonicalize(&Query::Messages(first.clone()), Some("sys"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_multimodal_part_order_preserved() {
        let msgs = canonicalize(
            &Query::Parts(vec![
                ContentPart::text("a"),
                ContentPart::image_url("https://e.com/i.png"),
                ContentPart::text("b"),
            ]),
            None,
        );
        match &msgs[0].content {
            Some(MessageContent::Parts(parts)) => {
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
                assert!(matches!(parts[2], ContentPart::Text { .. }));
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn test_image_base64_data_url() {
        let part = ContentPart::image_base64("png", b"abc");
        match part {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/png;base64,YWJj");
            }
            _ => panic!("expected image part"),
        }
    }

    #[test]
    fn test_tool_call_arguments_parsing() {
        let call = ToolCall::new("c1", "adder", serde_json::json!({"a": 1}));
        assert_eq!(call.parsed_arguments()["a"], 1);

        let empty = ToolCall {
            id: "c2".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "noargs".into(),
                arguments: String::new(),
            },
        };
        assert!(empty.parsed_arguments().as_object().unwrap().is_empty());
    }

    #[test]
    fn test_message_content_serde_untagged() {
        let text: MessageContent = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(text.as_text(), Some("plain"));

        let parts: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert_eq!(parts.as_text(), Some("hi"));
    }
}
