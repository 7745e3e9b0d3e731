//! LLM critic with an explicit rubric.

use regex::Regex;

use super::CheckResult;
use crate::action::ActionNode;
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::provider::ToolChoice;
use crate::schema::{Message, Query};
use crate::workers::prompts::check_prompt;
use crate::workers::Input;

/// Grades a candidate with a model call. Multimodal queries keep their
/// ordered parts in the user message; the rubric and candidate go into the
/// system prompt.
pub struct CheckMinion;

impl CheckMinion {
    pub fn new() -> Self {
        Self
    }

    pub async fn check(&self, input: &Input, brain: &Brain) -> Result<CheckResult, MinionError> {
        let node = ActionNode::new(brain.provider());

        let messages = match &input.query {
            Query::Parts(parts) => vec![
                Message::system(check_prompt(input)),
                Message::user_parts(parts.clone()),
            ],
            _ => vec![Message::user(check_prompt(input))],
        };

        let outcome = node.execute(&messages, &[], ToolChoice::None).await?;
        parse_check_reply(&outcome.assistant_text)
            .ok_or_else(|| MinionError::Checker("critic reply had no parsable verdict".to_string()))
    }
}

impl Default for CheckMinion {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the critic's `<root>` XML verdict, with a JSON object fallback.
pub fn parse_check_reply(text: &str) -> Option<CheckResult> {
    let root_re = Regex::new(r"(?s)<root>.*?</root>").unwrap();
    if let Some(m) = root_re.find(text) {
        let xml = m.as_str();
        let field = |tag: &str| -> Option<String> {
            let re = Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>", tag = tag)).unwrap();
            re.captures(xml).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string())
        };
        let feedback = field("feedback")?;
        let correct = field("correct")?.eq_ignore_ascii_case("true");
        let score = field("score")?.parse::<f64>().ok()?.clamp(0.0, 1.0);
        return Some(CheckResult {
            score,
            correct,
            feedback,
        });
    }

    // JSON fallback: {"feedback": ..., "correct": ..., "score": ...}
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let parsed: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    Some(CheckResult {
        score: parsed.get("score")?.as_f64()?.clamp(0.0, 1.0),
        correct: parsed.get("correct")?.as_bool()?,
        feedback: parsed.get("feedback")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::schema::ContentPart;
    use std::sync::Arc;

    #[test]
    fn test_parse_xml_verdict() {
        let reply = "Let me verify.\n<root><feedback>Solid reasoning.</feedback><correct>true</correct><score>0.9</score></root>";
        let result = parse_check_reply(reply).unwrap();
        assert!(result.correct);
        assert!((result.score - 0.9).abs() < 1e-9);
        assert_eq!(result.feedback, "Solid reasoning.");
    }

    #[test]
    fn test_parse_json_fallback() {
        let reply = r#"{"feedback": "off by one", "correct": false, "score": 0.3}"#;
        let result = parse_check_reply(reply).unwrap();
        assert!(!result.correct);
        assert!((result.score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_unparsable_reply() {
        assert!(parse_check_reply("no verdict here").is_none());
    }

    #[tokio::test]
    async fn test_multimodal_query_preserves_part_order() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o"));
        provider.push_text(
            "<root><feedback>ok</feedback><correct>true</correct><score>1.0</score></root>",
        );
        let brain = crate::brain::Brain::with_provider(provider.clone());

        let mut input = Input::new(Query::Parts(vec![
            ContentPart::text("Is this answer correct?"),
            ContentPart::image_url("data:image/png;base64,AAAA"),
            ContentPart::text("Explain briefly."),
        ]));
        input.answer = "7".to_string();

        let result = CheckMinion::new().check(&input, &brain).await.unwrap();
        assert!(result.score >= 0.0 && result.score <= 1.0);
        assert!(!result.feedback.is_empty());

        let calls = provider.recorded_calls();
        let user_message = calls[0]
            .iter()
            .find(|m| m.role == crate::schema::Role::User)
            .unwrap();
        match &user_message.content {
            Some(crate::schema::MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
                assert!(matches!(parts[2], ContentPart::Text { .. }));
            }
            other => panic!("expected ordered parts, got {:?}", other),
        }
    }
}
