//! Context-management policies: auto-decay and auto-compact.
//!
//! Decay runs after a step and moves large, old, non-system messages to
//! cache files, leaving a short reference behind. Compaction runs before a
//! step and replaces the middle of a long history with one summary message.
//! The two policies are independent and compose.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::state::{AgentState, DecayMarker};
use crate::provider::{GenerateOptions, LlmProvider};
use crate::schema::{Message, MessageContent, Role};
use crate::workers::prompts::summary_prompt;

/// Label prefixing every compaction summary message.
pub const SUMMARY_LABEL: &str = "[Conversation Summary]";

/// Approximate token count: a chars/4 estimate standing in for a tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            let content = m.content.as_ref().map(|c| c.byte_len()).unwrap_or(0);
            let calls = m
                .tool_calls
                .as_ref()
                .map(|calls| calls.iter().map(|c| c.function.arguments.len() + 16).sum())
                .unwrap_or(0);
            (content + calls) / 4 + 4
        })
        .sum()
}

/// Decay policy knobs.
#[derive(Debug, Clone)]
pub struct DecayPolicy {
    /// Minimum content size in bytes.
    pub min_size: usize,
    /// Minimum age in steps.
    pub ttl_steps: usize,
}

/// Move every decayable message to a cache file, replacing its content with
/// a reference. Returns the markers created in this pass.
pub async fn auto_decay(
    state: &mut AgentState,
    cache_dir: &Path,
    policy: &DecayPolicy,
) -> std::io::Result<Vec<DecayMarker>> {
    let current_step = state.step_count;
    let mut created = Vec::new();

    for index in 0..state.messages.len() {
        if state.is_decayed(index) {
            continue;
        }
        let message = &state.messages[index];
        if message.role == Role::System {
            continue;
        }
        let age = current_step.saturating_sub(state.message_steps.get(index).copied().unwrap_or(0));
        if age < policy.ttl_steps {
            continue;
        }
        let Some(content) = &message.content else {
            continue;
        };
        let size = content.byte_len();
        if size < policy.min_size {
            continue;
        }

        let file_name = format!("decay-step{}-{}.txt", current_step, Uuid::new_v4());
        let file_path = cache_dir.join(file_name);
        tokio::fs::write(&file_path, content.joined_text()).await?;

        let reference = decay_reference(size, &file_path);
        state.messages[index].content = Some(MessageContent::Text(reference));
        tracing::debug!(
            index = index,
            size = size,
            path = %file_path.display(),
            "message decayed to file"
        );
        let marker = DecayMarker {
            message_index: index,
            file_path,
            original_size: size,
        };
        state.decayed.push(marker.clone());
        created.push(marker);
    }

    Ok(created)
}

/// The replacement text left where a decayed message used to be.
pub fn decay_reference(size: usize, path: &Path) -> String {
    format!(
        "[Large output ({}KB) saved to: {}] Use file_read to access full content if needed.",
        size / 1024,
        path.display()
    )
}

/// Compaction policy knobs.
#[derive(Debug, Clone)]
pub struct CompactPolicy {
    pub context_window: usize,
    /// Fraction of the window that triggers compaction.
    pub threshold: f64,
    /// Non-system messages pinned at the end of history.
    pub keep_recent: usize,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactOutcome {
    /// Below threshold; history untouched.
    NotNeeded,
    /// Middle span replaced with a summary message.
    Compacted { summarized_messages: usize },
    /// Summarization failed; history untouched.
    Failed(String),
}

/// Summarize the middle of the history when it approaches the context
/// window. System messages are pinned, as are the last `keep_recent`
/// non-system messages; on failure the history is left unchanged.
pub async fn auto_compact(
    state: &mut AgentState,
    provider: &dyn LlmProvider,
    policy: &CompactPolicy,
) -> CompactOutcome {
    let tokens = estimate_tokens(&state.messages);
    let limit = (policy.context_window as f64 * policy.threshold) as usize;
    if tokens < limit {
        return CompactOutcome::NotNeeded;
    }

    // partition: pinned system messages, the middle span, and the tail
    let non_system_indices: Vec<usize> = state
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role != Role::System)
        .map(|(i, _)| i)
        .collect();
    if non_system_indices.len() <= policy.keep_recent {
        return CompactOutcome::NotNeeded;
    }
    let tail_start = non_system_indices[non_system_indices.len() - policy.keep_recent];
    let middle: Vec<&Message> = state
        .messages
        .iter()
        .enumerate()
        .filter(|(i, m)| *i < tail_start && m.role != Role::System)
        .map(|(_, m)| m)
        .collect();
    if middle.is_empty() {
        return CompactOutcome::NotNeeded;
    }

    let transcript: String = middle
        .iter()
        .map(|m| {
            format!(
                "{:?}: {}\n",
                m.role,
                m.content.as_ref().map(|c| c.joined_text()).unwrap_or_default()
            )
        })
        .collect();
    let request = vec![
        Message::system(summary_prompt()),
        Message::user(transcript),
    ];

    let summary = match provider.generate(&request, &GenerateOptions::default()).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(error = %e, "compaction summarization failed, history unchanged");
            return CompactOutcome::Failed(e.to_string());
        }
    };

    let summarized = middle.len();
    let mut compacted: Vec<Message> = Vec::new();
    let mut compacted_steps: Vec<usize> = Vec::new();
    // pinned system messages keep their relative order at the front
    for (i, message) in state.messages.iter().enumerate() {
        if message.role == Role::System {
            compacted.push(message.clone());
            compacted_steps.push(state.message_steps.get(i).copied().unwrap_or(0));
        }
    }
    compacted.push(Message::system(format!("{}\n{}", SUMMARY_LABEL, summary)));
    compacted_steps.push(state.step_count);
    for (i, message) in state.messages.iter().enumerate() {
        if i >= tail_start && message.role != Role::System {
            compacted.push(message.clone());
            compacted_steps.push(state.message_steps.get(i).copied().unwrap_or(0));
        }
    }

    state.messages = compacted;
    state.message_steps = compacted_steps;
    // decay markers reference message indices that no longer exist
    state.decayed.clear();

    tracing::info!(summarized = summarized, tokens_before = tokens, "history compacted");
    CompactOutcome::Compacted {
        summarized_messages: summarized,
    }
}

/// Best-effort removal of a decay cache directory.
pub async fn cleanup_cache_dir(cache_dir: &PathBuf) {
    if let Err(e) = tokio::fs::remove_dir_all(cache_dir).await {
        tracing::debug!(path = %cache_dir.display(), error = %e, "cache cleanup skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::workers::Input;

    fn state_with_messages(messages: Vec<(Message, usize)>) -> AgentState {
        let mut state = AgentState::new(Input::new("task"));
        for (message, step) in messages {
            state.messages.push(message);
            state.message_steps.push(step);
        }
        state
    }

    #[tokio::test]
    async fn test_auto_decay_replaces_large_old_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let big = "x".repeat(150_000);
        let mut state = state_with_messages(vec![
            (Message::system("sys"), 0),
            (Message::tool_result("c1", big.clone()), 5),
            (Message::user("small"), 5),
        ]);
        state.step_count = 8;

        let policy = DecayPolicy {
            min_size: 100_000,
            ttl_steps: 3,
        };
        let markers = auto_decay(&mut state, tmp.path(), &policy).await.unwrap();
        assert_eq!(markers.len(), 1);
        let marker = &markers[0];
        assert_eq!(marker.original_size, 150_000);
        assert!(marker.file_path.exists());
        assert_eq!(
            std::fs::metadata(&marker.file_path).unwrap().len(),
            150_000
        );

        let replaced = state.messages[1].text_content().unwrap().to_string();
        assert_eq!(
            replaced,
            format!(
                "[Large output (146KB) saved to: {}] Use file_read to access full content if needed.",
                marker.file_path.display()
            )
        );
        // small and system messages untouched
        assert_eq!(state.messages[2].text_content(), Some("small"));
        assert_eq!(state.messages[0].text_content(), Some("sys"));
    }

    #[tokio::test]
    async fn test_auto_decay_respects_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let big = "x".repeat(150_000);
        let mut state = state_with_messages(vec![(Message::user(big), 7)]);
        state.step_count = 8;

        let policy = DecayPolicy {
            min_size: 100_000,
            ttl_steps: 3,
        };
        let markers = auto_decay(&mut state, tmp.path(), &policy).await.unwrap();
        assert!(markers.is_empty());
    }

    #[tokio::test]
    async fn test_auto_compact_preserves_pins() {
        let provider = ScriptedProvider::new("gpt-4o");
        provider.push_text("a compact summary of the early turns");

        let mut messages = vec![(Message::system("system rules"), 0)];
        for i in 0..30 {
            messages.push((Message::user(format!("turn {} {}", i, "words ".repeat(400))), i));
        }
        let mut state = state_with_messages(messages);
        state.step_count = 30;

        let before_tokens = estimate_tokens(&state.messages);
        let tail_before: Vec<Message> = state.messages[state.messages.len() - 10..].to_vec();

        let policy = CompactPolicy {
            context_window: 10_000,
            threshold: 0.9,
            keep_recent: 10,
        };
        let outcome = auto_compact(&mut state, &provider, &policy).await;
        assert!(matches!(outcome, CompactOutcome::Compacted { .. }));

        let after_tokens = estimate_tokens(&state.messages);
        assert!(after_tokens < before_tokens);

        // system message preserved, exactly one summary message added
        assert_eq!(state.messages[0].text_content(), Some("system rules"));
        let summaries: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| {
                m.text_content()
                    .map(|t| t.starts_with(SUMMARY_LABEL))
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(summaries.len(), 1);

        // the last keep_recent non-system messages are identical
        let tail_after: Vec<Message> = state.messages[state.messages.len() - 10..].to_vec();
        assert_eq!(tail_before, tail_after);
    }

    #[tokio::test]
    async fn test_auto_compact_below_threshold_is_noop() {
        let provider = ScriptedProvider::new("gpt-4o");
        let mut state = state_with_messages(vec![(Message::user("short"), 0)]);
        let policy = CompactPolicy {
            context_window: 128_000,
            threshold: 0.92,
            keep_recent: 10,
        };
        assert_eq!(
            auto_compact(&mut state, &provider, &policy).await,
            CompactOutcome::NotNeeded
        );
    }

    #[tokio::test]
    async fn test_auto_compact_failure_leaves_history_unchanged() {
        // provider exhausted -> summarization fails
        let provider = ScriptedProvider::new("gpt-4o");
        let mut messages = Vec::new();
        for i in 0..30 {
            messages.push((Message::user(format!("turn {} {}", i, "words ".repeat(400))), i));
        }
        let mut state = state_with_messages(messages);
        let count_before = state.messages.len();

        let policy = CompactPolicy {
            context_window: 10_000,
            threshold: 0.9,
            keep_recent: 10,
        };
        let outcome = auto_compact(&mut state, &provider, &policy).await;
        assert!(matches!(outcome, CompactOutcome::Failed(_)));
        assert_eq!(state.messages.len(), count_before);
    }
}
