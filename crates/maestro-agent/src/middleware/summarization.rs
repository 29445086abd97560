//! Folds old history into a running summary when the context fills up.
//!
//! Before each model step the projected token load (formatted system
//! prompt + live window) is compared against the context size. At or past
//! the threshold, everything but the newest tail is summarized by the LLM,
//! the summary row is persisted with its coverage watermark, the folded
//! messages are marked `summarized`, and removal updates drop them from
//! the window.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use maestro_rest::models::{MessageStatus, MessageUpdate, UserSummaryCreate};
use maestro_rest::DataPlane;

use super::Middleware;
use crate::error::AgentError;
use crate::message::AgentMessage;
use crate::prompts::{render_summarization_prompt, render_system_prompt};
use crate::provider::{ChatRequest, LlmProvider};
use crate::state::{AgentState, StateUpdate};
use crate::tokens;

pub const SUMMARY_THRESHOLD: f64 = 0.6;
pub const MESSAGES_TO_KEEP_TAIL: usize = 5;

const SUMMARY_MAX_TOKENS: u32 = 1024;

pub struct Summarization {
    provider: Arc<dyn LlmProvider>,
    data_plane: Arc<dyn DataPlane>,
    model: String,
    summarization_prompt: String,
    system_template: String,
    threshold: f64,
    keep_tail: usize,
}

impl Summarization {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        data_plane: Arc<dyn DataPlane>,
        model: String,
        summarization_prompt: String,
        system_template: String,
        threshold: f64,
        keep_tail: usize,
    ) -> Self {
        Self {
            provider,
            data_plane,
            model,
            summarization_prompt,
            system_template,
            threshold,
            keep_tail,
        }
    }

    fn should_summarize(&self, state: &AgentState) -> bool {
        if state.messages.is_empty() || state.llm_context_size == 0 {
            return false;
        }
        let system = render_system_prompt(
            &self.system_template,
            state.current_summary_content.as_deref(),
            &state.relevant_memories,
        );
        let total = tokens::estimate_text(&system) + tokens::estimate_history(&state.messages);
        let ratio = total as f64 / state.llm_context_size as f64;
        let decision = ratio >= self.threshold;
        info!(
            tokens = total,
            limit = state.llm_context_size,
            ratio = format!("{ratio:.2}"),
            threshold = self.threshold,
            decision = if decision { "summarize" } else { "skip" },
            "summarization check"
        );
        decision
    }

    /// Oldest messages to fold, leaving the newest `keep_tail` in place.
    /// Only messages with a data-plane id are removable.
    fn select_head(&self, messages: &[AgentMessage]) -> (Vec<AgentMessage>, Vec<i64>) {
        if messages.len() <= self.keep_tail {
            return (Vec::new(), Vec::new());
        }
        let head = &messages[..messages.len() - self.keep_tail];
        let ids = head.iter().filter_map(|m| m.db_id()).collect();
        (head.to_vec(), ids)
    }

    fn serialize_chunk(head: &[AgentMessage]) -> String {
        let entries: Vec<serde_json::Value> = head
            .iter()
            .filter(|m| !m.content().is_empty())
            .map(|m| {
                let mut entry = json!({
                    "type": m.type_tag(),
                    "Content": m.content(),
                });
                if let AgentMessage::Tool {
                    tool_name: Some(name),
                    ..
                } = m
                {
                    entry["Name"] = json!(name);
                }
                entry
            })
            .collect();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl Middleware for Summarization {
    fn name(&self) -> &'static str {
        "summarization"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        if !self.should_summarize(state) {
            return Ok(Vec::new());
        }

        let (head, ids) = self.select_head(&state.messages);
        if head.is_empty() || ids.is_empty() {
            warn!(user_id = state.user_id, "nothing summarizable despite token pressure");
            return Ok(Vec::new());
        }

        let chunk = Self::serialize_chunk(&head);
        let prompt = render_summarization_prompt(
            &self.summarization_prompt,
            &chunk,
            state.current_summary_content.as_deref(),
        );

        let request = ChatRequest {
            model: self.model.clone(),
            system: String::new(),
            messages: vec![AgentMessage::human(prompt)],
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: 0.3,
            tools: Vec::new(),
        };

        let summary_text = match self.provider.send(&request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => {
                warn!(user_id = state.user_id, "summary model returned empty text, skipping");
                return Ok(Vec::new());
            }
            Err(e) => {
                // A failed summarization degrades quality, not correctness:
                // the window just stays long for this step.
                warn!(error = %e, user_id = state.user_id, "summary generation failed");
                return Ok(Vec::new());
            }
        };

        let last_covered = *ids.iter().max().expect("ids is non-empty");
        let create = UserSummaryCreate {
            user_id: state.user_id,
            assistant_id: state.assistant_id,
            summary_text: summary_text.clone(),
            last_message_id_covered: last_covered,
            token_count: tokens::estimate_text(&summary_text),
        };
        if let Err(e) = self.data_plane.create_summary(&state.ctx, &create).await {
            warn!(error = %e, user_id = state.user_id, "summary persist failed, keeping window");
            return Ok(Vec::new());
        }

        // Covered messages leave the live context permanently.
        for id in &ids {
            let update = MessageUpdate {
                status: Some(MessageStatus::Summarized),
                summary_id: None,
            };
            if let Err(e) = self.data_plane.update_message(&state.ctx, *id, &update).await {
                warn!(message_id = id, error = %e, "failed to mark message summarized");
            }
        }

        info!(
            removed = ids.len(),
            last_message_id_covered = last_covered,
            user_id = state.user_id,
            "history summarized"
        );

        let mut updates = vec![
            StateUpdate::SetSummary(summary_text),
            StateUpdate::SetSummarizedIds(ids.clone()),
        ];
        updates.extend(ids.into_iter().map(StateUpdate::Remove));
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn send(
            &self,
            _req: &ChatRequest,
        ) -> Result<crate::provider::ChatResponse, crate::provider::ProviderError> {
            Err(crate::provider::ProviderError::Unavailable("down".into()))
        }
    }

    fn message_with_id(id: i64, content: &str) -> AgentMessage {
        let mut msg = AgentMessage::human(content);
        msg.set_db_id(id);
        msg
    }

    #[test]
    fn head_selection_preserves_the_tail() {
        let s = Summarization::new(
            Arc::new(FailingProvider),
            Arc::new(maestro_rest::testing::InMemoryDataPlane::new()),
            "gpt-4o".into(),
            "{json} {current_summary}".into(),
            "{summary_previous} {memories}".into(),
            SUMMARY_THRESHOLD,
            2,
        );
        let messages: Vec<AgentMessage> =
            (1..=5).map(|i| message_with_id(i, &format!("m{i}"))).collect();
        let (head, ids) = s.select_head(&messages);
        assert_eq!(head.len(), 3);
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn short_windows_are_never_selected() {
        let s = Summarization::new(
            Arc::new(FailingProvider),
            Arc::new(maestro_rest::testing::InMemoryDataPlane::new()),
            "gpt-4o".into(),
            "{json} {current_summary}".into(),
            "{summary_previous} {memories}".into(),
            SUMMARY_THRESHOLD,
            5,
        );
        let messages: Vec<AgentMessage> =
            (1..=5).map(|i| message_with_id(i, "x")).collect();
        let (head, ids) = s.select_head(&messages);
        assert!(head.is_empty());
        assert!(ids.is_empty());
    }

    #[test]
    fn chunk_serialization_skips_empty_and_names_tools() {
        let messages = vec![
            message_with_id(1, "hello"),
            AgentMessage::ai("", Vec::new()),
            AgentMessage::tool("result", "call_1", Some("current_time".to_string())),
        ];
        let chunk = Summarization::serialize_chunk(&messages);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&chunk).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["type"], "Human");
        assert_eq!(parsed[1]["type"], "Tool");
        assert_eq!(parsed[1]["Name"], "current_time");
    }

}
