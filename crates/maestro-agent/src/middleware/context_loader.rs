//! Loads recent conversation history and the latest summary in front of
//! the incoming message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use maestro_rest::models::{Message, MessageQuery, MessageRole, MessageStatus};
use maestro_rest::DataPlane;

use super::Middleware;
use crate::error::AgentError;
use crate::message::AgentMessage;
use crate::provider::ToolCall;
use crate::state::{AgentState, StateUpdate};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct ContextLoader {
    data_plane: Arc<dyn DataPlane>,
    history_limit: usize,
}

impl ContextLoader {
    pub fn new(data_plane: Arc<dyn DataPlane>, history_limit: usize) -> Self {
        Self {
            data_plane,
            history_limit,
        }
    }

    fn convert(message: &Message) -> AgentMessage {
        let mut converted = match message.role {
            MessageRole::Human => AgentMessage::human(message.content.clone()),
            MessageRole::Assistant => {
                let tool_calls = message
                    .meta_data
                    .as_ref()
                    .and_then(|m| m.get("tool_calls"))
                    .and_then(|v| serde_json::from_value::<Vec<ToolCall>>(v.clone()).ok())
                    .unwrap_or_default();
                AgentMessage::ai(message.content.clone(), tool_calls)
            }
            MessageRole::Tool => AgentMessage::tool(
                message.content.clone(),
                message.tool_call_id.clone().unwrap_or_default(),
                message
                    .meta_data
                    .as_ref()
                    .and_then(|m| m.get("tool_name"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
            ),
        };
        converted.set_db_id(message.id);
        converted
    }
}

#[async_trait]
impl Middleware for ContextLoader {
    fn name(&self) -> &'static str {
        "context_loader"
    }

    async fn before_agent(&self, state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        let mut updates = Vec::new();

        let query = MessageQuery {
            user_id: state.user_id,
            assistant_id: state.assistant_id,
            status: Some(MessageStatus::Processed),
            limit: Some(self.history_limit),
            sort_by: Some("id"),
            sort_order: Some("asc"),
        };

        match self.data_plane.get_messages(&state.ctx, &query).await {
            Ok(rows) => {
                if !rows.is_empty() {
                    info!(
                        count = rows.len(),
                        user_id = state.user_id,
                        "loaded conversation history"
                    );
                    updates.push(StateUpdate::PrependHistory(
                        rows.iter().map(Self::convert).collect(),
                    ));
                }
            }
            // History is a quality-of-answer concern, not a correctness
            // one; the run proceeds with a cold window.
            Err(e) => warn!(error = %e, user_id = state.user_id, "history load failed"),
        }

        match self
            .data_plane
            .get_latest_summary(&state.ctx, state.user_id, state.assistant_id)
            .await
        {
            Ok(Some(summary)) => updates.push(StateUpdate::SetSummary(summary.summary_text)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, user_id = state.user_id, "summary load failed"),
        }

        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn row(id: i64, role: MessageRole, content: &str) -> Message {
        Message {
            id,
            user_id: 42,
            assistant_id: Uuid::nil(),
            timestamp: Utc::now(),
            role,
            content: content.to_string(),
            content_type: Some("text".to_string()),
            tool_call_id: (role == MessageRole::Tool).then(|| "call_1".to_string()),
            status: MessageStatus::Processed,
            summary_id: None,
            meta_data: None,
        }
    }

    #[test]
    fn conversion_keeps_role_and_db_id() {
        let human = ContextLoader::convert(&row(1, MessageRole::Human, "hi"));
        assert!(human.is_human());
        assert_eq!(human.db_id(), Some(1));

        let tool = ContextLoader::convert(&row(2, MessageRole::Tool, "result"));
        match tool {
            AgentMessage::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "call_1"),
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn assistant_tool_calls_come_from_meta_data() {
        let mut message = row(3, MessageRole::Assistant, "");
        message.meta_data = Some(serde_json::json!({
            "tool_calls": [{"id": "call_9", "name": "current_time", "arguments": {}}]
        }));
        match ContextLoader::convert(&message) {
            AgentMessage::Ai { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].name, "current_time");
            }
            other => panic!("expected AI message, got {other:?}"),
        }
    }
}
