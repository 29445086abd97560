//! Persists the incoming message before the model runs.
//!
//! Runs after the context loader, so the new message is the last one in
//! the window. The returned row id becomes `initial_message_id`, which the
//! finalizer later flips to `processed` or `error`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use maestro_rest::models::{MessageCreate, MessageRole, MessageStatus};
use maestro_rest::DataPlane;

use super::Middleware;
use crate::error::AgentError;
use crate::message::AgentMessage;
use crate::state::{AgentState, StateUpdate};

pub struct MessageSaver {
    data_plane: Arc<dyn DataPlane>,
}

impl MessageSaver {
    pub fn new(data_plane: Arc<dyn DataPlane>) -> Self {
        Self { data_plane }
    }
}

#[async_trait]
impl Middleware for MessageSaver {
    fn name(&self) -> &'static str {
        "message_saver"
    }

    async fn before_agent(&self, state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        let Some(incoming) = state.messages.last() else {
            warn!(user_id = state.user_id, "no incoming message to save");
            return Ok(Vec::new());
        };
        if incoming.db_id().is_some() {
            // Already persisted (e.g. a replay); nothing to do.
            return Ok(Vec::new());
        }

        let (role, tool_call_id, meta_data) = match incoming {
            AgentMessage::Human { .. } => (MessageRole::Human, None, None),
            AgentMessage::Ai { .. } => (MessageRole::Assistant, None, None),
            AgentMessage::Tool {
                tool_call_id,
                tool_name,
                ..
            } => (
                MessageRole::Tool,
                Some(tool_call_id.clone()),
                tool_name
                    .as_ref()
                    .map(|name| serde_json::json!({ "tool_name": name })),
            ),
        };

        let create = MessageCreate {
            user_id: state.user_id,
            assistant_id: state.assistant_id,
            role,
            content: incoming.content().to_string(),
            content_type: "text".to_string(),
            status: MessageStatus::PendingProcessing,
            tool_call_id,
            meta_data,
        };

        let saved = self.data_plane.create_message(&state.ctx, &create).await?;
        info!(
            message_id = saved.id,
            user_id = state.user_id,
            role = ?role,
            "saved incoming message"
        );

        Ok(vec![
            StateUpdate::SetInitialMessageId(saved.id),
            StateUpdate::AssignDbId {
                index: state.messages.len() - 1,
                id: saved.id,
            },
        ])
    }
}
