//! Persists model output after every step.
//!
//! The just-produced assistant message, plus any tool results from the
//! previous step that are still unpersisted (no data-plane id yet), are
//! saved with `status=processed`. Assistant messages that requested tools
//! keep the calls under `meta_data.tool_calls`; empty content is allowed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use maestro_rest::models::{MessageCreate, MessageRole, MessageStatus};
use maestro_rest::DataPlane;

use super::Middleware;
use crate::error::AgentError;
use crate::message::AgentMessage;
use crate::provider::ChatResponse;
use crate::state::{AgentState, StateUpdate};

pub struct ResponseSaver {
    data_plane: Arc<dyn DataPlane>,
}

impl ResponseSaver {
    pub fn new(data_plane: Arc<dyn DataPlane>) -> Self {
        Self { data_plane }
    }

    fn to_create(state: &AgentState, message: &AgentMessage) -> Option<MessageCreate> {
        match message {
            AgentMessage::Human { .. } => None,
            AgentMessage::Ai {
                content,
                tool_calls,
                ..
            } => {
                let meta_data = if tool_calls.is_empty() {
                    None
                } else {
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "name": tc.name,
                                "id": tc.id,
                                "arguments": tc.arguments,
                            })
                        })
                        .collect();
                    Some(serde_json::json!({ "tool_calls": calls }))
                };
                Some(MessageCreate {
                    user_id: state.user_id,
                    assistant_id: state.assistant_id,
                    role: MessageRole::Assistant,
                    content: content.clone(),
                    content_type: "text".to_string(),
                    status: MessageStatus::Processed,
                    tool_call_id: None,
                    meta_data,
                })
            }
            AgentMessage::Tool {
                content,
                tool_call_id,
                tool_name,
                ..
            } => Some(MessageCreate {
                user_id: state.user_id,
                assistant_id: state.assistant_id,
                role: MessageRole::Tool,
                content: content.clone(),
                content_type: "text".to_string(),
                status: MessageStatus::Processed,
                tool_call_id: Some(tool_call_id.clone()),
                meta_data: tool_name
                    .as_ref()
                    .map(|name| serde_json::json!({ "tool_name": name })),
            }),
        }
    }
}

#[async_trait]
impl Middleware for ResponseSaver {
    fn name(&self) -> &'static str {
        "response_saver"
    }

    async fn after_model(
        &self,
        state: &AgentState,
        _response: &ChatResponse,
    ) -> Result<Vec<StateUpdate>, AgentError> {
        let mut updates = Vec::new();

        for (index, message) in state.messages.iter().enumerate() {
            if message.db_id().is_some() {
                continue;
            }
            let Some(create) = Self::to_create(state, message) else {
                continue;
            };
            match self.data_plane.create_message(&state.ctx, &create).await {
                Ok(saved) => updates.push(StateUpdate::AssignDbId {
                    index,
                    id: saved.id,
                }),
                Err(e) => {
                    // Keep going: a later redelivery can re-save, and the
                    // finalizer still marks the run outcome.
                    warn!(
                        error = %e,
                        role = ?create.role,
                        user_id = state.user_id,
                        "failed to persist model output"
                    );
                }
            }
        }

        Ok(updates)
    }
}
