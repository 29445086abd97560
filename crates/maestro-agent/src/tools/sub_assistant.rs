//! Delegation tool: hand a request to a specialist assistant.
//!
//! The sub-assistant runs the same pipeline as a secretary but never talks
//! to the end user directly; its reply comes back as this tool's output.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use maestro_core::Ctx;
use maestro_core::logging::EventType;

use super::{required_str, Tool, ToolError};
use crate::factory::AgentFactory;

pub struct SubAssistantTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) parent_assistant_id: Uuid,
    pub(crate) sub_assistant_id: Uuid,
    /// Weak so cached instances do not keep the factory (and thereby
    /// themselves) alive in a cycle.
    pub(crate) factory: Weak<AgentFactory>,
}

#[async_trait]
impl Tool for SubAssistantTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The request to delegate to the specialist assistant."
                }
            },
            "required": ["message"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let message = required_str(&args, "message")?;

        if self.sub_assistant_id == self.parent_assistant_id {
            return Err(ToolError::new(
                "RECURSIVE_DELEGATION",
                "a sub-assistant tool cannot delegate to its own parent assistant",
            ));
        }

        let factory = self
            .factory
            .upgrade()
            .ok_or_else(|| ToolError::api("agent factory has shut down"))?;

        info!(
            sub_assistant_id = %self.sub_assistant_id,
            user_id = self.user_id,
            event_type = %EventType::ToolCall,
            "delegating to sub-assistant"
        );

        let instance = factory
            .get_by_id(
                &Ctx::new().with_user(self.user_id),
                self.sub_assistant_id,
                self.user_id,
            )
            .await
            .map_err(|e| ToolError::api(format!("could not build sub-assistant: {e}")))?;

        let ctx = Ctx::new().with_user(self.user_id);
        let reply = instance
            .process_message(&ctx, message)
            .await
            .map_err(|e| ToolError::api(format!("sub-assistant failed: {e}")))?;

        Ok(reply.unwrap_or_else(|| "The sub-assistant produced no reply.".to_string()))
    }
}
