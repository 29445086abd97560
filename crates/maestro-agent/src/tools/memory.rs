//! Long-term memory tools backed by the RAG service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use maestro_core::Ctx;
use maestro_core::logging::EventType;
use maestro_rest::models::{MemoryCreate, MemoryKind};
use maestro_rest::RagService;

use super::{optional_str, required_str, Tool, ToolError};

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_SEARCH_THRESHOLD: f64 = 0.6;

pub struct MemorySaveTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) assistant_id: Uuid,
    pub(crate) rag: Arc<dyn RagService>,
}

#[async_trait]
impl Tool for MemorySaveTool {
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
                "text": {"type": "string", "description": "The fact to remember."},
                "memory_type": {
                    "type": "string",
                    "enum": ["user_fact", "preference", "event", "conversation_insight"],
                    "description": "Kind of fact. Defaults to user_fact."
                },
                "importance": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 10,
                    "description": "1-10, how important this is to remember."
                }
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let text = required_str(&args, "text")?;
        let memory_type = match optional_str(&args, "memory_type") {
            Some("preference") => MemoryKind::Preference,
            Some("event") => MemoryKind::Event,
            Some("conversation_insight") => MemoryKind::ConversationInsight,
            _ => MemoryKind::UserFact,
        };
        let importance = args
            .get("importance")
            .and_then(|v| v.as_i64())
            .unwrap_or(5)
            .clamp(1, 10) as u8;

        let ctx = Ctx::new().with_user(self.user_id);
        let memory = self
            .rag
            .save_memory(
                &ctx,
                &MemoryCreate {
                    user_id: self.user_id,
                    assistant_id: Some(self.assistant_id),
                    text: text.to_string(),
                    memory_type,
                    importance,
                    source_message_id: None,
                },
            )
            .await
            .map_err(|e| ToolError::api(format!("failed to save memory: {e}")))?;

        info!(memory_id = %memory.id, user_id = self.user_id, event_type = %EventType::ToolCall, "memory saved");
        Ok("Memory saved.".to_string())
    }
}

pub struct MemorySearchTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) rag: Arc<dyn RagService>,
}

#[async_trait]
impl Tool for MemorySearchTool {
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
                "query": {"type": "string", "description": "What to look for."},
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 20,
                    "description": "Maximum matches to return. Defaults to 5."
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let query = required_str(&args, "query")?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_SEARCH_LIMIT as i64)
            .clamp(1, 20) as usize;

        let ctx = Ctx::new().with_user(self.user_id);
        let memories = self
            .rag
            .search_memories(&ctx, query, self.user_id, limit, DEFAULT_SEARCH_THRESHOLD)
            .await
            .map_err(|e| ToolError::api(format!("memory search failed: {e}")))?;

        if memories.is_empty() {
            return Ok("No relevant memories found.".to_string());
        }

        let lines: Vec<String> = memories
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.text))
            .collect();
        Ok(lines.join("\n"))
    }
}
