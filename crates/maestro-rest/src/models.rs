//! Typed projections of the data-plane entities.
//!
//! These mirror the REST service's schemas. Responses tolerate unknown
//! fields (the service may grow columns); request bodies serialize exactly
//! what the endpoints accept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub timezone: Option<String>,
    pub preferred_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantKind {
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assistant {
    pub id: Uuid,
    pub name: String,
    pub model: String,
    /// System prompt template with `{summary_previous}` / `{memories}` slots.
    pub instructions: String,
    #[serde(default)]
    pub is_secretary: bool,
    pub assistant_type: AssistantKind,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "loose_utc::deserialize")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Time,
    ReminderCreate,
    ReminderList,
    ReminderDelete,
    Calendar,
    SubAssistant,
    WebSearch,
    MemorySave,
    MemorySearch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinitionRecord {
    pub id: Uuid,
    pub name: String,
    pub tool_type: ToolKind,
    pub description: String,
    pub input_schema: Option<Value>,
    /// Required iff `tool_type == SubAssistant`.
    pub sub_assistant_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSecretaryAssignment {
    pub user_id: i64,
    pub secretary_id: Uuid,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "loose_utc::deserialize")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    OneTime,
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: Uuid,
    pub user_id: i64,
    pub assistant_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub trigger_at: Option<DateTime<Utc>>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub payload: Value,
    pub status: ReminderStatus,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReminderCreate {
    pub user_id: i64,
    pub assistant_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub payload: Value,
    pub status: ReminderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReminderUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReminderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    PendingProcessing,
    Processed,
    Summarized,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub tool_call_id: Option<String>,
    pub status: MessageStatus,
    pub summary_id: Option<i64>,
    #[serde(default)]
    pub meta_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageCreate {
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MessageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_id: Option<i64>,
}

/// Query parameters accepted by `GET /api/messages`.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub status: Option<MessageStatus>,
    pub limit: Option<usize>,
    pub sort_by: Option<&'static str>,
    pub sort_order: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub summary_text: String,
    pub last_message_id_covered: i64,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSummaryCreate {
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub summary_text: String,
    pub last_message_id_covered: i64,
    pub token_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    UserFact,
    Preference,
    Event,
    ConversationInsight,
    ExtractedKnowledge,
}

impl Default for MemoryKind {
    fn default() -> Self {
        MemoryKind::UserFact
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: Uuid,
    pub user_id: i64,
    pub assistant_id: Option<Uuid>,
    pub text: String,
    #[serde(default)]
    pub memory_type: MemoryKind,
    #[serde(default = "default_importance")]
    pub importance: u8,
    pub source_message_id: Option<i64>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryCreate {
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<Uuid>,
    pub text: String,
    pub memory_type: MemoryKind,
    pub importance: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchJob {
    pub id: i64,
    pub batch_id: String,
    pub user_id: i64,
    pub status: BatchJobStatus,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub messages_processed: u32,
    #[serde(default)]
    pub facts_extracted: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchJobCreate {
    pub batch_id: String,
    pub user_id: i64,
    pub status: BatchJobStatus,
    pub provider: String,
    pub model: String,
    pub messages_processed: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchJobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchJobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts_extracted: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Knobs of the out-of-band extraction job, owned by the data plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    #[serde(default = "default_true")]
    pub memory_extraction_enabled: bool,
    #[serde(default = "default_extraction_interval")]
    pub memory_extraction_interval_hours: u32,
    #[serde(default = "default_extraction_model")]
    pub memory_extraction_model: String,
    #[serde(default = "default_extraction_provider")]
    pub memory_extraction_provider: String,
    #[serde(default = "default_dedup_threshold")]
    pub memory_dedup_threshold: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            memory_extraction_enabled: true,
            memory_extraction_interval_hours: default_extraction_interval(),
            memory_extraction_model: default_extraction_model(),
            memory_extraction_provider: default_extraction_provider(),
            memory_dedup_threshold: default_dedup_threshold(),
        }
    }
}

/// One user/assistant conversation slice returned by the conversations feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Accepts both timezone-aware RFC 3339 timestamps and naive values.
/// Naive timestamps are interpreted as UTC with a warning — some upstream
/// writers drop the offset.
mod loose_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use tracing::warn;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        if let Ok(aware) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(aware.with_timezone(&Utc)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, fmt) {
                warn!(value = %raw, "naive timestamp from data plane, assuming UTC");
                return Ok(Some(naive.and_utc()));
            }
        }
        Err(serde::de::Error::custom(format!(
            "unparseable timestamp: {raw}"
        )))
    }
}

fn default_true() -> bool {
    true
}

fn default_importance() -> u8 {
    1
}

fn default_extraction_interval() -> u32 {
    24
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_extraction_provider() -> String {
    "openai".to_string()
}

fn default_dedup_threshold() -> f64 {
    0.85
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_kind_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReminderKind::OneTime).unwrap(),
            "\"one_time\""
        );
        assert_eq!(
            serde_json::to_string(&ReminderStatus::Active).unwrap(),
            "\"active\""
        );
    }

    #[test]
    fn message_status_round_trips() {
        let status: MessageStatus = serde_json::from_str("\"pending_processing\"").unwrap();
        assert_eq!(status, MessageStatus::PendingProcessing);
    }

    #[test]
    fn assistant_tolerates_unknown_fields() {
        let assistant: Assistant = serde_json::from_value(serde_json::json!({
            "id": "7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f",
            "name": "secretary",
            "model": "gpt-4o",
            "instructions": "You are {memories} {summary_previous}",
            "is_secretary": true,
            "assistant_type": "llm",
            "updated_at": null,
            "some_new_column": 7
        }))
        .unwrap();
        assert!(assistant.is_secretary);
        assert!(assistant.is_active);
    }

    #[test]
    fn naive_updated_at_is_read_as_utc() {
        let assistant: Assistant = serde_json::from_value(serde_json::json!({
            "id": "7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f",
            "name": "secretary",
            "model": "gpt-4o",
            "instructions": "x",
            "assistant_type": "llm",
            "updated_at": "2025-03-01T10:00:00"
        }))
        .unwrap();
        assert_eq!(
            assistant.updated_at.unwrap().to_rfc3339(),
            "2025-03-01T10:00:00+00:00"
        );
    }

    #[test]
    fn memory_defaults_apply() {
        let memory: Memory = serde_json::from_value(serde_json::json!({
            "id": "7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f",
            "user_id": 1,
            "assistant_id": null,
            "text": "likes coffee",
            "source_message_id": null,
            "last_accessed_at": null
        }))
        .unwrap();
        assert_eq!(memory.memory_type, MemoryKind::UserFact);
        assert_eq!(memory.importance, 1);
    }
}
