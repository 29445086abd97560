use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `content.metadata.tool_name` value that marks a scheduler trigger.
pub const REMINDER_TRIGGER_TOOL: &str = "reminder_trigger";

/// Where an inbound queue message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMessageSource {
    User,
    Cron,
    Telegram,
    Api,
}

impl QueueMessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMessageSource::User => "user",
            QueueMessageSource::Cron => "cron",
            QueueMessageSource::Telegram => "telegram",
            QueueMessageSource::Api => "api",
        }
    }
}

/// Role of the inbound queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMessageType {
    Human,
    Tool,
    Assistant,
    Error,
}

impl QueueMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMessageType::Human => "human",
            QueueMessageType::Tool => "tool",
            QueueMessageType::Assistant => "assistant",
            QueueMessageType::Error => "error",
        }
    }
}

/// Optional structured metadata under `content.metadata`.
///
/// For scheduler triggers every reminder field is populated; user messages
/// usually carry none of them. `extra` keeps forward-compatible custom keys
/// (these are data, not schema, so they are not rejected).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_at_event: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MessageContent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QueueMetadata>,
}

/// Canonical inbound payload carried in the `payload` field of a stream
/// entry on `queue:to_secretary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct QueueMessage {
    /// Telegram user id.
    pub user_id: i64,
    pub source: QueueMessageSource,
    #[serde(rename = "type")]
    pub message_type: QueueMessageType,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

impl QueueMessage {
    /// Whether this entry is a scheduler-originated reminder trigger.
    pub fn is_reminder_trigger(&self) -> bool {
        self.source == QueueMessageSource::Cron
            && self.message_type == QueueMessageType::Tool
            && self
                .content
                .metadata
                .as_ref()
                .and_then(|m| m.tool_name.as_deref())
                == Some(REMINDER_TRIGGER_TOOL)
    }

    /// Extract the trigger event. Returns `None` for ordinary messages or
    /// when the trigger metadata is incomplete.
    pub fn trigger_event(&self) -> Option<TriggerEvent> {
        if !self.is_reminder_trigger() {
            return None;
        }
        let meta = self.content.metadata.as_ref()?;
        Some(TriggerEvent {
            user_id: self.user_id,
            assistant_id: meta.assistant_id?,
            reminder_id: meta.reminder_id?,
            reminder_type: meta.reminder_type.clone().unwrap_or_default(),
            payload: meta.payload.clone().unwrap_or(Value::Null),
            triggered_at: meta.triggered_at_event.unwrap_or(self.timestamp),
            message: self.content.message.clone(),
        })
    }
}

/// Fully resolved scheduler trigger, handed to the agent pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerEvent {
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub reminder_id: Uuid,
    pub reminder_type: String,
    pub payload: Value,
    pub triggered_at: DateTime<Utc>,
    pub message: String,
}

/// Outbound payload pushed to `queue:to_telegram`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub user_id: i64,
    pub status: String,
    pub response: String,
    pub source: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ResponsePayload {
    pub fn success(
        user_id: i64,
        text: impl Into<String>,
        response: impl Into<String>,
        source: &str,
        message_type: &str,
        metadata: Value,
    ) -> Self {
        Self {
            user_id,
            status: "success".to_string(),
            response: response.into(),
            source: source.to_string(),
            message_type: message_type.to_string(),
            text: Some(text.into()),
            error: None,
            metadata,
        }
    }

    /// Error payload shown to the user; `error` keeps the internal detail
    /// for the output queue while `response` stays presentable.
    pub fn error(
        user_id: i64,
        error_kind: &str,
        detail: impl Into<String>,
        source: &str,
        metadata: Value,
    ) -> Self {
        Self {
            user_id,
            status: "error".to_string(),
            response: format!(
                "Message processing failed due to an internal error: {error_kind}"
            ),
            source: source.to_string(),
            message_type: "error".to_string(),
            text: None,
            error: Some(detail.into()),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_json() -> serde_json::Value {
        serde_json::json!({
            "user_id": 42,
            "source": "cron",
            "type": "tool",
            "timestamp": "2025-01-01T12:00:00Z",
            "content": {
                "message": "call mom",
                "metadata": {
                    "tool_name": "reminder_trigger",
                    "assistant_id": "7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f",
                    "reminder_id": "0f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f",
                    "reminder_type": "one_time",
                    "payload": {"text": "call mom"},
                    "triggered_at_event": "2025-01-01T12:00:01Z"
                }
            }
        })
    }

    #[test]
    fn classifies_reminder_triggers() {
        let msg: QueueMessage = serde_json::from_value(trigger_json()).unwrap();
        assert!(msg.is_reminder_trigger());
        let trigger = msg.trigger_event().unwrap();
        assert_eq!(trigger.user_id, 42);
        assert_eq!(trigger.reminder_type, "one_time");
        assert_eq!(trigger.message, "call mom");
    }

    #[test]
    fn plain_human_message_is_not_a_trigger() {
        let msg: QueueMessage = serde_json::from_value(serde_json::json!({
            "user_id": 42,
            "source": "telegram",
            "type": "human",
            "timestamp": "2025-01-01T12:00:00Z",
            "content": {"message": "hi"}
        }))
        .unwrap();
        assert!(!msg.is_reminder_trigger());
        assert!(msg.trigger_event().is_none());
    }

    #[test]
    fn unknown_top_level_fields_are_rejected() {
        let res: Result<QueueMessage, _> = serde_json::from_value(serde_json::json!({
            "user_id": 42,
            "source": "telegram",
            "type": "human",
            "timestamp": "2025-01-01T12:00:00Z",
            "content": {"message": "hi"},
            "surprise": true
        }));
        assert!(res.is_err());
    }

    #[test]
    fn incomplete_trigger_metadata_yields_no_event() {
        let mut json = trigger_json();
        json["content"]["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("reminder_id");
        let msg: QueueMessage = serde_json::from_value(json).unwrap();
        assert!(msg.is_reminder_trigger());
        assert!(msg.trigger_event().is_none());
    }

    #[test]
    fn error_payload_names_the_error_kind() {
        let payload = ResponsePayload::error(
            7,
            "ProcessingError",
            "boom",
            "telegram",
            Value::Null,
        );
        assert_eq!(payload.status, "error");
        assert!(payload
            .response
            .ends_with("internal error: ProcessingError"));
        let rendered = serde_json::to_value(&payload).unwrap();
        assert_eq!(rendered["type"], "error");
    }
}
