//! Reminder tools: create, list, delete.
//!
//! Creation is where local wall-clock input becomes UTC storage: one-time
//! triggers go through the timezone conversion, recurring cron expressions
//! get their numeric hour translated exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use maestro_core::{timeutil, Ctx};
use maestro_core::logging::EventType;
use maestro_rest::models::{ReminderCreate, ReminderKind, ReminderStatus};
use maestro_rest::DataPlane;

use super::{optional_str, required_str, Tool, ToolError};

pub struct ReminderCreateTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) assistant_id: Uuid,
    pub(crate) data_plane: Arc<dyn DataPlane>,
}

#[async_trait]
impl Tool for ReminderCreateTool {
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
                "type": {
                    "type": "string",
                    "enum": ["one_time", "recurring"],
                    "description": "Reminder kind."
                },
                "payload": {
                    "type": "string",
                    "description": "Reminder content as a JSON string, e.g. {\"text\": \"call mom\"}."
                },
                "trigger_at": {
                    "type": "string",
                    "description": "Local date-time 'YYYY-MM-DD HH:MM' for one_time reminders. Requires timezone."
                },
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone of trigger_at, or of the hour field of the cron expression."
                },
                "cron_expression": {
                    "type": "string",
                    "description": "5-field cron expression for recurring reminders, e.g. '0 10 * * *'."
                }
            },
            "required": ["type", "payload"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let kind_str = required_str(&args, "type")?;
        let payload_str = required_str(&args, "payload")?;
        let trigger_at = optional_str(&args, "trigger_at");
        let timezone = optional_str(&args, "timezone");
        let cron_expression = optional_str(&args, "cron_expression");

        let payload: Value = serde_json::from_str(payload_str)
            .map_err(|_| ToolError::invalid_input("payload must be a valid JSON string"))?;

        let (kind, trigger_at_utc, final_cron) = match kind_str {
            "one_time" => {
                let (at, tz) = match (trigger_at, timezone) {
                    (Some(at), Some(tz)) => (at, tz),
                    _ => {
                        return Err(ToolError::invalid_input(
                            "one_time reminders require trigger_at and timezone",
                        ))
                    }
                };
                if cron_expression.is_some() {
                    return Err(ToolError::invalid_input(
                        "one_time reminders must not set cron_expression",
                    ));
                }
                let utc = timeutil::local_datetime_to_utc(at, tz)
                    .map_err(|e| ToolError::invalid_input(e.to_string()))?;
                (ReminderKind::OneTime, Some(utc), None)
            }
            "recurring" => {
                let cron = cron_expression.ok_or_else(|| {
                    ToolError::invalid_input("recurring reminders require cron_expression")
                })?;
                if trigger_at.is_some() {
                    return Err(ToolError::invalid_input(
                        "recurring reminders must not set trigger_at",
                    ));
                }
                let stored = match timezone {
                    Some(tz) => {
                        let converted = timeutil::cron_local_to_utc(cron, tz);
                        if converted != cron {
                            info!(
                                original = cron,
                                converted = %converted,
                                timezone = tz,
                                "translated cron hour to UTC"
                            );
                        }
                        converted
                    }
                    None => cron.to_string(),
                };
                (ReminderKind::Recurring, None, Some(stored))
            }
            other => {
                return Err(ToolError::invalid_input(format!(
                    "type must be 'one_time' or 'recurring', got '{other}'"
                )))
            }
        };

        let create = ReminderCreate {
            user_id: self.user_id,
            assistant_id: self.assistant_id,
            kind,
            payload,
            status: ReminderStatus::Active,
            trigger_at: trigger_at_utc,
            cron_expression: final_cron,
            timezone: timezone.map(String::from),
        };

        let ctx = Ctx::new().with_user(self.user_id);
        let reminder = self
            .data_plane
            .create_reminder(&ctx, &create)
            .await
            .map_err(|e| ToolError::api(format!("failed to create reminder: {e}")))?;

        info!(
            reminder_id = %reminder.id,
            user_id = self.user_id,
            event_type = %EventType::ToolCall,
            "reminder created"
        );
        Ok("Reminder created.".to_string())
    }
}

pub struct ReminderListTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) data_plane: Arc<dyn DataPlane>,
}

#[async_trait]
impl Tool for ReminderListTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
        let ctx = Ctx::new().with_user(self.user_id);
        let reminders = self
            .data_plane
            .get_user_active_reminders(&ctx, self.user_id)
            .await
            .map_err(|e| ToolError::api(format!("failed to list reminders: {e}")))?;

        if reminders.is_empty() {
            return Ok("You have no active reminders.".to_string());
        }

        let mut lines = Vec::with_capacity(reminders.len());
        for (i, r) in reminders.iter().enumerate() {
            let when = match (r.kind, r.trigger_at.as_ref(), r.cron_expression.as_deref()) {
                (ReminderKind::OneTime, Some(at), _) => {
                    format!("once at {}", at.format("%Y-%m-%d %H:%M UTC"))
                }
                (ReminderKind::Recurring, _, Some(cron)) => format!("recurring '{cron}' (UTC)"),
                _ => "misconfigured schedule".to_string(),
            };
            lines.push(format!(
                "{}. {} — {} (id: {})",
                i + 1,
                payload_summary(&r.payload),
                when,
                r.id
            ));
        }
        Ok(lines.join("\n"))
    }
}

pub struct ReminderDeleteTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) data_plane: Arc<dyn DataPlane>,
}

#[async_trait]
impl Tool for ReminderDeleteTool {
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
                "reminder_id": {
                    "type": "string",
                    "description": "UUID of the reminder to delete."
                }
            },
            "required": ["reminder_id"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let raw = required_str(&args, "reminder_id")?;
        let id = Uuid::parse_str(raw)
            .map_err(|_| ToolError::invalid_input(format!("'{raw}' is not a valid UUID")))?;

        let ctx = Ctx::new().with_user(self.user_id);
        self.data_plane
            .delete_reminder(&ctx, id)
            .await
            .map_err(|e| ToolError::api(format!("failed to delete reminder: {e}")))?;
        Ok(format!("Reminder {id} deleted."))
    }
}

/// Human-readable one-liner of a reminder payload.
fn payload_summary(payload: &Value) -> String {
    if let Some(text) = payload.get("text").and_then(|t| t.as_str()) {
        return text.to_string();
    }
    let compact = payload.to_string();
    if compact.chars().count() > 50 {
        warn!(len = compact.len(), "reminder payload has no 'text' field, truncating");
        let head: String = compact.chars().take(50).collect();
        format!("{head}…")
    } else {
        compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_summary_prefers_text_field() {
        assert_eq!(payload_summary(&json!({"text": "call mom"})), "call mom");
        assert_eq!(payload_summary(&json!({"a": 1})), "{\"a\":1}");
    }
}
