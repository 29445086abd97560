//! Calendar tools backed by the external calendar service.
//!
//! The service owns OAuth; when it reports an expired/revoked grant the
//! tool fetches a fresh authorization URL and hands it to the user instead
//! of failing the run.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use maestro_core::logging::EventType;

use super::{optional_str, required_str, Tool, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    Create,
    List,
}

pub struct CalendarTool {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) user_id: i64,
    pub(crate) action: CalendarAction,
    client: reqwest::Client,
    base_url: String,
}

impl CalendarTool {
    pub fn new(
        name: String,
        description: String,
        user_id: i64,
        action: CalendarAction,
        base_url: String,
    ) -> Self {
        Self {
            name,
            description,
            user_id,
            action,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch a fresh OAuth URL so the user can re-authorize.
    async fn request_auth_url(&self) -> Result<String, ToolError> {
        let response = self
            .client
            .get(format!("{}/auth/url/{}", self.base_url, self.user_id))
            .send()
            .await
            .map_err(|e| ToolError::api(format!("calendar auth request failed: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::api(format!("undecodable auth response: {e}")))?;
        body.get("auth_url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::api("calendar service returned no auth_url"))
    }

    async fn recover_from_invalid_grant(&self) -> Result<String, ToolError> {
        warn!(user_id = self.user_id, "calendar grant invalid, requesting re-auth URL");
        let url = self.request_auth_url().await?;
        Ok(format!(
            "Your calendar authorization expired. Re-authorize here: {url}"
        ))
    }
}

#[async_trait]
impl Tool for CalendarTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        match self.action {
            CalendarAction::Create => json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Event title."},
                    "start": {"type": "string", "description": "Start, ISO-8601."},
                    "end": {"type": "string", "description": "End, ISO-8601."},
                    "description": {"type": "string", "description": "Optional details."}
                },
                "required": ["summary", "start", "end"]
            }),
            CalendarAction::List => json!({
                "type": "object",
                "properties": {
                    "time_min": {"type": "string", "description": "Window start, ISO-8601."},
                    "time_max": {"type": "string", "description": "Window end, ISO-8601."}
                }
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let url = format!("{}/events/{}", self.base_url, self.user_id);
        let response = match self.action {
            CalendarAction::Create => {
                let summary = required_str(&args, "summary")?;
                let start = required_str(&args, "start")?;
                let end = required_str(&args, "end")?;
                let body = json!({
                    "summary": summary,
                    "start": start,
                    "end": end,
                    "description": optional_str(&args, "description"),
                });
                self.client.post(&url).json(&body).send().await
            }
            CalendarAction::List => {
                let mut request = self.client.get(&url);
                if let Some(min) = optional_str(&args, "time_min") {
                    request = request.query(&[("time_min", min)]);
                }
                if let Some(max) = optional_str(&args, "time_max") {
                    request = request.query(&[("time_max", max)]);
                }
                request.send().await
            }
        }
        .map_err(|e| ToolError::api(format!("calendar request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 500 && body.contains("invalid_grant") {
            return self.recover_from_invalid_grant().await;
        }
        if status.as_u16() == 401 {
            let url = self.request_auth_url().await?;
            return Ok(format!("Calendar access requires authorization: {url}"));
        }
        if !status.is_success() {
            return Err(ToolError::api(format!(
                "calendar service responded {status}: {body}"
            )));
        }

        match self.action {
            CalendarAction::Create => {
                info!(user_id = self.user_id, event_type = %EventType::ToolCall, "calendar event created");
                Ok("Calendar event created.".to_string())
            }
            CalendarAction::List => {
                let events: Vec<Value> = serde_json::from_str(&body).unwrap_or_default();
                if events.is_empty() {
                    return Ok("No upcoming calendar events.".to_string());
                }
                let lines: Vec<String> = events
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        let summary = e.get("summary").and_then(|v| v.as_str()).unwrap_or("(untitled)");
                        let start = e
                            .get("start")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown time");
                        format!("{}. {} — {}", i + 1, summary, start)
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
        }
    }
}
