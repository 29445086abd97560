//! Current-time tool. Pure; the only handler with no I/O.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::{optional_str, Tool, ToolError};

pub struct TimeTool {
    name: String,
    description: String,
}

impl TimeTool {
    pub fn new(name: String, description: String) -> Self {
        Self { name, description }
    }
}

#[async_trait]
impl Tool for TimeTool {
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
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone, e.g. 'Europe/Moscow'. Defaults to UTC."
                }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let timezone = optional_str(&args, "timezone").unwrap_or("UTC");
        let tz = Tz::from_str(timezone)
            .map_err(|_| ToolError::invalid_input(format!("unknown timezone: {timezone}")))?;
        let now = Utc::now().with_timezone(&tz);
        Ok(now.format("%Y-%m-%d %H:%M:%S %Z").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> TimeTool {
        TimeTool::new("current_time".to_string(), "Get the time".to_string())
    }

    #[tokio::test]
    async fn defaults_to_utc() {
        let out = tool().invoke(json!({})).await.unwrap();
        assert!(out.ends_with("UTC"));
    }

    #[tokio::test]
    async fn honours_requested_zone() {
        let out = tool()
            .invoke(json!({"timezone": "Asia/Tokyo"}))
            .await
            .unwrap();
        assert!(out.ends_with("JST"));
    }

    #[tokio::test]
    async fn rejects_unknown_zone() {
        let err = tool()
            .invoke(json!({"timezone": "Mars/Olympus"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_INPUT");
    }
}
