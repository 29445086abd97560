//! Tool system for agent tool calling.
//!
//! Each handler is built per `(user, assistant)` by the [`factory`] and
//! carries that context; handlers never share mutable state across users.
//! Errors surface as typed [`ToolError`]s which the graph folds into
//! tool-role messages so the model can recover.

pub mod calendar;
pub mod factory;
pub mod memory;
pub mod reminders;
pub mod sub_assistant;
pub mod time;
pub mod web_search;

use async_trait::async_trait;
use serde_json::Value;

use crate::provider::ToolSchema;

/// Typed tool failure. `code` is stable; `message` is user-presentable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("INVALID_INPUT", message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new("API_ERROR", message)
    }
}

/// Uniform contract every capability handler implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name exposed to the LLM; comes from the tool record, not the code.
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn args_schema(&self) -> Value;
    /// Execute with already-parsed JSON arguments.
    async fn invoke(&self, args: Value) -> Result<String, ToolError>;
}

/// Convert a set of handlers to API-level tool definitions.
pub fn to_schemas(tools: &[std::sync::Arc<dyn Tool>]) -> Vec<ToolSchema> {
    tools
        .iter()
        .map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.args_schema(),
        })
        .collect()
}

/// Pull a required string argument out of the args object.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::invalid_input(format!("missing required argument '{key}'")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}
