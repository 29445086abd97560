//! Tracing bootstrap and the canonical `event_type` vocabulary.

use std::fmt;

/// Closed set of event types attached to structured log records so that
/// downstream aggregation can group lines without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RequestIn,
    RequestOut,
    QueuePush,
    QueuePop,
    JobStart,
    JobEnd,
    LlmCall,
    ToolCall,
    Error,
    Info,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestIn => "request_in",
            EventType::RequestOut => "request_out",
            EventType::QueuePush => "queue_push",
            EventType::QueuePop => "queue_pop",
            EventType::JobStart => "job_start",
            EventType::JobEnd => "job_end",
            EventType::LlmCall => "llm_call",
            EventType::ToolCall => "tool_call",
            EventType::Error => "error",
            EventType::Info => "info",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the global subscriber. `service` becomes the default target
/// filter, `level` the fallback when `RUST_LOG` is unset.
pub fn init(service: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "{}={},maestro={}",
            service.replace('-', "_"),
            level,
            level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
