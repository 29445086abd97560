//! Per-request correlation context.
//!
//! Carried explicitly through call sites instead of thread-local storage:
//! the orchestrator creates a [`Ctx`] when a queue message is popped, the
//! HTTP clients inject it into the `X-Correlation-ID` header, and log spans
//! pick up both fields.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header used to propagate the correlation id between services.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ctx {
    pub correlation_id: String,
    pub user_id: Option<i64>,
}

impl Ctx {
    /// Fresh context with a generated correlation id and no user bound yet.
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            user_id: None,
        }
    }

    /// Context adopted from an upstream correlation id (e.g. inbound header).
    pub fn from_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Tracing span covering one unit of work under this context.
    pub fn span(&self, name: &'static str) -> tracing::Span {
        match self.user_id {
            Some(uid) => tracing::info_span!(
                "ctx",
                op = name,
                correlation_id = %self.correlation_id,
                user_id = uid
            ),
            None => tracing::info_span!(
                "ctx",
                op = name,
                correlation_id = %self.correlation_id
            ),
        }
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_contexts_get_distinct_ids() {
        let a = Ctx::new();
        let b = Ctx::new();
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.user_id.is_none());
    }

    #[test]
    fn with_user_binds_id() {
        let ctx = Ctx::from_correlation_id("abc").with_user(42);
        assert_eq!(ctx.correlation_id, "abc");
        assert_eq!(ctx.user_id, Some(42));
    }
}
