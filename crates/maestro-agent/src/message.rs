//! In-memory message representation of the working context window.

use serde::{Deserialize, Serialize};

use crate::provider::ToolCall;

/// One message of the live window. `db_id` is the data-plane row id; it is
/// present for loaded history and set on newly persisted messages, and it
/// is the handle summarization uses to drop messages from the window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum AgentMessage {
    Human {
        #[serde(skip_serializing_if = "Option::is_none")]
        db_id: Option<i64>,
        content: String,
    },
    Ai {
        #[serde(skip_serializing_if = "Option::is_none")]
        db_id: Option<i64>,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        #[serde(skip_serializing_if = "Option::is_none")]
        db_id: Option<i64>,
        content: String,
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
}

impl AgentMessage {
    pub fn human(content: impl Into<String>) -> Self {
        AgentMessage::Human {
            db_id: None,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        AgentMessage::Ai {
            db_id: None,
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: Option<String>,
    ) -> Self {
        AgentMessage::Tool {
            db_id: None,
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            tool_name,
        }
    }

    pub fn db_id(&self) -> Option<i64> {
        match self {
            AgentMessage::Human { db_id, .. }
            | AgentMessage::Ai { db_id, .. }
            | AgentMessage::Tool { db_id, .. } => *db_id,
        }
    }

    pub fn set_db_id(&mut self, id: i64) {
        match self {
            AgentMessage::Human { db_id, .. }
            | AgentMessage::Ai { db_id, .. }
            | AgentMessage::Tool { db_id, .. } => *db_id = Some(id),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            AgentMessage::Human { content, .. }
            | AgentMessage::Ai { content, .. }
            | AgentMessage::Tool { content, .. } => content,
        }
    }

    /// Short type tag used when serializing history for summarization.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AgentMessage::Human { .. } => "Human",
            AgentMessage::Ai { .. } => "AI",
            AgentMessage::Tool { .. } => "Tool",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, AgentMessage::Human { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_id_is_settable_once_persisted() {
        let mut msg = AgentMessage::human("hi");
        assert_eq!(msg.db_id(), None);
        msg.set_db_id(7);
        assert_eq!(msg.db_id(), Some(7));
    }

    #[test]
    fn type_tags_match_summary_serialization() {
        assert_eq!(AgentMessage::human("x").type_tag(), "Human");
        assert_eq!(AgentMessage::ai("x", Vec::new()).type_tag(), "AI");
        assert_eq!(AgentMessage::tool("x", "c1", None).type_tag(), "Tool");
    }
}
