//! A fully built agent instance: one assistant configuration bound to one
//! user, with its compiled graph and tool handlers.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use maestro_core::Ctx;
use maestro_protocol::TriggerEvent;
use maestro_rest::models::Assistant;

use crate::error::AgentError;
use crate::graph::AgentGraph;
use crate::message::AgentMessage;
use crate::state::AgentState;

#[derive(Debug)]
pub struct AgentInstance {
    pub assistant: Assistant,
    pub user_id: i64,
    pub loaded_at: DateTime<Utc>,
    graph: AgentGraph,
    llm_context_size: u32,
    /// Serializes runs for this `(assistant, user)` pair — history causality
    /// depends on one-at-a-time processing within a pair.
    run_lock: Mutex<()>,
}

impl AgentInstance {
    pub fn new(assistant: Assistant, user_id: i64, graph: AgentGraph, llm_context_size: u32) -> Self {
        Self {
            assistant,
            user_id,
            loaded_at: Utc::now(),
            graph,
            llm_context_size,
            run_lock: Mutex::new(()),
        }
    }

    pub fn assistant_id(&self) -> Uuid {
        self.assistant.id
    }

    pub fn name(&self) -> &str {
        &self.assistant.name
    }

    /// Process a user utterance through the full pipeline.
    pub async fn process_message(
        &self,
        ctx: &Ctx,
        text: &str,
    ) -> Result<Option<String>, AgentError> {
        self.process_incoming(ctx, AgentMessage::human(text), None).await
    }

    /// Process a tool-sourced event that is not a reminder trigger (e.g. a
    /// frontend-originated tool result). The event timestamp doubles as
    /// the synthetic tool-call id, as for triggers.
    pub async fn process_tool_event(
        &self,
        ctx: &Ctx,
        text: &str,
        tool_name: Option<String>,
        event_timestamp: i64,
    ) -> Result<Option<String>, AgentError> {
        let incoming = AgentMessage::tool(text, event_timestamp.to_string(), tool_name);
        self.process_incoming(ctx, incoming, None).await
    }

    async fn process_incoming(
        &self,
        ctx: &Ctx,
        incoming: AgentMessage,
        trigger: Option<TriggerEvent>,
    ) -> Result<Option<String>, AgentError> {
        let _serialized = self.run_lock.lock().await;
        let mut state = AgentState::new(
            ctx.clone(),
            self.user_id,
            self.assistant.id,
            self.llm_context_size,
            incoming,
        );
        if let Some(event) = trigger {
            state = state.with_trigger(event);
        }
        info!(
            assistant = %self.assistant.name,
            user_id = self.user_id,
            "processing incoming message"
        );
        self.graph.run(&mut state).await
    }

    /// Process a scheduler trigger through the same pipeline. The event
    /// becomes a tool-role message keyed by the trigger timestamp, matching
    /// how non-user sources enter a conversation.
    pub async fn process_trigger(
        &self,
        ctx: &Ctx,
        event: TriggerEvent,
    ) -> Result<Option<String>, AgentError> {
        let incoming = AgentMessage::tool(
            event.message.clone(),
            event.triggered_at.timestamp().to_string(),
            Some(maestro_protocol::REMINDER_TRIGGER_TOOL.to_string()),
        );
        self.process_incoming(ctx, incoming, Some(event)).await
    }
}
