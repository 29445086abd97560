//! Agent run state and the tagged updates middlewares emit.

use maestro_core::Ctx;
use maestro_protocol::TriggerEvent;
use maestro_rest::models::Memory;
use uuid::Uuid;

use crate::message::AgentMessage;

/// Mutable state threaded through one graph invocation.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// Live context window, canonical history order.
    pub messages: Vec<AgentMessage>,
    pub user_id: i64,
    pub assistant_id: Uuid,
    pub llm_context_size: u32,
    pub triggered_event: Option<TriggerEvent>,
    /// Data-plane id of the message that started this run.
    pub initial_message_id: Option<i64>,
    pub current_summary_content: Option<String>,
    pub newly_summarized_message_ids: Vec<i64>,
    pub relevant_memories: Vec<Memory>,
    pub error_occurred: bool,
    pub ctx: Ctx,
}

impl AgentState {
    pub fn new(
        ctx: Ctx,
        user_id: i64,
        assistant_id: Uuid,
        llm_context_size: u32,
        initial_message: AgentMessage,
    ) -> Self {
        Self {
            messages: vec![initial_message],
            user_id,
            assistant_id,
            llm_context_size,
            triggered_event: None,
            initial_message_id: None,
            current_summary_content: None,
            newly_summarized_message_ids: Vec::new(),
            relevant_memories: Vec::new(),
            error_occurred: false,
            ctx,
        }
    }

    pub fn with_trigger(mut self, event: TriggerEvent) -> Self {
        self.triggered_event = Some(event);
        self
    }

    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Append(message) => self.messages.push(message),
            StateUpdate::PrependHistory(history) => {
                let mut combined = history;
                combined.append(&mut self.messages);
                self.messages = combined;
            }
            StateUpdate::Remove(id) => {
                self.messages.retain(|m| m.db_id() != Some(id));
            }
            StateUpdate::AssignDbId { index, id } => {
                if let Some(message) = self.messages.get_mut(index) {
                    message.set_db_id(id);
                }
            }
            StateUpdate::SetInitialMessageId(id) => self.initial_message_id = Some(id),
            StateUpdate::SetSummary(text) => self.current_summary_content = Some(text),
            StateUpdate::SetSummarizedIds(ids) => self.newly_summarized_message_ids = ids,
            StateUpdate::SetMemories(memories) => self.relevant_memories = memories,
            StateUpdate::SetErrorOccurred => self.error_occurred = true,
        }
    }

    pub fn apply_all(&mut self, updates: Vec<StateUpdate>) {
        for update in updates {
            self.apply(update);
        }
    }

    /// Content of the newest human message with non-empty content, used as
    /// the memory-retrieval query.
    pub fn last_human_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_human() && !m.content().trim().is_empty())
            .map(|m| m.content())
    }
}

/// Explicit, testable state mutations. Middlewares return these instead of
/// touching the state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Append(AgentMessage),
    PrependHistory(Vec<AgentMessage>),
    /// Drop the message with this data-plane id from the live window.
    Remove(i64),
    AssignDbId {
        index: usize,
        id: i64,
    },
    SetInitialMessageId(i64),
    SetSummary(String),
    SetSummarizedIds(Vec<i64>),
    SetMemories(Vec<Memory>),
    SetErrorOccurred,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AgentState {
        AgentState::new(
            Ctx::new(),
            42,
            Uuid::nil(),
            8192,
            AgentMessage::human("hello"),
        )
    }

    #[test]
    fn prepend_keeps_the_new_message_last() {
        let mut s = state();
        let mut history = AgentMessage::human("old");
        history.set_db_id(1);
        s.apply(StateUpdate::PrependHistory(vec![history]));
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].db_id(), Some(1));
        assert_eq!(s.messages[1].content(), "hello");
    }

    #[test]
    fn remove_only_touches_matching_db_ids() {
        let mut s = state();
        let mut old = AgentMessage::human("old");
        old.set_db_id(5);
        s.apply(StateUpdate::PrependHistory(vec![old]));
        s.apply(StateUpdate::Remove(5));
        assert_eq!(s.messages.len(), 1);
        s.apply(StateUpdate::Remove(999));
        assert_eq!(s.messages.len(), 1);
    }

    #[test]
    fn last_human_content_skips_empty_and_non_human() {
        let mut s = state();
        s.apply(StateUpdate::Append(AgentMessage::ai("answer", Vec::new())));
        s.apply(StateUpdate::Append(AgentMessage::human("   ")));
        assert_eq!(s.last_human_content(), Some("hello"));
    }

    #[test]
    fn assign_db_id_targets_by_index() {
        let mut s = state();
        s.apply(StateUpdate::AssignDbId { index: 0, id: 11 });
        assert_eq!(s.messages[0].db_id(), Some(11));
    }
}
