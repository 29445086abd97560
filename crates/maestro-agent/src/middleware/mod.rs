//! The ordered middleware stack around the model/tool loop.
//!
//! Hooks, in execution order within one invocation:
//! `before_agent` (once) → per model step: `before_model` →
//! `wrap_model_call` → model → `after_model` → tool execution →
//! `after_agent` (always, even on failure).
//!
//! Hooks read the state and return [`StateUpdate`]s; the graph applies
//! them, which keeps every mutation explicit and testable.

pub mod context_loader;
pub mod dynamic_prompt;
pub mod finalizer;
pub mod memory_retrieval;
pub mod message_saver;
pub mod response_saver;
pub mod summarization;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::provider::{ChatRequest, ChatResponse};
use crate::state::{AgentState, StateUpdate};

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once, before the first model step.
    async fn before_agent(&self, _state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        Ok(Vec::new())
    }

    /// Runs before every model step.
    async fn before_model(&self, _state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        Ok(Vec::new())
    }

    /// Intercept the outgoing model request. Synchronous by design: request
    /// shaping must not do I/O.
    fn wrap_model_call(
        &self,
        _state: &AgentState,
        _request: &mut ChatRequest,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    /// Runs after every model step, before tool execution.
    async fn after_model(
        &self,
        _state: &AgentState,
        _response: &ChatResponse,
    ) -> Result<Vec<StateUpdate>, AgentError> {
        Ok(Vec::new())
    }

    /// Runs when the invocation ends, regardless of outcome.
    async fn after_agent(&self, _state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        Ok(Vec::new())
    }
}

pub use context_loader::ContextLoader;
pub use dynamic_prompt::DynamicPrompt;
pub use finalizer::Finalizer;
pub use memory_retrieval::MemoryRetrieval;
pub use message_saver::MessageSaver;
pub use response_saver::ResponseSaver;
pub use summarization::Summarization;
