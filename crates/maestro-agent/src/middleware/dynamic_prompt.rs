//! Injects the formatted system prompt into every outgoing model request.

use async_trait::async_trait;

use super::Middleware;
use crate::error::AgentError;
use crate::prompts::render_system_prompt;
use crate::provider::ChatRequest;
use crate::state::AgentState;

pub struct DynamicPrompt {
    template: String,
}

impl DynamicPrompt {
    pub fn new(template: String) -> Self {
        Self { template }
    }
}

#[async_trait]
impl Middleware for DynamicPrompt {
    fn name(&self) -> &'static str {
        "dynamic_prompt"
    }

    fn wrap_model_call(
        &self,
        state: &AgentState,
        request: &mut ChatRequest,
    ) -> Result<(), AgentError> {
        request.system = render_system_prompt(
            &self.template,
            state.current_summary_content.as_deref(),
            &state.relevant_memories,
        );
        Ok(())
    }
}
