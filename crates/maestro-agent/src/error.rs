use thiserror::Error;

use crate::provider::ProviderError;
use crate::tools::ToolError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No secretary assigned for user {user_id}")]
    NoSecretaryAssigned { user_id: i64 },

    #[error("Unsupported assistant type for {assistant_id}: {kind}")]
    AssistantTypeUnsupported { assistant_id: String, kind: String },

    #[error("Data-plane call failed: {0}")]
    DataPlane(#[from] maestro_rest::RestError),

    #[error("Model call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Model step timed out after {seconds}s")]
    StepTimeout { seconds: u64 },

    #[error("Run exceeded its wall-clock budget")]
    RunDeadline,

    #[error("Tool loop exceeded {max_steps} steps without a final response")]
    StepLimit { max_steps: usize },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Message processing failed: {0}")]
    Processing(String),
}

impl AgentError {
    /// Error-kind name surfaced to users in error payloads, mirroring the
    /// exception-class-name convention of the queue contract.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NoSecretaryAssigned { .. } => "NoSecretaryAssigned",
            AgentError::AssistantTypeUnsupported { .. } => "AssistantTypeUnsupported",
            AgentError::DataPlane(_) => "DataPlaneError",
            AgentError::Provider(_) => "ProviderError",
            AgentError::StepTimeout { .. } => "StepTimeout",
            AgentError::RunDeadline => "RunDeadline",
            AgentError::StepLimit { .. } => "StepLimit",
            AgentError::Tool(_) => "ToolError",
            AgentError::Processing(_) => "MessageProcessingError",
        }
    }

    /// Domain errors are terminal results of a run; retrying them cannot
    /// succeed, so the orchestrator treats them like invalid input.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            AgentError::NoSecretaryAssigned { .. }
                | AgentError::AssistantTypeUnsupported { .. }
                | AgentError::Tool(_)
        )
    }
}
