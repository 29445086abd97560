//! Retrieves relevant long-term memories before each model step.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use maestro_rest::RagService;

use super::Middleware;
use crate::error::AgentError;
use crate::state::{AgentState, StateUpdate};

pub struct MemoryRetrieval {
    rag: Arc<dyn RagService>,
    limit: usize,
    threshold: f64,
}

impl MemoryRetrieval {
    pub fn new(rag: Arc<dyn RagService>, limit: usize, threshold: f64) -> Self {
        Self {
            rag,
            limit,
            threshold,
        }
    }
}

#[async_trait]
impl Middleware for MemoryRetrieval {
    fn name(&self) -> &'static str {
        "memory_retrieval"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        let Some(query) = state.last_human_content() else {
            debug!(user_id = state.user_id, "no user content to query memories with");
            return Ok(Vec::new());
        };

        match self
            .rag
            .search_memories(&state.ctx, query, state.user_id, self.limit, self.threshold)
            .await
        {
            Ok(memories) => {
                debug!(
                    count = memories.len(),
                    user_id = state.user_id,
                    "retrieved relevant memories"
                );
                Ok(vec![StateUpdate::SetMemories(memories)])
            }
            Err(e) => {
                // Memories enrich the prompt; their absence never fails a run.
                warn!(error = %e, user_id = state.user_id, "memory retrieval failed");
                Ok(Vec::new())
            }
        }
    }
}
