//! Settles the initial message's status once the run ends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use maestro_rest::models::{MessageStatus, MessageUpdate};
use maestro_rest::DataPlane;

use super::Middleware;
use crate::error::AgentError;
use crate::state::{AgentState, StateUpdate};

pub struct Finalizer {
    data_plane: Arc<dyn DataPlane>,
}

impl Finalizer {
    pub fn new(data_plane: Arc<dyn DataPlane>) -> Self {
        Self { data_plane }
    }
}

#[async_trait]
impl Middleware for Finalizer {
    fn name(&self) -> &'static str {
        "finalizer"
    }

    async fn after_agent(&self, state: &AgentState) -> Result<Vec<StateUpdate>, AgentError> {
        let Some(message_id) = state.initial_message_id else {
            debug!("no initial message id, nothing to finalize");
            return Ok(Vec::new());
        };

        let status = if state.error_occurred {
            MessageStatus::Error
        } else {
            MessageStatus::Processed
        };

        let update = MessageUpdate {
            status: Some(status),
            summary_id: None,
        };
        match self.data_plane.update_message(&state.ctx, message_id, &update).await {
            Ok(_) => info!(message_id, ?status, "initial message finalized"),
            Err(e) => warn!(message_id, error = %e, "failed to finalize initial message"),
        }
        Ok(Vec::new())
    }
}
