//! Classification, dispatch and failure policy.

use std::sync::Arc;

use metrics::histogram;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use maestro_agent::{AgentError, AgentFactory};
use maestro_core::{metrics_defs, Ctx};
use maestro_core::logging::EventType;
use maestro_protocol::{QueueMessage, QueueMessageType, ResponsePayload};
use maestro_queue::{StreamClient, StreamEntry};

/// Result of handling one inbound payload, before queue bookkeeping.
#[derive(Debug)]
pub enum Outcome {
    /// Push the payload to the output stream, ack, clear the retry key.
    /// Covers both successes and terminal bad-data errors.
    Respond(ResponsePayload),
    /// Unusable payload with no addressable user: dead-letter immediately
    /// so nothing is silently dropped, then ack.
    DeadLetter {
        error_type: String,
        error_message: String,
    },
    /// Transient failure: leave unacked and count a retry; the pending
    /// entry is redelivered after the idle timeout.
    Retry {
        error_type: String,
        error_message: String,
        user_id: Option<i64>,
    },
}

/// The queue-independent half: parse, classify, dispatch. Kept separate
/// from the stream bookkeeping so it can be exercised without Redis.
pub struct Dispatcher {
    factory: Arc<AgentFactory>,
}

impl Dispatcher {
    pub fn new(factory: Arc<AgentFactory>) -> Self {
        Self { factory }
    }
}

pub struct Orchestrator {
    dispatcher: Dispatcher,
    queue: StreamClient,
    input_stream: String,
    output_stream: String,
    group: String,
    consumer: String,
    max_retries: u32,
    retry_window_secs: u64,
    pending_idle_ms: u64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<AgentFactory>,
        queue: StreamClient,
        input_stream: String,
        output_stream: String,
        group: String,
        consumer: String,
        max_retries: u32,
        retry_window_secs: u64,
        pending_idle_ms: u64,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(factory),
            queue,
            input_stream,
            output_stream,
            group,
            consumer,
            max_retries,
            retry_window_secs,
            pending_idle_ms,
        }
    }

    /// Consumer loop: reclaim idle pending entries, read new ones, process
    /// each, stop accepting work on cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.queue.ensure_group(&self.input_stream, &self.group).await {
            error!(error = %e, "could not ensure consumer group");
        }
        info!(
            input = %self.input_stream,
            output = %self.output_stream,
            consumer = %self.consumer,
            "orchestrator consuming"
        );

        loop {
            if cancel.is_cancelled() {
                info!("orchestrator stopping: shutdown requested");
                break;
            }

            let reclaimed = self
                .queue
                .claim_pending(
                    &self.input_stream,
                    &self.group,
                    &self.consumer,
                    self.pending_idle_ms,
                    10,
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "pending reclaim failed");
                    Vec::new()
                });
            for entry in reclaimed {
                self.process_entry(entry).await;
            }

            let entries = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.queue.read_new(&self.input_stream, &self.group, &self.consumer, 5000, 10) => {
                    match read {
                        Ok(entries) => entries,
                        Err(e) => {
                            error!(error = %e, "stream read failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                    }
                }
            };
            for entry in entries {
                self.process_entry(entry).await;
            }

            let _ = self.queue.observe_depth(&self.input_stream).await;
        }
    }

    /// Apply the failure policy around one consumed entry.
    pub async fn process_entry(&self, entry: StreamEntry) {
        info!(message_id = %entry.id, event_type = %EventType::QueuePop, "processing stream entry");
        let outcome = self.handle_payload(&entry.payload).await;

        match outcome {
            Outcome::Respond(payload) => {
                match serde_json::to_string(&payload) {
                    Ok(json) => {
                        if let Err(e) = self.queue.publish(&self.output_stream, &json).await {
                            error!(error = %e, message_id = %entry.id, "response publish failed");
                        }
                    }
                    Err(e) => error!(error = %e, "response payload does not serialize"),
                }
                self.settle(&entry.id).await;
            }
            Outcome::DeadLetter {
                error_type,
                error_message,
            } => {
                if let Err(e) = self
                    .queue
                    .send_to_dlq(
                        &self.input_stream,
                        &entry.id,
                        &entry.payload,
                        &error_type,
                        &error_message,
                        0,
                        None,
                    )
                    .await
                {
                    error!(error = %e, message_id = %entry.id, "dead-letter publish failed");
                }
                self.settle(&entry.id).await;
            }
            Outcome::Retry {
                error_type,
                error_message,
                user_id,
            } => {
                let count = match self
                    .queue
                    .incr_retry(&entry.id, self.retry_window_secs)
                    .await
                {
                    Ok(count) => count,
                    Err(e) => {
                        error!(error = %e, message_id = %entry.id, "retry accounting failed");
                        return;
                    }
                };
                if count >= self.max_retries {
                    warn!(
                        message_id = %entry.id,
                        retries = count,
                        error_type,
                        "retry budget exhausted, dead-lettering"
                    );
                    if let Err(e) = self
                        .queue
                        .send_to_dlq(
                            &self.input_stream,
                            &entry.id,
                            &entry.payload,
                            &error_type,
                            &error_message,
                            count,
                            user_id,
                        )
                        .await
                    {
                        error!(error = %e, message_id = %entry.id, "dead-letter publish failed");
                    }
                    histogram!(metrics_defs::MESSAGE_RETRIES).record(count as f64);
                    self.settle(&entry.id).await;
                } else {
                    // Not acked: the entry stays pending and is reclaimed
                    // after the idle timeout.
                    info!(
                        message_id = %entry.id,
                        attempt = count,
                        max = self.max_retries,
                        "leaving entry pending for redelivery"
                    );
                }
            }
        }
    }

    async fn settle(&self, message_id: &str) {
        if let Err(e) = self.queue.ack(&self.input_stream, &self.group, message_id).await {
            error!(error = %e, message_id, "ack failed");
        }
        if let Err(e) = self.queue.clear_retry(message_id).await {
            warn!(error = %e, message_id, "retry counter cleanup failed");
        }
    }

    /// Parse, classify and dispatch one payload. Pure with respect to the
    /// queue — all stream bookkeeping happens in [`Self::process_entry`].
    pub async fn handle_payload(&self, raw: &str) -> Outcome {
        self.dispatcher.handle_payload(raw).await
    }
}

impl Dispatcher {
    pub async fn handle_payload(&self, raw: &str) -> Outcome {
        // Best-effort user id for error routing, before strict parsing.
        let loose_user_id = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.get("user_id").and_then(Value::as_i64));

        let message: QueueMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed queue payload");
                return match loose_user_id {
                    Some(user_id) => Outcome::Respond(ResponsePayload::error(
                        user_id,
                        "InvalidPayload",
                        e.to_string(),
                        "unknown",
                        Value::Null,
                    )),
                    None => Outcome::DeadLetter {
                        error_type: "InvalidPayload".to_string(),
                        error_message: e.to_string(),
                    },
                };
            }
        };

        let ctx = Ctx::new().with_user(message.user_id);
        let span = ctx.span("handle_message");

        if message.is_reminder_trigger() {
            self.handle_trigger(&ctx, &message).instrument(span).await
        } else {
            self.handle_message(&ctx, &message).instrument(span).await
        }
    }

    async fn handle_trigger(&self, ctx: &Ctx, message: &QueueMessage) -> Outcome {
        let Some(trigger) = message.trigger_event() else {
            warn!(user_id = message.user_id, "trigger with incomplete metadata");
            return Outcome::Respond(ResponsePayload::error(
                message.user_id,
                "InvalidTrigger",
                "reminder trigger missing required metadata",
                "reminder_trigger",
                Value::Null,
            ));
        };
        let reminder_id = trigger.reminder_id;

        let secretary = match self.factory.get_user_secretary(ctx, message.user_id).await {
            Ok(secretary) => secretary,
            Err(e) => return self.agent_error_outcome(message, e),
        };

        match secretary.process_trigger(ctx, trigger).await {
            Ok(reply) => Outcome::Respond(ResponsePayload {
                user_id: message.user_id,
                status: "success".to_string(),
                response: reply.unwrap_or_default(),
                source: "reminder_trigger".to_string(),
                message_type: "assistant".to_string(),
                text: None,
                error: None,
                metadata: serde_json::json!({ "reminder_id": reminder_id }),
            }),
            Err(e) => self.agent_error_outcome(message, e),
        }
    }

    async fn handle_message(&self, ctx: &Ctx, message: &QueueMessage) -> Outcome {
        let text = message.content.message.clone();

        let secretary = match self.factory.get_user_secretary(ctx, message.user_id).await {
            Ok(secretary) => secretary,
            Err(e) => return self.agent_error_outcome(message, e),
        };

        let result = match message.message_type {
            QueueMessageType::Human => secretary.process_message(ctx, &text).await,
            QueueMessageType::Tool => {
                let tool_name = message
                    .content
                    .metadata
                    .as_ref()
                    .and_then(|m| m.tool_name.clone());
                secretary
                    .process_tool_event(ctx, &text, tool_name, message.timestamp.timestamp())
                    .await
            }
            QueueMessageType::Assistant | QueueMessageType::Error => {
                return Outcome::Respond(ResponsePayload::error(
                    message.user_id,
                    "UnsupportedMessageType",
                    format!("unsupported inbound type: {}", message.message_type.as_str()),
                    message.source.as_str(),
                    Value::Null,
                ));
            }
        };

        match result {
            Ok(reply) => Outcome::Respond(ResponsePayload::success(
                message.user_id,
                text,
                reply.unwrap_or_default(),
                message.source.as_str(),
                "assistant",
                metadata_value(message),
            )),
            Err(e) => self.agent_error_outcome(message, e),
        }
    }

    /// Domain errors are terminal: retrying cannot change the outcome, so
    /// they answer the user and settle the entry. Everything else counts
    /// against the retry budget.
    fn agent_error_outcome(&self, message: &QueueMessage, error: AgentError) -> Outcome {
        let kind = error.kind();
        if error.is_domain() {
            warn!(user_id = message.user_id, error = %error, "terminal domain error");
            Outcome::Respond(ResponsePayload::error(
                message.user_id,
                kind,
                error.to_string(),
                message.source.as_str(),
                metadata_value(message),
            ))
        } else {
            error!(user_id = message.user_id, error = %error, "processing failed, will retry");
            Outcome::Retry {
                error_type: kind.to_string(),
                error_message: error.to_string(),
                user_id: Some(message.user_id),
            }
        }
    }
}

fn metadata_value(message: &QueueMessage) -> Value {
    message
        .content
        .metadata
        .as_ref()
        .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use maestro_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use maestro_core::config::{AgentConfig, CalendarConfig, LlmConfig};
    use maestro_rest::models::{Assistant, AssistantKind};
    use maestro_rest::testing::{InMemoryDataPlane, InMemoryRag};

    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, ()>>>,
    }

    impl ScriptedProvider {
        fn answering(reply: &str) -> Self {
            Self {
                replies: Mutex::new(vec![Ok(reply.to_string())]),
            }
        }

        fn failing() -> Self {
            Self {
                replies: Mutex::new(vec![Err(())]),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(()));
            match next {
                Ok(content) => Ok(ChatResponse {
                    content,
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "stop".to_string(),
                    tool_calls: Vec::new(),
                }),
                Err(()) => Err(ProviderError::Unavailable("model down".to_string())),
            }
        }
    }

    fn secretary(id: Uuid) -> Assistant {
        Assistant {
            id,
            name: "ada".to_string(),
            model: "gpt-4o".to_string(),
            instructions: "Secretary. {summary_previous} {memories}".to_string(),
            is_secretary: true,
            assistant_type: AssistantKind::Llm,
            is_active: true,
            updated_at: Some(Utc::now()),
        }
    }

    fn dispatcher(data_plane: Arc<InMemoryDataPlane>, provider: ScriptedProvider) -> Dispatcher {
        let factory = AgentFactory::with_provider(
            data_plane,
            Arc::new(InMemoryRag::new()),
            Arc::new(provider),
            &LlmConfig::default(),
            &CalendarConfig::default(),
            AgentConfig::default(),
        );
        Dispatcher::new(factory)
    }

    fn human_payload(user_id: i64, text: &str) -> String {
        serde_json::json!({
            "user_id": user_id,
            "source": "telegram",
            "type": "human",
            "timestamp": "2025-01-01T12:00:00Z",
            "content": {"message": text}
        })
        .to_string()
    }

    #[tokio::test]
    async fn happy_path_message_produces_a_success_payload() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        data_plane.insert_assistant(secretary(secretary_id));
        data_plane.assign_secretary(42, secretary_id);

        let dispatcher = dispatcher(
            Arc::clone(&data_plane),
            ScriptedProvider::answering("hello!"),
        );
        let outcome = dispatcher.handle_payload(&human_payload(42, "hi")).await;

        match outcome {
            Outcome::Respond(payload) => {
                assert_eq!(payload.user_id, 42);
                assert_eq!(payload.status, "success");
                assert_eq!(payload.response, "hello!");
                assert_eq!(payload.message_type, "assistant");
                assert_eq!(payload.text.as_deref(), Some("hi"));
            }
            other => panic!("expected Respond, got {other:?}"),
        }

        // Both sides of the exchange are persisted.
        let messages = data_plane.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn reminder_trigger_routes_through_the_same_pipeline() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        let reminder_id = Uuid::new_v4();
        data_plane.insert_assistant(secretary(secretary_id));
        data_plane.assign_secretary(42, secretary_id);

        let dispatcher = dispatcher(
            Arc::clone(&data_plane),
            ScriptedProvider::answering("reminding you to call"),
        );
        let payload = serde_json::json!({
            "user_id": 42,
            "source": "cron",
            "type": "tool",
            "timestamp": "2025-01-01T12:00:01Z",
            "content": {
                "message": "call",
                "metadata": {
                    "tool_name": "reminder_trigger",
                    "assistant_id": secretary_id,
                    "reminder_id": reminder_id,
                    "reminder_type": "one_time",
                    "payload": {"text": "call"},
                    "triggered_at_event": "2025-01-01T12:00:01Z"
                }
            }
        })
        .to_string();

        match dispatcher.handle_payload(&payload).await {
            Outcome::Respond(response) => {
                assert_eq!(response.source, "reminder_trigger");
                assert_eq!(response.status, "success");
                assert_eq!(
                    response.metadata["reminder_id"],
                    serde_json::json!(reminder_id)
                );
            }
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_secretary_is_terminal_not_retried() {
        let dispatcher = dispatcher(
            Arc::new(InMemoryDataPlane::new()),
            ScriptedProvider::answering("unused"),
        );
        match dispatcher.handle_payload(&human_payload(42, "hi")).await {
            Outcome::Respond(payload) => {
                assert_eq!(payload.status, "error");
                assert!(payload.response.contains("NoSecretaryAssigned"));
            }
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_with_user_id_answers_an_error() {
        let dispatcher = dispatcher(
            Arc::new(InMemoryDataPlane::new()),
            ScriptedProvider::answering("unused"),
        );
        let raw = r#"{"user_id": 42, "surprise": true}"#;
        match dispatcher.handle_payload(raw).await {
            Outcome::Respond(payload) => {
                assert_eq!(payload.user_id, 42);
                assert_eq!(payload.status, "error");
                assert!(payload.response.contains("InvalidPayload"));
            }
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unaddressable_garbage_is_dead_lettered() {
        let dispatcher = dispatcher(
            Arc::new(InMemoryDataPlane::new()),
            ScriptedProvider::answering("unused"),
        );
        match dispatcher.handle_payload("not json at all").await {
            Outcome::DeadLetter { error_type, .. } => {
                assert_eq!(error_type, "InvalidPayload");
            }
            other => panic!("expected DeadLetter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_failure_requests_a_retry() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        data_plane.insert_assistant(secretary(secretary_id));
        data_plane.assign_secretary(42, secretary_id);

        let dispatcher = dispatcher(Arc::clone(&data_plane), ScriptedProvider::failing());
        match dispatcher.handle_payload(&human_payload(42, "hi")).await {
            Outcome::Retry {
                error_type,
                user_id,
                ..
            } => {
                assert_eq!(error_type, "ProviderError");
                assert_eq!(user_id, Some(42));
            }
            other => panic!("expected Retry, got {other:?}"),
        }

        // The initial message is tainted for debuggability.
        let saved = data_plane.message(1).unwrap();
        assert_eq!(
            saved.status,
            maestro_rest::models::MessageStatus::Error
        );
    }
}
