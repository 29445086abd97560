//! The compiled agent graph: a fixed middleware sequence around the
//! model/tool loop.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tokio::time::Instant;
use tracing::{error, info, warn};

use maestro_core::metrics_defs;
use maestro_core::logging::EventType;

use crate::error::AgentError;
use crate::message::AgentMessage;
use crate::middleware::Middleware;
use crate::provider::{ChatRequest, LlmProvider};
use crate::state::{AgentState, StateUpdate};
use crate::tools::{to_schemas, Tool};

/// Upper bound on model steps; the wall-clock deadline is what normally
/// ends a runaway loop, this is the backstop.
const MAX_STEPS: usize = 25;

/// Extra budget on top of `3 × step_timeout` for middleware I/O.
const DEADLINE_OVERHEAD: Duration = Duration::from_secs(15);

pub struct AgentGraph {
    middlewares: Vec<Arc<dyn Middleware>>,
    provider: Arc<dyn LlmProvider>,
    tools: Vec<Arc<dyn Tool>>,
    model: String,
    step_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for AgentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentGraph")
            .field("middlewares_len", &self.middlewares.len())
            .field("provider", &self.provider.name())
            .field("tools_len", &self.tools.len())
            .field("model", &self.model)
            .field("step_timeout", &self.step_timeout)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl AgentGraph {
    pub fn new(
        middlewares: Vec<Arc<dyn Middleware>>,
        provider: Arc<dyn LlmProvider>,
        tools: Vec<Arc<dyn Tool>>,
        model: String,
        step_timeout: Duration,
    ) -> Self {
        Self {
            middlewares,
            provider,
            tools,
            model,
            step_timeout,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    /// Run the graph to completion. Returns the final assistant text, or
    /// `None` when the run legitimately produced no user-facing reply.
    ///
    /// `after_agent` hooks always run, even when the run failed; the error
    /// taints the state first so the finalizer records it.
    pub async fn run(&self, state: &mut AgentState) -> Result<Option<String>, AgentError> {
        let started = Instant::now();
        let result = self.run_inner(state).await;

        if result.is_err() {
            state.apply(StateUpdate::SetErrorOccurred);
        }
        for middleware in &self.middlewares {
            match middleware.after_agent(state).await {
                Ok(updates) => state.apply_all(updates),
                Err(e) => error!(
                    middleware = middleware.name(),
                    error = %e,
                    "after_agent hook failed"
                ),
            }
        }

        histogram!(metrics_defs::JOB_DURATION, "job" => "agent_run")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_inner(&self, state: &mut AgentState) -> Result<Option<String>, AgentError> {
        for middleware in &self.middlewares {
            let updates = middleware.before_agent(state).await?;
            state.apply_all(updates);
        }

        let deadline = Instant::now() + self.step_timeout * 3 + DEADLINE_OVERHEAD;

        for step in 0..MAX_STEPS {
            for middleware in &self.middlewares {
                let updates = middleware.before_model(state).await?;
                state.apply_all(updates);
            }

            let mut request = ChatRequest {
                model: self.model.clone(),
                system: String::new(),
                messages: state.messages.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tools: to_schemas(&self.tools),
            };
            for middleware in &self.middlewares {
                middleware.wrap_model_call(state, &mut request)?;
            }

            if Instant::now() >= deadline {
                return Err(AgentError::RunDeadline);
            }

            info!(
                step,
                model = %request.model,
                messages = request.messages.len(),
                event_type = %EventType::LlmCall,
                "model step"
            );
            let response = tokio::time::timeout(self.step_timeout, self.provider.send(&request))
                .await
                .map_err(|_| AgentError::StepTimeout {
                    seconds: self.step_timeout.as_secs(),
                })??;

            state.apply(StateUpdate::Append(AgentMessage::ai(
                response.content.clone(),
                response.tool_calls.clone(),
            )));

            for middleware in &self.middlewares {
                let updates = middleware.after_model(state, &response).await?;
                state.apply_all(updates);
            }

            if !response.wants_tools() {
                let content = response.content.trim();
                return Ok((!content.is_empty()).then(|| response.content.clone()));
            }

            // Execute requested tools in declaration order; failures become
            // tool messages so the model can recover on the next step.
            for call in &response.tool_calls {
                let output = match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => {
                        info!(tool = %call.name, event_type = %EventType::ToolCall, "executing tool");
                        match tool.invoke(call.arguments.clone()).await {
                            Ok(output) => output,
                            Err(e) => {
                                warn!(tool = %call.name, error = %e, "tool execution failed");
                                format!("Error executing tool: {e}")
                            }
                        }
                    }
                    None => {
                        warn!(tool = %call.name, "model requested unknown tool");
                        format!("Error executing tool: unknown tool '{}'", call.name)
                    }
                };
                state.apply(StateUpdate::Append(AgentMessage::tool(
                    output,
                    call.id.clone(),
                    Some(call.name.clone()),
                )));
            }
        }

        Err(AgentError::StepLimit {
            max_steps: MAX_STEPS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use maestro_core::Ctx;
    use maestro_rest::models::{MessageRole, MessageStatus};
    use maestro_rest::testing::{InMemoryDataPlane, InMemoryRag};
    use maestro_rest::DataPlane;

    use crate::middleware::{
        ContextLoader, DynamicPrompt, Finalizer, MemoryRetrieval, MessageSaver, ResponseSaver,
        Summarization,
    };
    use crate::prompts::DEFAULT_SUMMARIZATION_PROMPT;
    use crate::provider::{ChatResponse, ProviderError, ToolCall};
    use crate::tools::ToolError;

    /// Provider that pops scripted responses.
    struct ScriptedProvider {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<ChatResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Unavailable("script exhausted".into()))
        }
    }

    fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            model: "scripted".to_string(),
            tokens_in: 10,
            tokens_out: 5,
            stop_reason: "stop".to_string(),
            tool_calls: Vec::new(),
        }
    }

    fn tool_response(name: &str, call_id: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            model: "scripted".to_string(),
            tokens_in: 10,
            tokens_out: 5,
            stop_reason: "tool_use".to_string(),
            tool_calls: vec![ToolCall {
                id: call_id.to_string(),
                name: name.to_string(),
                arguments: json!({}),
            }],
        }
    }

    struct ExplodingTool;

    #[async_trait]
    impl Tool for ExplodingTool {
        fn name(&self) -> &str {
            "exploding_tool"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn args_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            Err(ToolError::api("backend exploded"))
        }
    }

    fn build_graph(
        provider: Arc<dyn LlmProvider>,
        data_plane: Arc<InMemoryDataPlane>,
        rag: Arc<InMemoryRag>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> AgentGraph {
        let template = "You are a secretary.\nSummary: {summary_previous}\nFacts: {memories}";
        let dp: Arc<dyn DataPlane> = data_plane;
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ContextLoader::new(Arc::clone(&dp), 50)),
            Arc::new(MessageSaver::new(Arc::clone(&dp))),
            Arc::new(MemoryRetrieval::new(rag, 5, 0.6)),
            Arc::new(DynamicPrompt::new(template.to_string())),
            Arc::new(Summarization::new(
                Arc::clone(&provider),
                Arc::clone(&dp),
                "scripted".to_string(),
                DEFAULT_SUMMARIZATION_PROMPT.to_string(),
                template.to_string(),
                0.6,
                5,
            )),
            Arc::new(ResponseSaver::new(Arc::clone(&dp))),
            Arc::new(Finalizer::new(Arc::clone(&dp))),
        ];
        AgentGraph::new(
            middlewares,
            provider,
            tools,
            "scripted".to_string(),
            Duration::from_secs(5),
        )
    }

    fn fresh_state(context_size: u32) -> AgentState {
        AgentState::new(
            Ctx::new().with_user(42),
            42,
            Uuid::nil(),
            context_size,
            AgentMessage::human("hi"),
        )
    }

    #[tokio::test]
    async fn happy_path_persists_both_sides() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello there")]));
        let graph = build_graph(
            provider,
            Arc::clone(&data_plane),
            Arc::new(InMemoryRag::new()),
            Vec::new(),
        );

        let mut state = fresh_state(8192);
        let reply = graph.run(&mut state).await.unwrap();
        assert_eq!(reply.as_deref(), Some("hello there"));

        let messages = data_plane.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Human);
        // Finalizer flipped pending_processing to processed.
        assert_eq!(messages[0].status, MessageStatus::Processed);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "hello there");
    }

    #[tokio::test]
    async fn failing_tool_becomes_a_tool_message_and_model_recovers() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response("exploding_tool", "call_1"),
            text_response("sorry, the tool is down"),
        ]));
        let graph = build_graph(
            provider,
            Arc::clone(&data_plane),
            Arc::new(InMemoryRag::new()),
            vec![Arc::new(ExplodingTool)],
        );

        let mut state = fresh_state(8192);
        let reply = graph.run(&mut state).await.unwrap();
        assert_eq!(reply.as_deref(), Some("sorry, the tool is down"));

        let messages = data_plane.messages.lock().unwrap().clone();
        let tool_row = messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .expect("tool message persisted");
        assert!(tool_row.content.starts_with("Error executing tool:"));
        assert_eq!(tool_row.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn provider_failure_taints_the_initial_message() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        // Empty script: first model step errors out.
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let graph = build_graph(
            provider,
            Arc::clone(&data_plane),
            Arc::new(InMemoryRag::new()),
            Vec::new(),
        );

        let mut state = fresh_state(8192);
        let err = graph.run(&mut state).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert!(state.error_occurred);

        let saved = data_plane.message(1).expect("initial message saved");
        assert_eq!(saved.status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn summarization_folds_old_history() {
        let data_plane = Arc::new(InMemoryDataPlane::new());

        // Seed 12 processed messages (~40 tokens each) as prior history.
        let ctx = Ctx::new();
        for i in 0..12 {
            let create = maestro_rest::models::MessageCreate {
                user_id: 42,
                assistant_id: Uuid::nil(),
                role: if i % 2 == 0 {
                    MessageRole::Human
                } else {
                    MessageRole::Assistant
                },
                content: "word ".repeat(32),
                content_type: "text".to_string(),
                status: MessageStatus::Processed,
                tool_call_id: None,
                meta_data: None,
            };
            data_plane.create_message(&ctx, &create).await.unwrap();
        }

        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("summary of the early conversation"),
            text_response("final answer"),
        ]));
        let graph = build_graph(
            provider,
            Arc::clone(&data_plane),
            Arc::new(InMemoryRag::new()),
            Vec::new(),
        );

        let mut state = fresh_state(200);
        let reply = graph.run(&mut state).await.unwrap();
        assert_eq!(reply.as_deref(), Some("final answer"));

        let summaries = data_plane.summaries.lock().unwrap().clone();
        assert_eq!(summaries.len(), 1);
        // 13 window messages (12 history + initial), tail of 5 kept:
        // messages 1..=8 are folded, so coverage ends at id 8.
        assert_eq!(summaries[0].last_message_id_covered, 8);
        assert_eq!(
            state.newly_summarized_message_ids,
            (1..=8).collect::<Vec<i64>>()
        );
        // The live window kept the tail plus the new AI reply.
        assert!(state.messages.len() <= 6 + 1);

        let folded = data_plane.message(3).unwrap();
        assert_eq!(folded.status, MessageStatus::Summarized);
    }
}
