//! The per-user agent factory.
//!
//! Two concurrent caches: user → secretary assignment, and
//! `(assistant, user)` → built instance. Construction does I/O and may
//! recurse (sub-assistants), so it never happens while holding a cache
//! shard; a per-key in-flight lock deduplicates concurrent builds of the
//! same instance instead.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use maestro_core::config::{AgentConfig, CalendarConfig, LlmConfig};
use maestro_core::Ctx;
use maestro_rest::models::{Assistant, AssistantKind};
use maestro_rest::{DataPlane, RagService};

use crate::error::AgentError;
use crate::graph::AgentGraph;
use crate::instance::AgentInstance;
use crate::middleware::{
    ContextLoader, DynamicPrompt, Finalizer, MemoryRetrieval, MessageSaver, Middleware,
    ResponseSaver, Summarization,
};
use crate::openai::OpenAiProvider;
use crate::prompts::DEFAULT_SUMMARIZATION_PROMPT;
use crate::provider::LlmProvider;
use crate::tools::factory::ToolFactory;

type InstanceKey = (Uuid, i64);

#[derive(Debug, Clone)]
struct AssignmentEntry {
    secretary_id: Uuid,
    updated_at: Option<DateTime<Utc>>,
}

pub struct AgentFactory {
    data_plane: Arc<dyn DataPlane>,
    provider: Arc<dyn LlmProvider>,
    tool_factory: ToolFactory,
    rag: Arc<dyn RagService>,
    config: AgentConfig,
    assignments: DashMap<i64, AssignmentEntry>,
    instances: DashMap<InstanceKey, Arc<AgentInstance>>,
    building: DashMap<InstanceKey, Arc<Mutex<()>>>,
    self_weak: Weak<AgentFactory>,
}

impl AgentFactory {
    pub fn new(
        data_plane: Arc<dyn DataPlane>,
        rag: Arc<dyn RagService>,
        llm: &LlmConfig,
        calendar: &CalendarConfig,
        config: AgentConfig,
    ) -> Arc<Self> {
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            llm.openai_api_key.clone(),
            llm.openai_base_url.clone(),
        ));
        Self::with_provider(data_plane, rag, provider, llm, calendar, config)
    }

    /// Construction seam used by tests to swap the LLM provider.
    pub fn with_provider(
        data_plane: Arc<dyn DataPlane>,
        rag: Arc<dyn RagService>,
        provider: Arc<dyn LlmProvider>,
        llm: &LlmConfig,
        calendar: &CalendarConfig,
        config: AgentConfig,
    ) -> Arc<Self> {
        let tool_factory = ToolFactory::new(
            Arc::clone(&data_plane),
            Arc::clone(&rag),
            llm.tavily_api_key.clone(),
            calendar.base_url.clone(),
        );
        Arc::new_cyclic(|weak| Self {
            data_plane,
            provider,
            tool_factory,
            rag,
            config,
            assignments: DashMap::new(),
            instances: DashMap::new(),
            building: DashMap::new(),
            self_weak: weak.clone(),
        })
    }

    /// Resolve the user's secretary, building (and caching) its instance.
    pub async fn get_user_secretary(
        self: &Arc<Self>,
        ctx: &Ctx,
        user_id: i64,
    ) -> Result<Arc<AgentInstance>, AgentError> {
        if let Some(entry) = self.assignments.get(&user_id).map(|e| e.value().clone()) {
            match self.get_by_id(ctx, entry.secretary_id, user_id).await {
                Ok(instance) => return Ok(instance),
                Err(e) => warn!(
                    user_id,
                    secretary_id = %entry.secretary_id,
                    error = %e,
                    "cached assignment unusable, falling back to direct lookup"
                ),
            }
        }

        match self.data_plane.get_user_secretary(ctx, user_id).await {
            Ok(Some(secretary)) => {
                info!(user_id, secretary_id = %secretary.id, "fetched assignment directly");
                self.assignments.insert(
                    user_id,
                    AssignmentEntry {
                        secretary_id: secretary.id,
                        updated_at: secretary.updated_at,
                    },
                );
                self.get_by_id(ctx, secretary.id, user_id).await
            }
            Ok(None) => Err(AgentError::NoSecretaryAssigned { user_id }),
            Err(e) => Err(e.into()),
        }
    }

    /// Get or build the instance for `(assistant, user)`.
    pub async fn get_by_id(
        self: &Arc<Self>,
        ctx: &Ctx,
        assistant_id: Uuid,
        user_id: i64,
    ) -> Result<Arc<AgentInstance>, AgentError> {
        let key = (assistant_id, user_id);
        if let Some(instance) = self.instances.get(&key) {
            return Ok(Arc::clone(instance.value()));
        }

        // Per-key in-flight lock: concurrent requests for the same pair
        // wait for one build instead of racing duplicate I/O.
        let build_lock = self
            .building
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _building = build_lock.lock().await;

        if let Some(instance) = self.instances.get(&key) {
            return Ok(Arc::clone(instance.value()));
        }

        let result = self.build_instance(ctx, assistant_id, user_id).await;
        if let Ok(ref instance) = result {
            self.instances.insert(key, Arc::clone(instance));
            info!(%assistant_id, user_id, "agent instance built and cached");
        }
        self.building.remove(&key);
        result
    }

    async fn build_instance(
        self: &Arc<Self>,
        ctx: &Ctx,
        assistant_id: Uuid,
        user_id: i64,
    ) -> Result<Arc<AgentInstance>, AgentError> {
        let assistant = self.data_plane.get_assistant(ctx, assistant_id).await?;
        match assistant.assistant_type {
            AssistantKind::Llm => {}
        }

        let records = self.data_plane.get_assistant_tools(ctx, assistant_id).await?;
        let tools = self
            .tool_factory
            .build(&records, user_id, assistant_id, &self.self_weak);
        if tools.len() < records.len() {
            warn!(
                %assistant_id,
                user_id,
                built = tools.len(),
                defined = records.len(),
                "assistant initialized with a subset of its defined tools"
            );
        }

        let graph = self.build_graph(&assistant, tools);
        Ok(Arc::new(AgentInstance::new(
            assistant,
            user_id,
            graph,
            self.config.llm_context_size,
        )))
    }

    fn build_graph(
        &self,
        assistant: &Assistant,
        tools: Vec<Arc<dyn crate::tools::Tool>>,
    ) -> AgentGraph {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ContextLoader::new(
                Arc::clone(&self.data_plane),
                self.config.history_limit,
            )),
            Arc::new(MessageSaver::new(Arc::clone(&self.data_plane))),
            Arc::new(MemoryRetrieval::new(
                Arc::clone(&self.rag),
                self.config.memory_limit,
                self.config.memory_threshold,
            )),
            Arc::new(DynamicPrompt::new(assistant.instructions.clone())),
            Arc::new(Summarization::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.data_plane),
                assistant.model.clone(),
                DEFAULT_SUMMARIZATION_PROMPT.to_string(),
                assistant.instructions.clone(),
                self.config.summary_threshold,
                self.config.messages_to_keep_tail,
            )),
            Arc::new(ResponseSaver::new(Arc::clone(&self.data_plane))),
            Arc::new(Finalizer::new(Arc::clone(&self.data_plane))),
        ];
        AgentGraph::new(
            middlewares,
            Arc::clone(&self.provider),
            tools,
            assistant.model.clone(),
            Duration::from_secs(self.config.step_timeout_secs),
        )
    }

    /// Bulk-load assignments at startup and pre-build the assigned
    /// secretaries so first messages do not pay the build latency.
    pub async fn preload(self: &Arc<Self>, ctx: &Ctx) {
        let assignments = match self.data_plane.list_active_assignments(ctx).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "assignment preload fetch failed");
                return;
            }
        };
        info!(count = assignments.len(), "preloading secretary assignments");

        let mut pairs = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            self.assignments.insert(
                assignment.user_id,
                AssignmentEntry {
                    secretary_id: assignment.secretary_id,
                    updated_at: assignment.updated_at,
                },
            );
            pairs.push((assignment.secretary_id, assignment.user_id));
        }

        let mut preloaded = 0usize;
        let mut failed = 0usize;
        for (secretary_id, user_id) in pairs {
            match self.get_by_id(ctx, secretary_id, user_id).await {
                Ok(_) => preloaded += 1,
                Err(e) => {
                    failed += 1;
                    error!(%secretary_id, user_id, error = %e, "instance preload failed");
                }
            }
        }
        info!(preloaded, failed, "assignment preload complete");
    }

    /// One refresh cycle: reconcile the assignment cache against the data
    /// plane, then evict instances whose assistant config changed.
    pub async fn refresh(self: &Arc<Self>, ctx: &Ctx) {
        let remote = match self.data_plane.list_active_assignments(ctx).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "assignment refresh fetch failed, skipping cycle");
                return;
            }
        };

        let mut added = 0usize;
        let mut updated = 0usize;
        let remote_users: std::collections::HashSet<i64> =
            remote.iter().map(|a| a.user_id).collect();

        for assignment in &remote {
            let entry = AssignmentEntry {
                secretary_id: assignment.secretary_id,
                updated_at: assignment.updated_at,
            };
            match self.assignments.get(&assignment.user_id).map(|e| e.value().clone()) {
                None => {
                    self.assignments.insert(assignment.user_id, entry);
                    added += 1;
                }
                Some(local) => {
                    let newer = match (assignment.updated_at, local.updated_at) {
                        (Some(remote_at), Some(local_at)) => remote_at > local_at,
                        _ => false,
                    };
                    if local.secretary_id != assignment.secretary_id || newer {
                        self.assignments.insert(assignment.user_id, entry);
                        updated += 1;
                    }
                }
            }
        }

        let before = self.assignments.len();
        self.assignments.retain(|user_id, _| remote_users.contains(user_id));
        let removed = before - self.assignments.len();

        if added + removed + updated > 0 {
            info!(added, removed, updated, "assignment cache reconciled");
        } else {
            debug!("no assignment changes detected");
        }

        // Instance staleness: evict pairs whose assistant config moved on
        // after the instance was built; the next request rebuilds.
        let keys: Vec<InstanceKey> = self.instances.iter().map(|e| *e.key()).collect();
        for (assistant_id, user_id) in keys {
            let loaded_at = match self.instances.get(&(assistant_id, user_id)) {
                Some(instance) => instance.loaded_at,
                None => continue,
            };
            match self.data_plane.get_assistant(ctx, assistant_id).await {
                Ok(assistant) => {
                    let Some(updated_at) = assistant.updated_at else {
                        debug!(%assistant_id, "assistant has no updated_at, cannot compare");
                        continue;
                    };
                    if updated_at > loaded_at {
                        info!(%assistant_id, user_id, "assistant config changed, evicting instance");
                        self.instances.remove(&(assistant_id, user_id));
                    }
                }
                Err(e) => warn!(%assistant_id, error = %e, "could not check assistant freshness"),
            }
        }
    }

    /// Background refresh loop; exits on cancellation.
    pub async fn run_refresh_loop(self: Arc<Self>, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.refresh_interval_secs);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("factory refresh loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let ctx = Ctx::new();
                    self.refresh(&ctx).await;
                }
            }
        }
    }

    /// Drop all cached state. Instances are stateless with respect to the
    /// config they were built from, so dropping them is safe at any time.
    pub fn shutdown(&self) {
        self.instances.clear();
        self.assignments.clear();
        self.building.clear();
        info!("agent factory caches cleared");
    }

    pub fn cached_instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use maestro_rest::testing::{InMemoryDataPlane, InMemoryRag};

    use crate::provider::{ChatRequest, ChatResponse, ProviderError};

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let last = req
                .messages
                .last()
                .map(|m| m.content().to_string())
                .unwrap_or_default();
            Ok(ChatResponse {
                content: format!("echo: {last}"),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    fn assistant(id: Uuid, name: &str, updated_at: Option<DateTime<Utc>>) -> Assistant {
        Assistant {
            id,
            name: name.to_string(),
            model: "gpt-4o".to_string(),
            instructions: "Secretary. {summary_previous} {memories}".to_string(),
            is_secretary: true,
            assistant_type: AssistantKind::Llm,
            is_active: true,
            updated_at,
        }
    }

    fn factory_with(data_plane: Arc<InMemoryDataPlane>) -> Arc<AgentFactory> {
        AgentFactory::with_provider(
            data_plane,
            Arc::new(InMemoryRag::new()),
            Arc::new(EchoProvider),
            &LlmConfig::default(),
            &CalendarConfig::default(),
            AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn missing_assignment_is_a_domain_error() {
        let factory = factory_with(Arc::new(InMemoryDataPlane::new()));
        let err = factory
            .get_user_secretary(&Ctx::new(), 42)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoSecretaryAssigned { user_id: 42 }));
    }

    #[tokio::test]
    async fn instances_are_cached_per_pair() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        data_plane.insert_assistant(assistant(secretary_id, "ada", Some(Utc::now())));
        data_plane.assign_secretary(42, secretary_id);

        let factory = factory_with(Arc::clone(&data_plane));
        let ctx = Ctx::new();
        let a = factory.get_user_secretary(&ctx, 42).await.unwrap();
        let b = factory.get_user_secretary(&ctx, 42).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_instance_count(), 1);

        // A different user gets a distinct instance of the same assistant.
        data_plane.assign_secretary(7, secretary_id);
        let c = factory.get_user_secretary(&ctx, 7).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(factory.cached_instance_count(), 2);
    }

    #[tokio::test]
    async fn reassignment_switches_secretaries_after_refresh() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        data_plane.insert_assistant(assistant(first, "ada", Some(Utc::now())));
        data_plane.insert_assistant(assistant(second, "grace", Some(Utc::now())));
        data_plane.assign_secretary(42, first);

        let factory = factory_with(Arc::clone(&data_plane));
        let ctx = Ctx::new();
        let before = factory.get_user_secretary(&ctx, 42).await.unwrap();
        assert_eq!(before.assistant_id(), first);

        data_plane.assign_secretary(42, second);
        factory.refresh(&ctx).await;

        let after = factory.get_user_secretary(&ctx, 42).await.unwrap();
        assert_eq!(after.assistant_id(), second);
        // The old instance still exists; in-flight runs bound to it finish
        // with the configuration they started with.
        assert_eq!(factory.cached_instance_count(), 2);
    }

    #[tokio::test]
    async fn config_change_evicts_the_instance() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        data_plane.insert_assistant(assistant(secretary_id, "ada", Some(Utc::now())));
        data_plane.assign_secretary(42, secretary_id);

        let factory = factory_with(Arc::clone(&data_plane));
        let ctx = Ctx::new();
        let before = factory.get_user_secretary(&ctx, 42).await.unwrap();

        // Config moves forward in time relative to the built instance.
        data_plane.insert_assistant(assistant(
            secretary_id,
            "ada-v2",
            Some(Utc::now() + chrono::Duration::seconds(60)),
        ));
        factory.refresh(&ctx).await;

        let after = factory.get_user_secretary(&ctx, 42).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.name(), "ada-v2");
    }

    #[tokio::test]
    async fn sub_assistant_delegation_round_trip() {
        use maestro_rest::models::{ToolDefinitionRecord, ToolKind};

        use crate::provider::ToolCall;

        // Provider shared by both instances; scripted in call order:
        // parent asks for the tool, the specialist answers, parent wraps up.
        struct SequencedProvider {
            responses: std::sync::Mutex<Vec<ChatResponse>>,
        }

        #[async_trait]
        impl LlmProvider for SequencedProvider {
            fn name(&self) -> &str {
                "sequenced"
            }
            async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
                self.responses
                    .lock()
                    .unwrap()
                    .pop()
                    .map(|mut r| {
                        r.model = req.model.clone();
                        r
                    })
                    .ok_or_else(|| ProviderError::Unavailable("script exhausted".into()))
            }
        }

        fn text(content: &str) -> ChatResponse {
            ChatResponse {
                content: content.to_string(),
                model: String::new(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            }
        }

        let delegate_call = ChatResponse {
            content: String::new(),
            model: String::new(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: "tool_use".to_string(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "research_assistant".to_string(),
                arguments: serde_json::json!({"message": "look this up"}),
            }],
        };
        // Popped back-to-front.
        let provider = Arc::new(SequencedProvider {
            responses: std::sync::Mutex::new(vec![
                text("done: the specialist says 42"),
                text("the answer is 42"),
                delegate_call,
            ]),
        });

        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        let specialist_id = Uuid::new_v4();
        data_plane.insert_assistant(assistant(secretary_id, "ada", Some(Utc::now())));
        data_plane.insert_assistant(assistant(specialist_id, "specialist", Some(Utc::now())));
        data_plane.assign_secretary(42, secretary_id);
        data_plane.assistant_tools.lock().unwrap().insert(
            secretary_id,
            vec![ToolDefinitionRecord {
                id: Uuid::new_v4(),
                name: "research_assistant".to_string(),
                tool_type: ToolKind::SubAssistant,
                description: "Delegate research questions".to_string(),
                input_schema: None,
                sub_assistant_id: Some(specialist_id),
                is_active: true,
            }],
        );

        let factory = AgentFactory::with_provider(
            Arc::clone(&data_plane) as Arc<dyn maestro_rest::DataPlane>,
            Arc::new(InMemoryRag::new()),
            provider,
            &LlmConfig::default(),
            &CalendarConfig::default(),
            AgentConfig::default(),
        );

        let ctx = Ctx::new().with_user(42);
        let secretary = factory.get_user_secretary(&ctx, 42).await.unwrap();
        let reply = secretary.process_message(&ctx, "ask the expert").await.unwrap();
        assert_eq!(reply.as_deref(), Some("done: the specialist says 42"));

        // Both the parent pair and the specialist pair persisted messages,
        // and the tool result carries the specialist's reply.
        let messages = data_plane.messages.lock().unwrap().clone();
        assert!(messages
            .iter()
            .any(|m| m.assistant_id == specialist_id && m.content == "the answer is 42"));
        let tool_row = messages
            .iter()
            .find(|m| m.assistant_id == secretary_id
                && m.role == maestro_rest::models::MessageRole::Tool)
            .expect("delegation result persisted");
        assert_eq!(tool_row.content, "the answer is 42");
        // Specialist instance got cached alongside the secretary's.
        assert_eq!(factory.cached_instance_count(), 2);
    }

    #[tokio::test]
    async fn end_to_end_message_through_factory_instance() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let secretary_id = Uuid::new_v4();
        data_plane.insert_assistant(assistant(secretary_id, "ada", Some(Utc::now())));
        data_plane.assign_secretary(42, secretary_id);

        let factory = factory_with(Arc::clone(&data_plane));
        let ctx = Ctx::new().with_user(42);
        let instance = factory.get_user_secretary(&ctx, 42).await.unwrap();
        let reply = instance.process_message(&ctx, "hi").await.unwrap();
        assert_eq!(reply.as_deref(), Some("echo: hi"));
    }
}
