//! The periodic extraction job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use maestro_core::{metrics_defs, Ctx};
use maestro_core::logging::EventType;
use maestro_rest::models::{
    BatchJobCreate, BatchJobStatus, BatchJobUpdate, Conversation, GlobalSettings, Memory,
    MemoryCreate, MemoryKind,
};
use maestro_rest::{DataPlane, RagService};

use crate::provider::{BatchProvider, BatchRequestItem, BatchStatus};

/// Hard cap on conversations pulled per run.
const CONVERSATION_LIMIT: usize = 50;
const MIN_MESSAGES: usize = 2;
/// How many existing memories feed the "do not duplicate" preamble.
const EXISTING_FACTS_LIMIT: usize = 50;

const FACT_EXTRACTION_PROMPT: &str = "\
Analyze the conversation and extract important facts about the user.

## Fact types:
- user_fact: personal information (name, age, profession, location)
- preference: likes/dislikes, interests, hobbies
- event: notable events (birthdays, meetings, plans)
- conversation_insight: context and recurring topics from the conversation

## Already known facts (DO NOT REPEAT):
{existing_facts}

## Conversation:
{conversation}

## Instructions:
1. Extract only NEW information absent from the known facts
2. Keep each fact short and concrete (1-2 sentences)
3. Give each fact a type and an importance from 1-10 (10 = critical)
4. Do not duplicate or rephrase known facts
5. If there is nothing new, return an empty list

Answer strictly as JSON (no markdown):
[
  {\"text\": \"...\", \"memory_type\": \"...\", \"importance\": N},
  ...
]";

#[derive(Debug, Clone)]
pub struct ExtractedFact {
    pub text: String,
    pub memory_type: MemoryKind,
    pub importance: u8,
}

#[derive(Debug, Default, Clone)]
pub struct ExtractionStats {
    pub status: String,
    pub conversations_processed: usize,
    pub batches_submitted: usize,
    pub facts_extracted: usize,
    pub facts_deduplicated: usize,
}

pub struct MemoryExtractionJob {
    data_plane: Arc<dyn DataPlane>,
    rag: Arc<dyn RagService>,
    provider: Arc<dyn BatchProvider>,
    last_run: Option<DateTime<Utc>>,
}

impl MemoryExtractionJob {
    pub fn new(
        data_plane: Arc<dyn DataPlane>,
        rag: Arc<dyn RagService>,
        provider: Arc<dyn BatchProvider>,
    ) -> Self {
        Self {
            data_plane,
            rag,
            provider,
            last_run: None,
        }
    }

    /// One full run: resume pending batches, then submit new ones for
    /// conversations since the previous run.
    pub async fn run(&mut self) -> ExtractionStats {
        let started = std::time::Instant::now();
        info!(event_type = %EventType::JobStart, "memory extraction run starting");
        let mut stats = ExtractionStats::default();
        let ctx = Ctx::new();

        let settings = match self.data_plane.get_global_settings(&ctx).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "could not read global settings, using defaults");
                GlobalSettings::default()
            }
        };
        if !settings.memory_extraction_enabled {
            info!("memory extraction disabled in settings");
            stats.status = "disabled".to_string();
            return stats;
        }

        self.process_pending_batches(&ctx, &settings, &mut stats).await;

        let since = self.last_run.unwrap_or_else(|| {
            Utc::now() - Duration::hours(settings.memory_extraction_interval_hours as i64)
        });
        let conversations = match self
            .data_plane
            .get_conversations(&ctx, since, MIN_MESSAGES, CONVERSATION_LIMIT)
            .await
        {
            Ok(conversations) => conversations,
            Err(e) => {
                error!(error = %e, "conversation fetch failed");
                stats.status = "error".to_string();
                return stats;
            }
        };
        stats.conversations_processed = conversations.len();

        if conversations.is_empty() {
            info!("no new conversations to process");
            stats.status = "no_new_data".to_string();
        } else {
            self.submit_batches(&ctx, &settings, conversations, &mut stats)
                .await;
            stats.status = "submitted".to_string();
        }

        self.last_run = Some(Utc::now());
        histogram!(metrics_defs::JOB_DURATION, "job" => "memory_extraction")
            .record(started.elapsed().as_secs_f64());
        counter!(
            metrics_defs::JOB_RUNS,
            "job" => "memory_extraction",
            "status" => stats.status.clone()
        )
        .increment(1);
        info!(
            event_type = %EventType::JobEnd,
            status = %stats.status,
            batches = stats.batches_submitted,
            facts = stats.facts_extracted,
            "memory extraction run finished"
        );
        stats
    }

    async fn process_pending_batches(
        &self,
        ctx: &Ctx,
        settings: &GlobalSettings,
        stats: &mut ExtractionStats,
    ) {
        let pending = match self.data_plane.list_pending_batch_jobs(ctx).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "could not list pending batch jobs");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "resuming pending batch jobs");

        for job in pending {
            let status = match self.provider.get_batch_status(&job.batch_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(batch_id = %job.batch_id, error = %e, "batch status check failed");
                    continue;
                }
            };
            match status {
                BatchStatus::Completed => {
                    let results = match self.provider.get_batch_results(&job.batch_id).await {
                        Ok(results) => results,
                        Err(e) => {
                            warn!(batch_id = %job.batch_id, error = %e, "batch download failed");
                            continue;
                        }
                    };
                    let mut saved = 0usize;
                    for result in results {
                        if let Some(err) = result.error {
                            warn!(custom_id = %result.custom_id, error = %err, "batch item errored");
                            continue;
                        }
                        let Some(content) = result.content else { continue };
                        for fact in parse_extraction_result(&content) {
                            match self.save_fact(ctx, job.user_id, &fact, settings).await {
                                Ok(true) => saved += 1,
                                Ok(false) => stats.facts_deduplicated += 1,
                                Err(e) => {
                                    warn!(error = %e, user_id = job.user_id, "fact save failed")
                                }
                            }
                        }
                    }
                    stats.facts_extracted += saved;
                    let update = BatchJobUpdate {
                        status: Some(BatchJobStatus::Completed),
                        facts_extracted: Some(saved as u32),
                        error_message: None,
                    };
                    if let Err(e) = self.data_plane.update_batch_job(ctx, job.id, &update).await {
                        warn!(batch_id = %job.batch_id, error = %e, "batch job update failed");
                    }
                }
                BatchStatus::Failed | BatchStatus::Expired => {
                    let reason = if status == BatchStatus::Failed {
                        "batch job failed at provider"
                    } else {
                        "batch job expired"
                    };
                    let update = BatchJobUpdate {
                        status: Some(BatchJobStatus::Failed),
                        facts_extracted: None,
                        error_message: Some(reason.to_string()),
                    };
                    if let Err(e) = self.data_plane.update_batch_job(ctx, job.id, &update).await {
                        warn!(batch_id = %job.batch_id, error = %e, "batch job update failed");
                    }
                }
                BatchStatus::Pending => {}
            }
        }
    }

    async fn submit_batches(
        &self,
        ctx: &Ctx,
        settings: &GlobalSettings,
        conversations: Vec<Conversation>,
        stats: &mut ExtractionStats,
    ) {
        let mut by_user: HashMap<i64, Vec<Conversation>> = HashMap::new();
        for conversation in conversations {
            by_user
                .entry(conversation.user_id)
                .or_default()
                .push(conversation);
        }

        for (user_id, user_conversations) in by_user {
            let existing = self.existing_facts(ctx, user_id).await;
            let preamble = format_existing_facts(&existing);

            let mut requests = Vec::with_capacity(user_conversations.len());
            let mut messages_processed = 0u32;
            for conversation in &user_conversations {
                messages_processed += conversation.messages.len() as u32;
                let prompt = FACT_EXTRACTION_PROMPT
                    .replace("{existing_facts}", &preamble)
                    .replace("{conversation}", &format_conversation(conversation));
                requests.push(BatchRequestItem {
                    custom_id: format!(
                        "user_{user_id}_conv_{}_{}",
                        conversation.assistant_id,
                        &Uuid::new_v4().simple().to_string()[..8]
                    ),
                    prompt,
                });
            }
            if requests.is_empty() {
                continue;
            }

            let batch_id = match self
                .provider
                .submit_batch(&requests, &settings.memory_extraction_model)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    error!(user_id, error = %e, "batch submission failed");
                    continue;
                }
            };

            let create = BatchJobCreate {
                batch_id: batch_id.clone(),
                user_id,
                status: BatchJobStatus::Pending,
                provider: self.provider.name().to_string(),
                model: settings.memory_extraction_model.clone(),
                messages_processed,
            };
            if let Err(e) = self.data_plane.create_batch_job(ctx, &create).await {
                error!(batch_id = %batch_id, error = %e, "batch job record failed");
                continue;
            }
            stats.batches_submitted += 1;
            info!(
                batch_id = %batch_id,
                user_id,
                conversations = user_conversations.len(),
                "extraction batch submitted"
            );
        }
    }

    async fn existing_facts(&self, ctx: &Ctx, user_id: i64) -> Vec<Memory> {
        match self
            .rag
            .search_memories(
                ctx,
                "all known facts about the user",
                user_id,
                EXISTING_FACTS_LIMIT,
                0.0,
            )
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(user_id, error = %e, "could not load existing facts");
                Vec::new()
            }
        }
    }

    /// Save one fact unless a near-duplicate already exists.
    /// Returns `Ok(true)` when a new row was created.
    async fn save_fact(
        &self,
        ctx: &Ctx,
        user_id: i64,
        fact: &ExtractedFact,
        settings: &GlobalSettings,
    ) -> crate::error::Result<bool> {
        let similar = self
            .rag
            .search_memories(ctx, &fact.text, user_id, 1, settings.memory_dedup_threshold)
            .await?;
        if !similar.is_empty() {
            return Ok(false);
        }

        self.rag
            .save_memory(
                ctx,
                &MemoryCreate {
                    user_id,
                    assistant_id: None,
                    text: fact.text.clone(),
                    memory_type: fact.memory_type,
                    importance: fact.importance,
                    source_message_id: None,
                },
            )
            .await?;
        Ok(true)
    }
}

/// Parse a model reply into facts. The reply is supposed to be a bare JSON
/// array, but markdown fences and stray prose around it are common, so the
/// outermost `[...]` span is what gets parsed. Non-list replies and
/// non-object entries are dropped; unknown types default to `user_fact`;
/// importance clamps into 1..=10.
pub fn parse_extraction_result(content: &str) -> Vec<ExtractedFact> {
    let raw = content.trim();
    let span = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if end >= start => &raw[start..=end],
        _ => raw,
    };

    let entries: Vec<Value> = match serde_json::from_str(span) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) | Err(_) => {
            let head: String = raw.chars().take(100).collect();
            warn!(%head, "extraction reply is not a JSON array");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let text = object.get("text")?.as_str()?.trim().to_string();
            if text.is_empty() {
                return None;
            }
            let memory_type = match object.get("memory_type").and_then(|v| v.as_str()) {
                Some("preference") => MemoryKind::Preference,
                Some("event") => MemoryKind::Event,
                Some("conversation_insight") => MemoryKind::ConversationInsight,
                Some("extracted_knowledge") => MemoryKind::ExtractedKnowledge,
                _ => MemoryKind::UserFact,
            };
            let importance = object
                .get("importance")
                .and_then(|v| v.as_i64())
                .unwrap_or(1)
                .clamp(1, 10) as u8;
            Some(ExtractedFact {
                text,
                memory_type,
                importance,
            })
        })
        .collect()
}

fn format_conversation(conversation: &Conversation) -> String {
    conversation
        .messages
        .iter()
        .map(|m| format!("{}: {}", role_label(&m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_label(role: &maestro_rest::models::MessageRole) -> &'static str {
    match role {
        maestro_rest::models::MessageRole::Human => "user",
        maestro_rest::models::MessageRole::Assistant => "assistant",
        maestro_rest::models::MessageRole::Tool => "tool",
    }
}

fn format_existing_facts(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return "No known facts.".to_string();
    }
    memories
        .iter()
        .map(|m| format!("- [{}] {}", type_label(m.memory_type), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn type_label(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::UserFact => "user_fact",
        MemoryKind::Preference => "preference",
        MemoryKind::Event => "event",
        MemoryKind::ConversationInsight => "conversation_insight",
        MemoryKind::ExtractedKnowledge => "extracted_knowledge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use maestro_core::Ctx;
    use maestro_rest::models::{BatchJobCreate, ConversationMessage, MessageRole};
    use maestro_rest::testing::{InMemoryDataPlane, InMemoryRag};

    use crate::provider::BatchResultItem;

    struct FakeBatchProvider {
        submissions: Mutex<Vec<Vec<BatchRequestItem>>>,
        status: BatchStatus,
        results: Vec<BatchResultItem>,
    }

    impl FakeBatchProvider {
        fn idle() -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
                status: BatchStatus::Pending,
                results: Vec::new(),
            }
        }

        fn completed_with(results: Vec<BatchResultItem>) -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
                status: BatchStatus::Completed,
                results,
            }
        }
    }

    #[async_trait]
    impl BatchProvider for FakeBatchProvider {
        fn name(&self) -> &str {
            "fake"
        }
        async fn submit_batch(
            &self,
            requests: &[BatchRequestItem],
            _model: &str,
        ) -> crate::error::Result<String> {
            self.submissions.lock().unwrap().push(requests.to_vec());
            Ok(format!(
                "batch_{}",
                self.submissions.lock().unwrap().len()
            ))
        }
        async fn get_batch_status(&self, _batch_id: &str) -> crate::error::Result<BatchStatus> {
            Ok(self.status)
        }
        async fn get_batch_results(
            &self,
            _batch_id: &str,
        ) -> crate::error::Result<Vec<BatchResultItem>> {
            Ok(self.results.clone())
        }
    }

    fn conversation(user_id: i64, lines: &[(&str, MessageRole)]) -> Conversation {
        Conversation {
            user_id,
            assistant_id: Uuid::new_v4(),
            messages: lines
                .iter()
                .map(|(content, role)| ConversationMessage {
                    role: *role,
                    content: content.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn lenient_parsing_clamps_and_defaults() {
        let facts = parse_extraction_result(
            r#"```json
[
  {"text": "lives in Berlin", "memory_type": "user_fact", "importance": 7},
  {"text": "likes jazz", "memory_type": "vibe", "importance": 99},
  {"text": "", "memory_type": "event"},
  "not an object"
]
```"#,
        );
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].importance, 7);
        assert_eq!(facts[1].memory_type, MemoryKind::UserFact);
        assert_eq!(facts[1].importance, 10);
    }

    #[test]
    fn non_list_replies_yield_nothing() {
        assert!(parse_extraction_result("{\"text\": \"x\"}").is_empty());
        assert!(parse_extraction_result("no facts here").is_empty());
    }

    #[tokio::test]
    async fn disabled_settings_short_circuit() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        data_plane
            .global_settings
            .lock()
            .unwrap()
            .memory_extraction_enabled = false;
        let mut job = MemoryExtractionJob::new(
            data_plane,
            Arc::new(InMemoryRag::new()),
            Arc::new(FakeBatchProvider::idle()),
        );
        let stats = job.run().await;
        assert_eq!(stats.status, "disabled");
        assert_eq!(stats.batches_submitted, 0);
    }

    #[tokio::test]
    async fn conversations_are_batched_per_user() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        {
            let mut conversations = data_plane.conversations.lock().unwrap();
            conversations.push(conversation(
                1,
                &[("hi", MessageRole::Human), ("hello", MessageRole::Assistant)],
            ));
            conversations.push(conversation(
                1,
                &[("plans?", MessageRole::Human), ("yes", MessageRole::Assistant)],
            ));
            conversations.push(conversation(
                2,
                &[("hey", MessageRole::Human), ("hi", MessageRole::Assistant)],
            ));
        }
        let provider = Arc::new(FakeBatchProvider::idle());
        let mut job = MemoryExtractionJob::new(
            Arc::clone(&data_plane) as Arc<dyn DataPlane>,
            Arc::new(InMemoryRag::new()),
            Arc::clone(&provider) as Arc<dyn BatchProvider>,
        );
        let stats = job.run().await;

        assert_eq!(stats.status, "submitted");
        assert_eq!(stats.conversations_processed, 3);
        assert_eq!(stats.batches_submitted, 2);
        // User 1's batch carries both of their conversations.
        let submissions = provider.submissions.lock().unwrap();
        assert!(submissions.iter().any(|batch| batch.len() == 2));
        assert_eq!(data_plane.batch_jobs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completed_batches_save_new_facts_and_dedup_known_ones() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        data_plane
            .create_batch_job(
                &Ctx::new(),
                &BatchJobCreate {
                    batch_id: "batch_1".to_string(),
                    user_id: 1,
                    status: BatchJobStatus::Pending,
                    provider: "fake".to_string(),
                    model: "gpt-4o-mini".to_string(),
                    messages_processed: 4,
                },
            )
            .await
            .unwrap();

        let provider = Arc::new(FakeBatchProvider::completed_with(vec![BatchResultItem {
            custom_id: "user_1_conv_x".to_string(),
            content: Some(
                r#"[{"text": "lives in Berlin", "memory_type": "user_fact", "importance": 7}]"#
                    .to_string(),
            ),
            error: None,
        }]));

        // Empty RAG store: the fact is new.
        let rag = Arc::new(InMemoryRag::new());
        let mut job = MemoryExtractionJob::new(
            Arc::clone(&data_plane) as Arc<dyn DataPlane>,
            Arc::clone(&rag) as Arc<dyn RagService>,
            provider,
        );
        let stats = job.run().await;
        assert_eq!(stats.facts_extracted, 1);
        assert_eq!(rag.saved.lock().unwrap().len(), 1);

        let jobs = data_plane.batch_jobs.lock().unwrap().clone();
        assert_eq!(jobs[0].status, BatchJobStatus::Completed);
        assert_eq!(jobs[0].facts_extracted, 1);
    }

    #[tokio::test]
    async fn near_duplicates_are_not_saved_again() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        data_plane
            .create_batch_job(
                &Ctx::new(),
                &BatchJobCreate {
                    batch_id: "batch_1".to_string(),
                    user_id: 1,
                    status: BatchJobStatus::Pending,
                    provider: "fake".to_string(),
                    model: "gpt-4o-mini".to_string(),
                    messages_processed: 2,
                },
            )
            .await
            .unwrap();

        let provider = Arc::new(FakeBatchProvider::completed_with(vec![BatchResultItem {
            custom_id: "user_1_conv_x".to_string(),
            content: Some(
                r#"[{"text": "lives in Berlin", "memory_type": "user_fact", "importance": 7}]"#
                    .to_string(),
            ),
            error: None,
        }]));

        // The store already holds a memory that matches above the dedup
        // threshold (fake similarity = 1.0).
        let rag = Arc::new(InMemoryRag::new().with_memory("lives in Berlin, Germany", 1));
        let mut job = MemoryExtractionJob::new(
            Arc::clone(&data_plane) as Arc<dyn DataPlane>,
            Arc::clone(&rag) as Arc<dyn RagService>,
            provider,
        );
        let stats = job.run().await;
        assert_eq!(stats.facts_extracted, 0);
        assert_eq!(stats.facts_deduplicated, 1);
        assert!(rag.saved.lock().unwrap().is_empty());
    }
}
