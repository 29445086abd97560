//! In-memory fakes of the service traits.
//!
//! Used by the other crates' tests to exercise the agent graph, scheduler
//! and extractor without a network. State is plain mutex-guarded maps with
//! a couple of failure-injection switches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use maestro_core::Ctx;

use crate::error::{RestError, Result};
use crate::models::*;
use crate::rag::RagService;
use crate::rest::DataPlane;

#[derive(Default)]
pub struct InMemoryDataPlane {
    pub users: Mutex<Vec<User>>,
    pub assistants: Mutex<HashMap<Uuid, Assistant>>,
    pub assistant_tools: Mutex<HashMap<Uuid, Vec<ToolDefinitionRecord>>>,
    pub assignments: Mutex<Vec<UserSecretaryAssignment>>,
    pub messages: Mutex<Vec<Message>>,
    pub summaries: Mutex<Vec<UserSummary>>,
    pub reminders: Mutex<HashMap<Uuid, Reminder>>,
    pub batch_jobs: Mutex<Vec<BatchJob>>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub global_settings: Mutex<GlobalSettings>,
    next_message_id: AtomicI64,
    next_summary_id: AtomicI64,
    next_batch_job_id: AtomicI64,
    /// When set, `create_message` answers 500 — used to taint runs.
    pub fail_create_message: AtomicBool,
}

impl InMemoryDataPlane {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            next_summary_id: AtomicI64::new(1),
            next_batch_job_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn insert_assistant(&self, assistant: Assistant) {
        self.assistants
            .lock()
            .unwrap()
            .insert(assistant.id, assistant);
    }

    pub fn assign_secretary(&self, user_id: i64, secretary_id: Uuid) {
        let mut assignments = self.assignments.lock().unwrap();
        for a in assignments.iter_mut().filter(|a| a.user_id == user_id) {
            a.is_active = false;
        }
        assignments.push(UserSecretaryAssignment {
            user_id,
            secretary_id,
            is_active: true,
            updated_at: Some(Utc::now()),
        });
    }

    pub fn message(&self, id: i64) -> Option<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn fail(detail: &str) -> RestError {
        RestError::ServiceResponse {
            status: 500,
            detail: detail.to_string(),
        }
    }
}

#[async_trait]
impl DataPlane for InMemoryDataPlane {
    async fn get_user_by_telegram_id(&self, _ctx: &Ctx, telegram_id: i64) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.telegram_id == telegram_id)
            .cloned())
    }

    async fn get_assistant(&self, _ctx: &Ctx, id: Uuid) -> Result<Assistant> {
        self.assistants
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RestError::ServiceResponse {
                status: 404,
                detail: format!("assistant {id} not found"),
            })
    }

    async fn list_assistants(&self, _ctx: &Ctx) -> Result<Vec<Assistant>> {
        Ok(self.assistants.lock().unwrap().values().cloned().collect())
    }

    async fn get_assistant_tools(&self, _ctx: &Ctx, id: Uuid) -> Result<Vec<ToolDefinitionRecord>> {
        Ok(self
            .assistant_tools
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_user_secretary(&self, _ctx: &Ctx, user_id: i64) -> Result<Option<Assistant>> {
        let secretary_id = self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.user_id == user_id && a.is_active)
            .map(|a| a.secretary_id);
        Ok(secretary_id.and_then(|id| self.assistants.lock().unwrap().get(&id).cloned()))
    }

    async fn list_active_assignments(&self, _ctx: &Ctx) -> Result<Vec<UserSecretaryAssignment>> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    async fn create_reminder(&self, _ctx: &Ctx, create: &ReminderCreate) -> Result<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            user_id: create.user_id,
            assistant_id: create.assistant_id,
            kind: create.kind,
            trigger_at: create.trigger_at,
            cron_expression: create.cron_expression.clone(),
            timezone: create.timezone.clone(),
            payload: create.payload.clone(),
            status: create.status,
            last_triggered_at: None,
        };
        self.reminders
            .lock()
            .unwrap()
            .insert(reminder.id, reminder.clone());
        Ok(reminder)
    }

    async fn update_reminder(
        &self,
        _ctx: &Ctx,
        id: Uuid,
        update: &ReminderUpdate,
    ) -> Result<Reminder> {
        let mut reminders = self.reminders.lock().unwrap();
        let reminder = reminders.get_mut(&id).ok_or(RestError::ServiceResponse {
            status: 404,
            detail: format!("reminder {id} not found"),
        })?;
        if let Some(status) = update.status {
            reminder.status = status;
        }
        if let Some(at) = update.last_triggered_at {
            reminder.last_triggered_at = Some(at);
        }
        Ok(reminder.clone())
    }

    async fn delete_reminder(&self, _ctx: &Ctx, id: Uuid) -> Result<()> {
        self.reminders.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn get_scheduled_reminders(&self, _ctx: &Ctx) -> Result<Vec<Reminder>> {
        Ok(self
            .reminders
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == ReminderStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_user_active_reminders(&self, _ctx: &Ctx, user_id: i64) -> Result<Vec<Reminder>> {
        Ok(self
            .reminders
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id == user_id && r.status == ReminderStatus::Active)
            .cloned()
            .collect())
    }

    async fn create_message(&self, _ctx: &Ctx, create: &MessageCreate) -> Result<Message> {
        if self.fail_create_message.load(Ordering::SeqCst) {
            return Err(Self::fail("message creation disabled"));
        }
        let message = Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            user_id: create.user_id,
            assistant_id: create.assistant_id,
            timestamp: Utc::now(),
            role: create.role,
            content: create.content.clone(),
            content_type: Some(create.content_type.clone()),
            tool_call_id: create.tool_call_id.clone(),
            status: create.status,
            summary_id: None,
            meta_data: create.meta_data.clone(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn update_message(&self, _ctx: &Ctx, id: i64, update: &MessageUpdate) -> Result<Message> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(RestError::ServiceResponse {
                status: 404,
                detail: format!("message {id} not found"),
            })?;
        if let Some(status) = update.status {
            message.status = status;
        }
        if update.summary_id.is_some() {
            message.summary_id = update.summary_id;
        }
        Ok(message.clone())
    }

    async fn get_messages(&self, _ctx: &Ctx, query: &MessageQuery) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap();
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|m| m.user_id == query.user_id && m.assistant_id == query.assistant_id)
            .filter(|m| query.status.map(|s| m.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.id);
        if let Some(limit) = query.limit {
            if matching.len() > limit {
                matching = matching.split_off(matching.len() - limit);
            }
        }
        Ok(matching)
    }

    async fn create_summary(&self, _ctx: &Ctx, create: &UserSummaryCreate) -> Result<UserSummary> {
        let summary = UserSummary {
            id: self.next_summary_id.fetch_add(1, Ordering::SeqCst),
            user_id: create.user_id,
            assistant_id: create.assistant_id,
            summary_text: create.summary_text.clone(),
            last_message_id_covered: create.last_message_id_covered,
            token_count: create.token_count,
            created_at: Utc::now(),
        };
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(summary)
    }

    async fn get_latest_summary(
        &self,
        _ctx: &Ctx,
        user_id: i64,
        assistant_id: Uuid,
    ) -> Result<Option<UserSummary>> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id && s.assistant_id == assistant_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_conversations(
        &self,
        _ctx: &Ctx,
        _since: DateTime<Utc>,
        min_messages: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.messages.len() >= min_messages)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_global_settings(&self, _ctx: &Ctx) -> Result<GlobalSettings> {
        Ok(self.global_settings.lock().unwrap().clone())
    }

    async fn list_pending_batch_jobs(&self, _ctx: &Ctx) -> Result<Vec<BatchJob>> {
        Ok(self
            .batch_jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| matches!(j.status, BatchJobStatus::Pending | BatchJobStatus::Processing))
            .cloned()
            .collect())
    }

    async fn create_batch_job(&self, _ctx: &Ctx, create: &BatchJobCreate) -> Result<BatchJob> {
        let job = BatchJob {
            id: self.next_batch_job_id.fetch_add(1, Ordering::SeqCst),
            batch_id: create.batch_id.clone(),
            user_id: create.user_id,
            status: create.status,
            provider: create.provider.clone(),
            model: create.model.clone(),
            messages_processed: create.messages_processed,
            facts_extracted: 0,
            window_start: None,
            window_end: None,
        };
        self.batch_jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn update_batch_job(
        &self,
        _ctx: &Ctx,
        id: i64,
        update: &BatchJobUpdate,
    ) -> Result<BatchJob> {
        let mut jobs = self.batch_jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(RestError::ServiceResponse {
                status: 404,
                detail: format!("batch job {id} not found"),
            })?;
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(count) = update.facts_extracted {
            job.facts_extracted = count;
        }
        Ok(job.clone())
    }

    async fn health(&self, _ctx: &Ctx) -> Result<()> {
        Ok(())
    }
}

/// Fake RAG service: `search_memories` answers from a canned list filtered
/// by user, `save_memory` records the create.
#[derive(Default)]
pub struct InMemoryRag {
    pub memories: Mutex<Vec<Memory>>,
    pub saved: Mutex<Vec<MemoryCreate>>,
    /// Similarity assigned to every canned memory; searches whose threshold
    /// exceeds it return nothing.
    pub similarity: Mutex<f64>,
}

impl InMemoryRag {
    pub fn new() -> Self {
        Self {
            similarity: Mutex::new(1.0),
            ..Default::default()
        }
    }

    pub fn with_memory(self, text: &str, user_id: i64) -> Self {
        self.memories.lock().unwrap().push(Memory {
            id: Uuid::new_v4(),
            user_id,
            assistant_id: None,
            text: text.to_string(),
            memory_type: MemoryKind::UserFact,
            importance: 5,
            source_message_id: None,
            last_accessed_at: None,
        });
        self
    }
}

#[async_trait]
impl RagService for InMemoryRag {
    async fn save_memory(&self, _ctx: &Ctx, memory: &MemoryCreate) -> Result<Memory> {
        self.saved.lock().unwrap().push(memory.clone());
        let stored = Memory {
            id: Uuid::new_v4(),
            user_id: memory.user_id,
            assistant_id: memory.assistant_id,
            text: memory.text.clone(),
            memory_type: memory.memory_type,
            importance: memory.importance,
            source_message_id: memory.source_message_id,
            last_accessed_at: None,
        };
        self.memories.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn search_memories(
        &self,
        _ctx: &Ctx,
        _query: &str,
        user_id: i64,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<Memory>> {
        let similarity = *self.similarity.lock().unwrap();
        if threshold > similarity {
            return Ok(Vec::new());
        }
        Ok(self
            .memories
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
