//! Typed endpoint wrappers over the REST data plane.
//!
//! [`DataPlane`] is the seam the agent graph, scheduler and extractor
//! depend on; [`RestClient`] is the production implementation. Tests supply
//! in-memory fakes of the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use uuid::Uuid;

use maestro_core::Ctx;

use crate::client::{HttpClient, HttpClientConfig};
use crate::error::Result;
use crate::models::*;

#[async_trait]
pub trait DataPlane: Send + Sync {
    async fn get_user_by_telegram_id(&self, ctx: &Ctx, telegram_id: i64) -> Result<Option<User>>;
    async fn get_assistant(&self, ctx: &Ctx, id: Uuid) -> Result<Assistant>;
    async fn list_assistants(&self, ctx: &Ctx) -> Result<Vec<Assistant>>;
    async fn get_assistant_tools(&self, ctx: &Ctx, id: Uuid) -> Result<Vec<ToolDefinitionRecord>>;
    async fn get_user_secretary(&self, ctx: &Ctx, user_id: i64) -> Result<Option<Assistant>>;
    async fn list_active_assignments(&self, ctx: &Ctx) -> Result<Vec<UserSecretaryAssignment>>;

    async fn create_reminder(&self, ctx: &Ctx, reminder: &ReminderCreate) -> Result<Reminder>;
    async fn update_reminder(
        &self,
        ctx: &Ctx,
        id: Uuid,
        update: &ReminderUpdate,
    ) -> Result<Reminder>;
    async fn delete_reminder(&self, ctx: &Ctx, id: Uuid) -> Result<()>;
    async fn get_scheduled_reminders(&self, ctx: &Ctx) -> Result<Vec<Reminder>>;
    async fn get_user_active_reminders(&self, ctx: &Ctx, user_id: i64) -> Result<Vec<Reminder>>;

    async fn create_message(&self, ctx: &Ctx, message: &MessageCreate) -> Result<Message>;
    async fn update_message(&self, ctx: &Ctx, id: i64, update: &MessageUpdate) -> Result<Message>;
    async fn get_messages(&self, ctx: &Ctx, query: &MessageQuery) -> Result<Vec<Message>>;

    async fn create_summary(&self, ctx: &Ctx, summary: &UserSummaryCreate) -> Result<UserSummary>;
    async fn get_latest_summary(
        &self,
        ctx: &Ctx,
        user_id: i64,
        assistant_id: Uuid,
    ) -> Result<Option<UserSummary>>;

    async fn get_conversations(
        &self,
        ctx: &Ctx,
        since: DateTime<Utc>,
        min_messages: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>>;
    async fn get_global_settings(&self, ctx: &Ctx) -> Result<GlobalSettings>;
    async fn list_pending_batch_jobs(&self, ctx: &Ctx) -> Result<Vec<BatchJob>>;
    async fn create_batch_job(&self, ctx: &Ctx, job: &BatchJobCreate) -> Result<BatchJob>;
    async fn update_batch_job(&self, ctx: &Ctx, id: i64, update: &BatchJobUpdate)
        -> Result<BatchJob>;

    async fn health(&self, ctx: &Ctx) -> Result<()>;
}

pub struct RestClient {
    http: HttpClient,
    cache: Option<std::sync::Arc<crate::cache::RedisCache>>,
}

impl RestClient {
    pub fn new(base_url: &str, config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("rest-service", base_url, config)?,
            cache: None,
        })
    }

    /// Enable the read-through cache for hot configuration reads
    /// (assistant records). Invalidation is TTL- plus broadcast-driven.
    pub fn with_cache(mut self, cache: std::sync::Arc<crate::cache::RedisCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl DataPlane for RestClient {
    async fn get_user_by_telegram_id(&self, ctx: &Ctx, telegram_id: i64) -> Result<Option<User>> {
        self.http
            .request_optional(
                ctx,
                Method::GET,
                &format!("/api/users/by-telegram-id?telegram_id={telegram_id}"),
                None,
            )
            .await
    }

    async fn get_assistant(&self, ctx: &Ctx, id: Uuid) -> Result<Assistant> {
        let fetch = || async {
            self.http
                .request_json(ctx, Method::GET, &format!("/api/assistants/{id}"), None)
                .await
        };
        match &self.cache {
            Some(cache) => cache.get_or_load(&format!("assistant:{id}"), fetch).await,
            None => fetch().await,
        }
    }

    async fn list_assistants(&self, ctx: &Ctx) -> Result<Vec<Assistant>> {
        self.http
            .request_json(ctx, Method::GET, "/api/assistants", None)
            .await
    }

    async fn get_assistant_tools(&self, ctx: &Ctx, id: Uuid) -> Result<Vec<ToolDefinitionRecord>> {
        self.http
            .request_json(ctx, Method::GET, &format!("/api/assistants/{id}/tools"), None)
            .await
    }

    async fn get_user_secretary(&self, ctx: &Ctx, user_id: i64) -> Result<Option<Assistant>> {
        self.http
            .request_optional(
                ctx,
                Method::GET,
                &format!("/api/users/{user_id}/secretary"),
                None,
            )
            .await
    }

    async fn list_active_assignments(&self, ctx: &Ctx) -> Result<Vec<UserSecretaryAssignment>> {
        self.http
            .request_json(
                ctx,
                Method::GET,
                "/api/user-secretary-assignments?active=true",
                None,
            )
            .await
    }

    async fn create_reminder(&self, ctx: &Ctx, reminder: &ReminderCreate) -> Result<Reminder> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/reminders",
                Some(serde_json::to_value(reminder).expect("reminder serializes")),
            )
            .await
    }

    async fn update_reminder(
        &self,
        ctx: &Ctx,
        id: Uuid,
        update: &ReminderUpdate,
    ) -> Result<Reminder> {
        self.http
            .request_json(
                ctx,
                Method::PATCH,
                &format!("/api/reminders/{id}"),
                Some(serde_json::to_value(update).expect("update serializes")),
            )
            .await
    }

    async fn delete_reminder(&self, ctx: &Ctx, id: Uuid) -> Result<()> {
        self.http
            .request_unit(ctx, Method::DELETE, &format!("/api/reminders/{id}"), None)
            .await
    }

    async fn get_scheduled_reminders(&self, ctx: &Ctx) -> Result<Vec<Reminder>> {
        self.http
            .request_json(ctx, Method::GET, "/api/reminders/scheduled", None)
            .await
    }

    async fn get_user_active_reminders(&self, ctx: &Ctx, user_id: i64) -> Result<Vec<Reminder>> {
        self.http
            .request_json(
                ctx,
                Method::GET,
                &format!("/api/users/{user_id}/reminders?status=active"),
                None,
            )
            .await
    }

    async fn create_message(&self, ctx: &Ctx, message: &MessageCreate) -> Result<Message> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/messages",
                Some(serde_json::to_value(message).expect("message serializes")),
            )
            .await
    }

    async fn update_message(&self, ctx: &Ctx, id: i64, update: &MessageUpdate) -> Result<Message> {
        self.http
            .request_json(
                ctx,
                Method::PATCH,
                &format!("/api/messages/{id}"),
                Some(serde_json::to_value(update).expect("update serializes")),
            )
            .await
    }

    async fn get_messages(&self, ctx: &Ctx, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut path = format!(
            "/api/messages?user_id={}&assistant_id={}",
            query.user_id, query.assistant_id
        );
        if let Some(status) = query.status {
            let status = serde_json::to_string(&status).expect("status serializes");
            path.push_str(&format!("&status={}", status.trim_matches('"')));
        }
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={limit}"));
        }
        if let Some(sort_by) = query.sort_by {
            path.push_str(&format!("&sort_by={sort_by}"));
        }
        if let Some(sort_order) = query.sort_order {
            path.push_str(&format!("&sort_order={sort_order}"));
        }
        self.http.request_json(ctx, Method::GET, &path, None).await
    }

    async fn create_summary(&self, ctx: &Ctx, summary: &UserSummaryCreate) -> Result<UserSummary> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/user-summaries",
                Some(serde_json::to_value(summary).expect("summary serializes")),
            )
            .await
    }

    async fn get_latest_summary(
        &self,
        ctx: &Ctx,
        user_id: i64,
        assistant_id: Uuid,
    ) -> Result<Option<UserSummary>> {
        self.http
            .request_optional(
                ctx,
                Method::GET,
                &format!("/api/users/{user_id}/assistants/{assistant_id}/summary"),
                None,
            )
            .await
    }

    async fn get_conversations(
        &self,
        ctx: &Ctx,
        since: DateTime<Utc>,
        min_messages: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        self.http
            .request_json(
                ctx,
                Method::GET,
                &format!(
                    "/api/conversations?since={}&min_messages={min_messages}&limit={limit}",
                    since.to_rfc3339()
                ),
                None,
            )
            .await
    }

    async fn get_global_settings(&self, ctx: &Ctx) -> Result<GlobalSettings> {
        self.http
            .request_json(ctx, Method::GET, "/api/global-settings", None)
            .await
    }

    async fn list_pending_batch_jobs(&self, ctx: &Ctx) -> Result<Vec<BatchJob>> {
        self.http
            .request_json(ctx, Method::GET, "/api/batch-jobs?status=pending", None)
            .await
    }

    async fn create_batch_job(&self, ctx: &Ctx, job: &BatchJobCreate) -> Result<BatchJob> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/batch-jobs",
                Some(serde_json::to_value(job).expect("job serializes")),
            )
            .await
    }

    async fn update_batch_job(
        &self,
        ctx: &Ctx,
        id: i64,
        update: &BatchJobUpdate,
    ) -> Result<BatchJob> {
        self.http
            .request_json(
                ctx,
                Method::PATCH,
                &format!("/api/batch-jobs/{id}"),
                Some(serde_json::to_value(update).expect("update serializes")),
            )
            .await
    }

    async fn health(&self, ctx: &Ctx) -> Result<()> {
        self.http.request_unit(ctx, Method::GET, "/health", None).await
    }
}
