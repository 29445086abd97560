use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use maestro_core::{metrics_defs, Ctx};
use maestro_core::logging::EventType;
use maestro_protocol::{
    MessageContent, QueueMessage, QueueMessageSource, QueueMessageType, QueueMetadata,
    REMINDER_TRIGGER_TOOL,
};
use maestro_queue::StreamClient;
use maestro_rest::models::{Reminder, ReminderKind, ReminderStatus, ReminderUpdate};
use maestro_rest::DataPlane;

use crate::error::Result;
use crate::schedule::{next_fire, TriggerSpec};

/// Attempts per reconciliation before giving up until the next cycle.
const RECONCILE_RETRIES: u32 = 3;
const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Destination of fired triggers. The queue fabric in production; a
/// collecting sink in tests.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn send(&self, payload: &QueueMessage) -> Result<()>;
}

/// Publishes triggers onto the secretary input stream.
pub struct QueueTriggerSink {
    client: StreamClient,
    stream: String,
}

impl QueueTriggerSink {
    pub fn new(client: StreamClient, stream: String) -> Self {
        Self { client, stream }
    }
}

#[async_trait]
impl TriggerSink for QueueTriggerSink {
    async fn send(&self, payload: &QueueMessage) -> Result<()> {
        let json = serde_json::to_string(payload).expect("queue payload serializes");
        self.client.publish(&self.stream, &json).await?;
        Ok(())
    }
}

struct ScheduledJob {
    reminder: Reminder,
    spec: TriggerSpec,
    next_fire: Option<DateTime<Utc>>,
}

/// Single-node reminder scheduler.
///
/// Reconciles against the data plane every `reconcile_interval` and fires
/// due jobs on a one-second tick. Transient data-plane failures are
/// retried with bounded backoff; the loop itself never exits on them.
pub struct ReminderScheduler {
    data_plane: Arc<dyn DataPlane>,
    sink: Arc<dyn TriggerSink>,
    reconcile_interval: Duration,
    jobs: HashMap<Uuid, ScheduledJob>,
}

impl ReminderScheduler {
    pub fn new(
        data_plane: Arc<dyn DataPlane>,
        sink: Arc<dyn TriggerSink>,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            data_plane,
            sink,
            reconcile_interval,
            jobs: HashMap::new(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main loop. Reconciles immediately on start, then ticks until
    /// cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(event_type = %EventType::JobStart, "reminder scheduler started");
        self.reconcile_with_retry().await;

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        // The first interval tick completes immediately; consume it so the
        // startup reconcile above is not doubled.
        reconcile.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(event_type = %EventType::JobEnd, "reminder scheduler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.process_due(Utc::now()).await;
                }
                _ = reconcile.tick() => {
                    self.reconcile_with_retry().await;
                }
            }
        }
    }

    async fn reconcile_with_retry(&mut self) {
        for attempt in 1..=RECONCILE_RETRIES {
            let ctx = Ctx::new();
            match self.reconcile(&ctx).await {
                Ok(()) => return,
                Err(e) => {
                    error!(attempt, error = %e, "reminder reconciliation failed");
                    if attempt < RECONCILE_RETRIES {
                        tokio::time::sleep(RECONCILE_RETRY_DELAY).await;
                    }
                }
            }
        }
        warn!("reconciliation retries exhausted; keeping previous job set");
    }

    /// Align the in-memory job set with the data plane's active reminders.
    pub async fn reconcile(&mut self, ctx: &Ctx) -> Result<()> {
        let reminders = self.data_plane.get_scheduled_reminders(ctx).await?;
        let active_ids: std::collections::HashSet<Uuid> =
            reminders.iter().map(|r| r.id).collect();

        let before = self.jobs.len();
        self.jobs.retain(|id, _| active_ids.contains(id));
        let removed = before - self.jobs.len();

        let mut added = 0usize;
        let mut rescheduled = 0usize;
        let now = Utc::now();

        for reminder in reminders {
            let spec = match TriggerSpec::from_reminder(&reminder) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, error = %e, "skipping unschedulable reminder");
                    continue;
                }
            };
            match self.jobs.get_mut(&reminder.id) {
                Some(job) if job.spec.descriptor() == spec.descriptor() => {
                    job.reminder = reminder;
                }
                Some(job) => {
                    job.next_fire = next_fire(&spec, now);
                    job.spec = spec;
                    job.reminder = reminder;
                    rescheduled += 1;
                }
                None => {
                    let next = match &spec {
                        // A one-time instant already inside its grace window
                        // must still fire; past the window it is handled by
                        // the skip path on the first tick.
                        TriggerSpec::OneTime { at } => Some(*at),
                        TriggerSpec::Recurring { .. } => next_fire(&spec, now),
                    };
                    self.jobs.insert(
                        reminder.id,
                        ScheduledJob {
                            reminder,
                            spec,
                            next_fire: next,
                        },
                    );
                    added += 1;
                }
            }
        }

        if added + removed + rescheduled > 0 {
            info!(added, removed, rescheduled, total = self.jobs.len(), "reminder jobs reconciled");
        }
        Ok(())
    }

    /// Fire every job whose instant has arrived. Public with an explicit
    /// `now` so tests can drive the clock.
    pub async fn process_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.next_fire.map(|at| at <= now).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            if let Err(e) = self.fire_job(id, now).await {
                error!(reminder_id = %id, error = %e, "reminder fire failed");
            }
        }
    }

    async fn fire_job(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let Some(job) = self.jobs.get_mut(&id) else {
            return Ok(());
        };
        let scheduled_at = job.next_fire.expect("due job has a fire instant");
        let within_grace = now - scheduled_at <= job.spec.grace();
        let kind = job.reminder.kind;

        if within_grace {
            let payload = build_trigger(&job.reminder, now);
            self.sink.send(&payload).await?;
            counter!(metrics_defs::JOB_RUNS, "job" => "reminder_fire", "status" => "fired")
                .increment(1);
            info!(
                reminder_id = %id,
                user_id = job.reminder.user_id,
                kind = ?kind,
                event_type = %EventType::QueuePush,
                "reminder fired"
            );
        } else {
            counter!(metrics_defs::JOB_RUNS, "job" => "reminder_fire", "status" => "missed")
                .increment(1);
            warn!(
                reminder_id = %id,
                scheduled_at = %scheduled_at,
                "reminder missed its grace window, not firing"
            );
        }

        match kind {
            ReminderKind::OneTime => {
                // Completed whether fired or missed; an eternally-active
                // past-due reminder would otherwise be re-scheduled every
                // reconcile cycle.
                self.jobs.remove(&id);
                let update = ReminderUpdate {
                    status: Some(ReminderStatus::Completed),
                    last_triggered_at: within_grace.then_some(now),
                };
                let ctx = Ctx::new();
                if let Err(e) = self.data_plane.update_reminder(&ctx, id, &update).await {
                    // Reconciliation will re-fetch it as active; the retry
                    // happens there rather than here.
                    error!(reminder_id = %id, error = %e, "failed to mark reminder completed");
                }
            }
            ReminderKind::Recurring => {
                job.next_fire = next_fire(&job.spec, now);
                if within_grace {
                    let update = ReminderUpdate {
                        status: None,
                        last_triggered_at: Some(now),
                    };
                    let ctx = Ctx::new();
                    if let Err(e) = self.data_plane.update_reminder(&ctx, id, &update).await {
                        warn!(reminder_id = %id, error = %e, "failed to record last trigger time");
                    }
                }
            }
        }
        Ok(())
    }
}

fn build_trigger(reminder: &Reminder, now: DateTime<Utc>) -> QueueMessage {
    let kind = match reminder.kind {
        ReminderKind::OneTime => "one_time",
        ReminderKind::Recurring => "recurring",
    };
    let message = reminder
        .payload
        .get("text")
        .and_then(|t| t.as_str())
        .map(String::from)
        .unwrap_or_else(|| reminder.payload.to_string());

    QueueMessage {
        user_id: reminder.user_id,
        source: QueueMessageSource::Cron,
        message_type: QueueMessageType::Tool,
        timestamp: now,
        content: MessageContent {
            message,
            metadata: Some(QueueMetadata {
                tool_name: Some(REMINDER_TRIGGER_TOOL.to_string()),
                assistant_id: Some(reminder.assistant_id),
                reminder_id: Some(reminder.id),
                reminder_type: Some(kind.to_string()),
                payload: Some(reminder.payload.clone()),
                triggered_at_event: Some(now),
                extra: Default::default(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    use maestro_rest::models::ReminderCreate;
    use maestro_rest::testing::InMemoryDataPlane;

    #[derive(Default)]
    struct CollectingSink {
        sent: Mutex<Vec<QueueMessage>>,
    }

    #[async_trait]
    impl TriggerSink for CollectingSink {
        async fn send(&self, payload: &QueueMessage) -> Result<()> {
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    async fn seed_one_time(
        data_plane: &InMemoryDataPlane,
        at: DateTime<Utc>,
    ) -> Reminder {
        data_plane
            .create_reminder(
                &Ctx::new(),
                &ReminderCreate {
                    user_id: 42,
                    assistant_id: Uuid::new_v4(),
                    kind: ReminderKind::OneTime,
                    payload: json!({"text": "call"}),
                    status: ReminderStatus::Active,
                    trigger_at: Some(at),
                    cron_expression: None,
                    timezone: None,
                },
            )
            .await
            .unwrap()
    }

    fn scheduler(
        data_plane: Arc<InMemoryDataPlane>,
        sink: Arc<CollectingSink>,
    ) -> ReminderScheduler {
        ReminderScheduler::new(data_plane, sink, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn one_time_reminder_fires_once_and_completes() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let seeded = seed_one_time(&data_plane, at).await;

        let sink = Arc::new(CollectingSink::default());
        let mut engine = scheduler(Arc::clone(&data_plane), Arc::clone(&sink));
        engine.reconcile(&Ctx::new()).await.unwrap();
        assert_eq!(engine.job_count(), 1);

        let fire_time = at + ChronoDuration::seconds(1);
        engine.process_due(fire_time).await;

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_reminder_trigger());
        let trigger = sent[0].trigger_event().unwrap();
        assert_eq!(trigger.reminder_id, seeded.id);
        assert_eq!(trigger.message, "call");

        let stored = data_plane.reminders.lock().unwrap()[&seeded.id].clone();
        assert_eq!(stored.status, ReminderStatus::Completed);
        assert_eq!(engine.job_count(), 0);

        // A later tick must not fire it again.
        engine.process_due(fire_time + ChronoDuration::minutes(10)).await;
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_time_reminder_past_grace_is_skipped_but_completed() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let seeded = seed_one_time(&data_plane, at).await;

        let sink = Arc::new(CollectingSink::default());
        let mut engine = scheduler(Arc::clone(&data_plane), Arc::clone(&sink));
        engine.reconcile(&Ctx::new()).await.unwrap();

        engine.process_due(at + ChronoDuration::minutes(20)).await;
        assert!(sink.sent.lock().unwrap().is_empty());
        let stored = data_plane.reminders.lock().unwrap()[&seeded.id].clone();
        assert_eq!(stored.status, ReminderStatus::Completed);
    }

    #[tokio::test]
    async fn recurring_reminder_survives_fires() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let reminder = data_plane
            .create_reminder(
                &Ctx::new(),
                &ReminderCreate {
                    user_id: 42,
                    assistant_id: Uuid::new_v4(),
                    kind: ReminderKind::Recurring,
                    payload: json!({"text": "standup"}),
                    status: ReminderStatus::Active,
                    trigger_at: None,
                    cron_expression: Some("0 9 * * *".to_string()),
                    timezone: None,
                },
            )
            .await
            .unwrap();

        let sink = Arc::new(CollectingSink::default());
        let mut engine = scheduler(Arc::clone(&data_plane), Arc::clone(&sink));
        engine.reconcile(&Ctx::new()).await.unwrap();

        // Fire at the next 09:00 slot.
        let slot = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
        {
            let job = engine.jobs.get_mut(&reminder.id).unwrap();
            job.next_fire = Some(slot);
        }
        engine.process_due(slot + ChronoDuration::seconds(30)).await;

        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(engine.job_count(), 1);
        let job = engine.jobs.get(&reminder.id).unwrap();
        assert_eq!(
            job.next_fire,
            Some(Utc.with_ymd_and_hms(2030, 1, 2, 9, 0, 0).unwrap())
        );
        let stored = data_plane.reminders.lock().unwrap()[&reminder.id].clone();
        assert_eq!(stored.status, ReminderStatus::Active);
        assert!(stored.last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn reconcile_unschedules_vanished_reminders() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let seeded = seed_one_time(&data_plane, Utc::now() + ChronoDuration::hours(1)).await;

        let sink = Arc::new(CollectingSink::default());
        let mut engine = scheduler(Arc::clone(&data_plane), Arc::clone(&sink));
        engine.reconcile(&Ctx::new()).await.unwrap();
        assert_eq!(engine.job_count(), 1);

        data_plane
            .delete_reminder(&Ctx::new(), seeded.id)
            .await
            .unwrap();
        engine.reconcile(&Ctx::new()).await.unwrap();
        assert_eq!(engine.job_count(), 0);
    }

    #[tokio::test]
    async fn changed_trigger_is_rescheduled() {
        let data_plane = Arc::new(InMemoryDataPlane::new());
        let seeded = seed_one_time(&data_plane, Utc::now() + ChronoDuration::hours(1)).await;

        let sink = Arc::new(CollectingSink::default());
        let mut engine = scheduler(Arc::clone(&data_plane), Arc::clone(&sink));
        engine.reconcile(&Ctx::new()).await.unwrap();

        let moved = Utc::now() + ChronoDuration::hours(2);
        data_plane.reminders.lock().unwrap().get_mut(&seeded.id).unwrap().trigger_at =
            Some(moved);
        engine.reconcile(&Ctx::new()).await.unwrap();

        let job = engine.jobs.get(&seeded.id).unwrap();
        assert_eq!(job.next_fire, Some(moved));
    }
}
