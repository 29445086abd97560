use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use maestro_rest::models::{Reminder, ReminderKind};

use crate::error::{Result, SchedulerError};

/// How a reminder fires. Built once per reminder and compared by
/// [`TriggerSpec::descriptor`] during reconciliation.
#[derive(Debug, Clone)]
pub enum TriggerSpec {
    /// Fire once at an absolute UTC instant.
    OneTime { at: DateTime<Utc> },
    /// Fire on a 5-field cron expression, interpreted in UTC.
    Recurring {
        schedule: Schedule,
        expression: String,
    },
}

impl TriggerSpec {
    pub fn from_reminder(reminder: &Reminder) -> Result<Self> {
        match reminder.kind {
            ReminderKind::OneTime => {
                let at = reminder.trigger_at.ok_or_else(|| SchedulerError::InvalidSchedule {
                    id: reminder.id.to_string(),
                    reason: "one_time reminder without trigger_at".to_string(),
                })?;
                Ok(TriggerSpec::OneTime { at })
            }
            ReminderKind::Recurring => {
                let expression = reminder.cron_expression.clone().ok_or_else(|| {
                    SchedulerError::InvalidSchedule {
                        id: reminder.id.to_string(),
                        reason: "recurring reminder without cron_expression".to_string(),
                    }
                })?;
                let schedule = parse_cron(&expression).map_err(|reason| {
                    SchedulerError::InvalidSchedule {
                        id: reminder.id.to_string(),
                        reason,
                    }
                })?;
                Ok(TriggerSpec::Recurring {
                    schedule,
                    expression,
                })
            }
        }
    }

    /// Late-fire tolerance: a job that missed its instant by more than
    /// this is skipped rather than fired stale.
    pub fn grace(&self) -> Duration {
        match self {
            TriggerSpec::OneTime { .. } => Duration::minutes(5),
            TriggerSpec::Recurring { .. } => Duration::minutes(1),
        }
    }

    /// Stable identity used to detect a changed trigger during
    /// reconciliation.
    pub fn descriptor(&self) -> String {
        match self {
            TriggerSpec::OneTime { at } => format!("once:{}", at.to_rfc3339()),
            TriggerSpec::Recurring { expression, .. } => format!("cron:{expression}"),
        }
    }
}

/// Next fire instant strictly after `after`. `None` means the trigger is
/// exhausted (a one-time instant in the past).
pub fn next_fire(spec: &TriggerSpec, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match spec {
        TriggerSpec::OneTime { at } => (*at > after).then_some(*at),
        TriggerSpec::Recurring { schedule, .. } => schedule.after(&after).next(),
    }
}

/// The stored expressions are 5-field (minute..day-of-week); the parser
/// wants a seconds field, so anchor one at zero.
fn parse_cron(expression: &str) -> std::result::Result<Schedule, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "expected 5 cron fields, got {}: '{expression}'",
            fields.len()
        ));
    }
    Schedule::from_str(&format!("0 {expression}")).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn one_time(at: DateTime<Utc>) -> Reminder {
        Reminder {
            id: Uuid::new_v4(),
            user_id: 42,
            assistant_id: Uuid::new_v4(),
            kind: ReminderKind::OneTime,
            trigger_at: Some(at),
            cron_expression: None,
            timezone: None,
            payload: json!({"text": "call"}),
            status: maestro_rest::models::ReminderStatus::Active,
            last_triggered_at: None,
        }
    }

    fn recurring(expr: &str) -> Reminder {
        Reminder {
            kind: ReminderKind::Recurring,
            trigger_at: None,
            cron_expression: Some(expr.to_string()),
            ..one_time(Utc::now())
        }
    }

    #[test]
    fn one_time_fires_only_in_the_future() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let spec = TriggerSpec::from_reminder(&one_time(at)).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap();
        assert_eq!(next_fire(&spec, before), Some(at));
        assert_eq!(next_fire(&spec, after), None);
    }

    #[test]
    fn recurring_advances_to_the_next_cron_slot() {
        let spec = TriggerSpec::from_reminder(&recurring("30 9 * * *")).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let next = next_fire(&spec, after).unwrap();
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()
        );
        let following = next_fire(&spec, next).unwrap();
        assert_eq!(
            following,
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn malformed_records_are_rejected() {
        let mut bad = one_time(Utc::now());
        bad.trigger_at = None;
        assert!(TriggerSpec::from_reminder(&bad).is_err());

        assert!(TriggerSpec::from_reminder(&recurring("not a cron")).is_err());
        assert!(TriggerSpec::from_reminder(&recurring("0 10 * *")).is_err());
    }

    #[test]
    fn descriptors_change_with_the_trigger() {
        let a = TriggerSpec::from_reminder(&recurring("0 10 * * *")).unwrap();
        let b = TriggerSpec::from_reminder(&recurring("0 11 * * *")).unwrap();
        assert_ne!(a.descriptor(), b.descriptor());
    }

    /// Local wall-clock time survives the creation-time translation: the
    /// stored UTC cron's next slot is the local hour in the source zone.
    #[test]
    fn cron_utc_round_trip_matches_local_hour() {
        use chrono::Timelike;

        // Etc/GMT-3 is UTC+3 with no DST.
        let converted = maestro_core::timeutil::cron_local_to_utc("15 10 * * *", "Etc/GMT-3");
        let spec = TriggerSpec::from_reminder(&recurring(&converted)).unwrap();
        let next = next_fire(&spec, Utc::now()).unwrap();
        let local = next.with_timezone(&chrono_tz::Tz::Etc__GMTMinus3);
        assert_eq!(local.hour(), 10);
        assert_eq!(local.minute(), 15);
    }
}
