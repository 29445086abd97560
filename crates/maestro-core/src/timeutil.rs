//! Timezone translation helpers for reminder creation.
//!
//! The data plane stores one-time triggers and cron expressions in UTC.
//! Conversion from the caller's local time happens exactly once, at
//! creation time, with these helpers.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{MaestroError, Result};

/// Parse a local wall-clock timestamp (`YYYY-MM-DD HH:MM`, optionally with
/// seconds or a `T` separator) in the given IANA zone and return the UTC
/// instant.
pub fn local_datetime_to_utc(local: &str, timezone: &str) -> Result<DateTime<Utc>> {
    let tz = Tz::from_str(timezone)
        .map_err(|_| MaestroError::Config(format!("unknown timezone: {timezone}")))?;

    let naive = parse_local(local)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            MaestroError::Config(format!(
                "local time {local} does not exist in zone {timezone}"
            ))
        })
}

fn parse_local(s: &str) -> Result<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    Err(MaestroError::Config(format!(
        "invalid datetime '{s}', expected YYYY-MM-DD HH:MM"
    )))
}

/// Translate the hour field of a 5-field cron expression from the caller's
/// local zone to UTC, relative to the current wall-clock day.
///
/// Only a purely numeric hour is converted; `*`, lists, ranges and steps
/// pass through unchanged, as does anything that fails to parse. A numeric
/// minute is used as conversion context so half-hour zones land correctly.
pub fn cron_local_to_utc(expr: &str, timezone: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        warn!(expr, "cron expression does not have 5 fields, skipping UTC conversion");
        return expr.to_string();
    }

    let hour: u32 = match parts[1].parse() {
        Ok(h) if h <= 23 => h,
        Ok(h) => {
            warn!(expr, hour = h, "cron hour out of range, skipping UTC conversion");
            return expr.to_string();
        }
        Err(_) => return expr.to_string(),
    };

    let minute: u32 = match parts[0].parse::<u32>() {
        Ok(m) if m <= 59 => m,
        _ => 0,
    };

    let tz = match Tz::from_str(timezone) {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone, expr, "unknown timezone, keeping original cron expression");
            return expr.to_string();
        }
    };

    let now_local = Utc::now().with_timezone(&tz);
    let local_at_hour = match now_local
        .with_hour(hour)
        .and_then(|dt| dt.with_minute(minute))
        .and_then(|dt| dt.with_second(0))
    {
        Some(dt) => dt,
        None => {
            warn!(expr, timezone, "could not anchor cron hour to today, keeping original");
            return expr.to_string();
        }
    };

    let utc_hour = local_at_hour.with_timezone(&Utc).hour();
    format!(
        "{} {} {} {} {}",
        parts[0], utc_hour, parts[2], parts[3], parts[4]
    )
}
