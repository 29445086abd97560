//! `maestro-scheduler` — turns persisted reminders into timed queue events.
//!
//! # Overview
//!
//! The engine keeps an in-memory job per active reminder. Every minute it
//! reconciles that set against the data plane's `scheduled` view; every
//! second it fires jobs whose time has arrived, publishing a trigger onto
//! the secretary queue. One-time reminders are marked `completed` after
//! their single fire and never fire twice.
//!
//! | Kind        | Trigger                      | Grace  |
//! |-------------|------------------------------|--------|
//! | `one_time`  | absolute UTC instant         | 5 min  |
//! | `recurring` | 5-field cron expression, UTC | 1 min  |

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{QueueTriggerSink, ReminderScheduler, TriggerSink};
pub use error::{Result, SchedulerError};
pub use schedule::{next_fire, TriggerSpec};
