//! `maestro-queue` — typed façade over Redis streams with consumer groups.
//!
//! Delivery contract is at-least-once: entries are acked only after
//! successful processing, failed entries accumulate a retry counter with a
//! TTL, and entries that exhaust the budget move to a `<stream>:dlq`
//! sibling stream together with their error context.

pub mod error;
pub mod stream;

pub use error::{QueueError, Result};
pub use stream::{DlqEntry, StreamClient, StreamEntry};
