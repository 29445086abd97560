//! `maestro-protocol` — canonical queue wire types.
//!
//! Everything that crosses a Redis stream is described here and nowhere
//! else: the inbound [`QueueMessage`], the trigger metadata attached by the
//! scheduler, and the [`ResponsePayload`] emitted back to the frontend.
//! Inbound parsing is strict — unknown fields are a producer bug and are
//! surfaced as a deserialization error rather than silently dropped.

pub mod payload;

pub use payload::{
    MessageContent, QueueMessage, QueueMessageSource, QueueMessageType, QueueMetadata,
    ResponsePayload, TriggerEvent, REMINDER_TRIGGER_TOOL,
};
