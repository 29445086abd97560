//! `maestro-extractor` — out-of-band fact extraction from conversations.
//!
//! On an interval (default daily) the job reads recent conversations,
//! builds one fact-extraction request per conversation and submits them as
//! a provider batch (batch pricing is roughly half of real-time). A later
//! run collects finished batches, parses the fact lists leniently, and
//! writes each new fact to the RAG service unless a semantically close
//! memory already exists.

pub mod error;
pub mod job;
pub mod provider;

pub use error::{ExtractorError, Result};
pub use job::{ExtractionStats, MemoryExtractionJob};
pub use provider::{BatchProvider, BatchRequestItem, BatchResultItem, BatchStatus, OpenAiBatchProvider};
