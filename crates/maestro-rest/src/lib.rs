//! `maestro-rest` — typed clients for the REST data plane and the RAG
//! memory service.
//!
//! Every call goes through one [`client::HttpClient`], which owns the
//! per-call policy: split connect/overall timeouts, exponential jittered
//! retry on transport-class failures, a per-endpoint-template circuit
//! breaker, and correlation-id propagation. Entity ownership lives on the
//! other side of the wire — this crate only shapes requests and responses.

pub mod breaker;
pub mod cache;
pub mod client;
pub mod error;
pub mod models;
pub mod rag;
pub mod rest;
pub mod testing;

pub use client::{HttpClient, HttpClientConfig};
pub use error::{RestError, Result};
pub use rag::{RagClient, RagService};
pub use rest::{DataPlane, RestClient};
