//! Client for the RAG memory service.
//!
//! The vector store and embedding model live behind this HTTP surface; the
//! core only ever sends text and reads back ranked matches.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;

use maestro_core::Ctx;

use crate::client::{HttpClient, HttpClientConfig};
use crate::error::Result;
use crate::models::{Memory, MemoryCreate};

#[async_trait]
pub trait RagService: Send + Sync {
    async fn save_memory(&self, ctx: &Ctx, memory: &MemoryCreate) -> Result<Memory>;

    /// Top-k semantic search over a user's memories. `threshold` is the
    /// minimum cosine similarity; `0.0` returns everything.
    async fn search_memories(
        &self,
        ctx: &Ctx,
        query: &str,
        user_id: i64,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<Memory>>;
}

pub struct RagClient {
    http: HttpClient,
}

impl RagClient {
    pub fn new(base_url: &str, config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("rag-service", base_url, config)?,
        })
    }
}

#[async_trait]
impl RagService for RagClient {
    async fn save_memory(&self, ctx: &Ctx, memory: &MemoryCreate) -> Result<Memory> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/memory",
                Some(serde_json::to_value(memory).expect("memory serializes")),
            )
            .await
    }

    async fn search_memories(
        &self,
        ctx: &Ctx,
        query: &str,
        user_id: i64,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<Memory>> {
        self.http
            .request_json(
                ctx,
                Method::POST,
                "/api/memory/search",
                Some(json!({
                    "query": query,
                    "user_id": user_id,
                    "limit": limit,
                    "threshold": threshold,
                })),
            )
            .await
    }
}
