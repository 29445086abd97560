//! Read-through Redis cache for data-plane responses.
//!
//! Entries are JSON-serialized under `<prefix>:<key>` with a TTL.
//! Invalidation deletes by glob pattern and broadcasts the pattern on a
//! pub/sub channel so sibling instances drop the same stale entries.

use std::time::Duration;

use futures_util::StreamExt;
use metrics::counter;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use maestro_core::metrics_defs;

use crate::error::{RestError, Result};

pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
    channel: String,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, ttl: Duration) -> Self {
        let prefix = prefix.into();
        let channel = format!("cache_invalidation:{prefix}");
        Self {
            conn,
            prefix,
            ttl,
            channel,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| RestError::Cache(e.to_string()))?;
        let pattern = normalize_key(key);
        match raw {
            Some(json) => {
                counter!(
                    metrics_defs::CACHE_HITS,
                    "prefix" => self.prefix.clone(),
                    "key" => pattern
                )
                .increment(1);
                let value =
                    serde_json::from_str(&json).map_err(|e| RestError::Cache(e.to_string()))?;
                Ok(Some(value))
            }
            None => {
                counter!(
                    metrics_defs::CACHE_MISSES,
                    "prefix" => self.prefix.clone(),
                    "key" => pattern
                )
                .increment(1);
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value).map_err(|e| RestError::Cache(e.to_string()))?;
        let _: () = conn
            .set_ex(self.full_key(key), json, self.ttl.as_secs())
            .await
            .map_err(|e| RestError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Fetch-through: return the cached value or populate it from `load`.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get(key).await? {
            return Ok(hit);
        }
        let value = load().await?;
        if let Err(e) = self.set(key, &value).await {
            warn!(key, error = %e, "cache population failed, serving uncached value");
        }
        Ok(value)
    }

    /// Delete matching entries locally and broadcast the pattern so sibling
    /// instances do the same.
    pub async fn invalidate(&self, pattern: &str) -> Result<u64> {
        let deleted = self.delete_pattern(pattern).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(&self.channel, pattern)
            .await
            .map_err(|e| RestError::Cache(e.to_string()))?;
        debug!(prefix = %self.prefix, pattern, deleted, "cache invalidated");
        Ok(deleted)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut scan_conn = self.conn.clone();
        let full_pattern = self.full_key(pattern);
        let keys: Vec<String> = {
            let mut iter = scan_conn
                .scan_match::<_, String>(&full_pattern)
                .await
                .map_err(|e| RestError::Cache(e.to_string()))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn
            .del(keys)
            .await
            .map_err(|e| RestError::Cache(e.to_string()))?;
        Ok(deleted)
    }
}

/// Listen for invalidation broadcasts from sibling instances and apply the
/// same pattern deletes locally. Runs until cancelled.
pub async fn run_invalidation_listener(
    client: redis::Client,
    cache: std::sync::Arc<RedisCache>,
    cancel: CancellationToken,
) {
    let mut pubsub = match client.get_async_pubsub().await {
        Ok(ps) => ps,
        Err(e) => {
            warn!(error = %e, "cache invalidation listener could not connect");
            return;
        }
    };
    if let Err(e) = pubsub.subscribe(cache.channel()).await {
        warn!(error = %e, "cache invalidation subscribe failed");
        return;
    }

    let mut messages = pubsub.on_message();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = messages.next() => {
                let Some(msg) = msg else { break };
                let pattern: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "undecodable invalidation payload");
                        continue;
                    }
                };
                if let Err(e) = cache.delete_pattern(&pattern).await {
                    warn!(pattern, error = %e, "sibling invalidation failed");
                }
            }
        }
    }
}

/// Collapse numeric id segments so cardinality stays bounded in metrics.
fn normalize_key(key: &str) -> String {
    key.split(':')
        .map(|part| {
            if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
                "{id}"
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_numeric_segments() {
        assert_eq!(normalize_key("secretary:42"), "secretary:{id}");
        assert_eq!(normalize_key("assistants"), "assistants");
        assert_eq!(normalize_key("user:7:reminders"), "user:{id}:reminders");
    }
}
