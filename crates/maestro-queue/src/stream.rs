use metrics::{counter, gauge};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamRangeReply,
    StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use maestro_core::metrics_defs;
use maestro_core::logging::EventType;

use crate::error::{QueueError, Result};

/// Prefix of the per-message retry counter keys.
const RETRY_KEY_PREFIX: &str = "msg_retry:";

/// One consumed stream entry. `payload` is the raw JSON the producer put
/// into the entry's `payload` field.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub payload: String,
}

/// A parsed entry of a `<stream>:dlq` sibling stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DlqEntry {
    pub id: String,
    pub payload: String,
    pub original_message_id: String,
    pub error_type: String,
    pub error_message: String,
    pub retry_count: u32,
    pub user_id: Option<i64>,
}

/// Thin typed client over Redis streams with consumer-group semantics.
///
/// Cheap to clone; all clones share one multiplexed connection.
#[derive(Clone)]
pub struct StreamClient {
    conn: ConnectionManager,
}

impl StreamClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Append a payload to `stream`. Fire-and-forget; returns the entry id.
    pub async fn publish(&self, stream: &str, payload: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", &[("payload", payload)]).await?;
        counter!(metrics_defs::QUEUE_PUBLISHED, "stream" => stream.to_string()).increment(1);
        debug!(stream, message_id = %id, event_type = %EventType::QueuePush, "published stream entry");
        Ok(id)
    }

    /// Create the consumer group if it does not exist. `BUSYGROUP` replies
    /// are expected on every start after the first and are not errors.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: std::result::Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(()) => {
                info!(stream, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read up to `count` new entries for `(group, consumer)`, blocking for
    /// at most `block_ms`. Entries stay pending until [`Self::ack`].
    pub async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .block(block_ms as usize)
            .count(count);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &opts).await?;
        let entries = flatten_reply(stream, reply)?;
        if !entries.is_empty() {
            counter!(metrics_defs::QUEUE_CONSUMED, "stream" => stream.to_string())
                .increment(entries.len() as u64);
        }
        Ok(entries)
    }

    /// Claim entries another (or a crashed) consumer left pending for longer
    /// than `min_idle_ms`. This is what turns unacked deliveries into
    /// redeliveries.
    pub async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let opts = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(stream, group, consumer, min_idle_ms as usize, "0-0", opts)
            .await?;
        let mut entries = Vec::with_capacity(reply.claimed.len());
        for id in reply.claimed {
            entries.push(entry_from_stream_id(stream, id)?);
        }
        if !entries.is_empty() {
            debug!(
                stream,
                claimed = entries.len(),
                "reclaimed pending entries past idle timeout"
            );
        }
        Ok(entries)
    }

    /// Mark an entry processed for the group.
    pub async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[message_id]).await?;
        debug!(stream, message_id, "acked stream entry");
        Ok(())
    }

    /// Increment the retry counter of a message and refresh its TTL.
    /// Returns the counter value after the increment.
    pub async fn incr_retry(&self, message_id: &str, window_secs: u64) -> Result<u32> {
        let mut conn = self.conn.clone();
        let key = retry_key(message_id);
        let count: i64 = conn.incr(&key, 1).await?;
        let _: bool = conn.expire(&key, window_secs as i64).await?;
        Ok(count as u32)
    }

    pub async fn get_retry(&self, message_id: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(retry_key(message_id)).await?;
        Ok(count.unwrap_or(0) as u32)
    }

    pub async fn clear_retry(&self, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(retry_key(message_id)).await?;
        Ok(())
    }

    /// Publish an exhausted message to the stream's dead-letter sibling.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_to_dlq(
        &self,
        stream: &str,
        original_message_id: &str,
        payload: &str,
        error_type: &str,
        error_message: &str,
        retry_count: u32,
        user_id: Option<i64>,
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let dlq = dlq_stream(stream);
        let retry = retry_count.to_string();
        let uid = user_id.map(|u| u.to_string()).unwrap_or_default();
        let fields: Vec<(&str, &str)> = vec![
            ("payload", payload),
            ("original_message_id", original_message_id),
            ("error_type", error_type),
            ("error_message", error_message),
            ("retry_count", retry.as_str()),
            ("user_id", uid.as_str()),
        ];
        let id: String = conn.xadd(&dlq, "*", &fields).await?;
        counter!(metrics_defs::QUEUE_DLQ, "stream" => stream.to_string()).increment(1);
        warn!(
            stream,
            dlq_id = %id,
            original_message_id,
            error_type,
            retry_count,
            event_type = %EventType::Error,
            "message dead-lettered"
        );
        Ok(id)
    }

    /// Operator tool: move a DLQ entry back onto the main stream.
    pub async fn requeue_from_dlq(&self, stream: &str, dlq_id: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let dlq = dlq_stream(stream);
        let range: StreamRangeReply = conn.xrange(&dlq, dlq_id, dlq_id).await?;
        let entry = range
            .ids
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::DlqEntryNotFound {
                id: dlq_id.to_string(),
            })?;
        let payload = field_string(&entry, "payload").ok_or_else(|| QueueError::MissingField {
            id: entry.id.clone(),
            field: "payload".to_string(),
        })?;
        let new_id: String = conn.xadd(stream, "*", &[("payload", payload.as_str())]).await?;
        let _: i64 = conn.xdel(&dlq, &[dlq_id]).await?;
        info!(stream, dlq_id, new_id = %new_id, "requeued DLQ entry");
        Ok(new_id)
    }

    /// List DLQ entries, newest last. Operator/diagnostic surface.
    pub async fn read_dlq(&self, stream: &str, count: usize) -> Result<Vec<DlqEntry>> {
        let mut conn = self.conn.clone();
        let dlq = dlq_stream(stream);
        let range: StreamRangeReply = conn.xrange_count(&dlq, "-", "+", count).await?;
        Ok(range.ids.into_iter().map(parse_dlq_entry).collect())
    }

    /// Record stream and DLQ depth gauges for one stream.
    pub async fn observe_depth(&self, stream: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(stream).await?;
        let dlq_len: u64 = conn.xlen(dlq_stream(stream)).await.unwrap_or(0);
        gauge!(metrics_defs::QUEUE_DEPTH, "stream" => stream.to_string()).set(len as f64);
        gauge!(metrics_defs::QUEUE_DEPTH, "stream" => dlq_stream(stream)).set(dlq_len as f64);
        Ok(())
    }
}

pub(crate) fn retry_key(message_id: &str) -> String {
    format!("{RETRY_KEY_PREFIX}{message_id}")
}

pub(crate) fn dlq_stream(stream: &str) -> String {
    format!("{stream}:dlq")
}

fn flatten_reply(stream: &str, reply: StreamReadReply) -> Result<Vec<StreamEntry>> {
    let mut entries = Vec::new();
    for key in reply.keys {
        if key.key != stream {
            continue;
        }
        for id in key.ids {
            entries.push(entry_from_stream_id(stream, id)?);
        }
    }
    Ok(entries)
}

fn entry_from_stream_id(_stream: &str, id: StreamId) -> Result<StreamEntry> {
    let payload = field_string(&id, "payload").ok_or_else(|| QueueError::MissingField {
        id: id.id.clone(),
        field: "payload".to_string(),
    })?;
    Ok(StreamEntry { id: id.id, payload })
}

fn field_string(id: &StreamId, field: &str) -> Option<String> {
    id.map
        .get(field)
        .and_then(|v| redis::from_redis_value::<String>(v).ok())
}

fn parse_dlq_entry(id: StreamId) -> DlqEntry {
    DlqEntry {
        payload: field_string(&id, "payload").unwrap_or_default(),
        original_message_id: field_string(&id, "original_message_id").unwrap_or_default(),
        error_type: field_string(&id, "error_type").unwrap_or_default(),
        error_message: field_string(&id, "error_message").unwrap_or_default(),
        retry_count: field_string(&id, "retry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        user_id: field_string(&id, "user_id").and_then(|v| v.parse().ok()),
        id: id.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_key_matches_contract() {
        assert_eq!(retry_key("123-0"), "msg_retry:123-0");
    }

    #[test]
    fn dlq_is_a_sibling_stream() {
        assert_eq!(dlq_stream("queue:to_secretary"), "queue:to_secretary:dlq");
    }

}
