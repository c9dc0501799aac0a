//! Redis-backed broker.
//!
//! Streams map to XADD / XGROUP / XREADGROUP / XACK / XPENDING, keys to
//! SET PX / GET / EXISTS / DEL, and channels to PUBLISH / SUBSCRIBE.

use crate::broker::{Broker, EntryId, ReadCursor, StreamEntry, Subscription};
use crate::error::{BusError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamPendingReply, StreamReadReply};
use redis::{Client, FromRedisValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// [`Broker`] over a Redis 6+ server.
///
/// Non-blocking commands share one multiplexed connection. Blocking stream
/// reads go over a second, lazily opened connection that is kept for the
/// life of the broker and reopened only after it fails.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    conn: MultiplexedConnection,
    blocking: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisBroker {
    /// Open a client and the shared multiplexed connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(format!("{}: {}", url, e)))?;
        info!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self {
            client,
            conn,
            blocking: Arc::default(),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn blocking_conn(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.blocking.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        debug!("opened blocking-read connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Number of connections currently held open by this broker.
    pub async fn open_connections(&self) -> usize {
        1 + usize::from(self.blocking.lock().await.is_some())
    }
}

fn to_entry(id: redis::streams::StreamId) -> StreamEntry {
    let mut fields = HashMap::new();
    for (name, value) in id.map {
        match String::from_redis_value(&value) {
            Ok(text) => {
                fields.insert(name, text);
            }
            Err(e) => warn!(entry_id = %id.id, field = %name, error = %e, "non-text stream field"),
        }
    }
    StreamEntry { id: id.id, fields }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<EntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(*name).arg(*value);
        }
        let id: String = cmd.query_async(&mut self.conn()).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn())
            .await;
        match result {
            Ok(()) => {
                debug!(stream, group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);

        // BLOCK 0 means forever to Redis, so a zero wait is sent as no BLOCK.
        let block_ms = match (&cursor, block) {
            (ReadCursor::New, Some(block)) if block.as_millis() > 0 => Some(block.as_millis() as u64),
            _ => None,
        };
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms);
        }
        let start_id = match &cursor {
            ReadCursor::New => ">",
            ReadCursor::Pending { after } => after.as_deref().unwrap_or("0"),
        };
        cmd.arg("STREAMS").arg(stream).arg(start_id);

        // A blocked read would stall every request multiplexed behind it.
        let reply: Option<StreamReadReply> = if block_ms.is_some() {
            let mut blocking = self.blocking_conn().await?;
            match cmd.query_async(&mut blocking).await {
                Ok(reply) => reply,
                Err(e) => {
                    if e.is_io_error() || e.is_connection_dropped() {
                        warn!(stream, error = %e, "blocking-read connection lost");
                        self.blocking.lock().await.take();
                    }
                    return Err(e.into());
                }
            }
        } else {
            cmd.query_async(&mut self.conn()).await?
        };

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let acked: usize = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(ids)
            .query_async(&mut self.conn())
            .await?;
        Ok(acked)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.count())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: usize = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: usize = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let reached: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut self.conn())
            .await?;
        Ok(reached)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "dropping non-text pub/sub payload");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
