//! The substrate capability the protocol needs.
//!
//! Everything above this trait speaks in streams, consumer groups, expiring
//! keys and pub/sub channels. [`crate::MemoryBroker`] and
//! [`crate::RedisBroker`] provide them.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Entry id assigned by the substrate on append.
pub type EntryId = String;

/// Messages received on a subscribed channel. Infinite until the broker goes
/// away; it does not replay anything published before the subscription.
pub type Subscription = BoxStream<'static, String>;

/// One stream entry as read through a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Which part of a consumer group to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group.
    New,
    /// Entries already delivered to this consumer but not yet acknowledged,
    /// with ids strictly greater than `after` (from the start when `None`).
    /// Never blocks.
    Pending { after: Option<EntryId> },
}

impl ReadCursor {
    /// The whole pending list of the consumer.
    pub fn pending() -> Self {
        ReadCursor::Pending { after: None }
    }

    /// Pending entries after `id`, for paging through a large backlog.
    pub fn pending_after(id: impl Into<EntryId>) -> Self {
        ReadCursor::Pending {
            after: Some(id.into()),
        }
    }
}

/// Substrate operations.
///
/// Streams are append-only with consumer groups: every entry is delivered to
/// one consumer of a group and stays pending until acknowledged. Keys may
/// carry a TTL. Channels are fire-and-forget fan-out.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append an entry and return its id.
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<EntryId>;

    /// Create `group` on `stream` reading from the beginning, creating the
    /// stream if needed. Calling it again is a no-op.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Read up to `count` entries. With `block` set and nothing to return
    /// for [`ReadCursor::New`], wait up to that long for an append.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledge entries. Returns how many were pending before the call, so
    /// a repeated acknowledgment returns 0.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize>;

    /// Delivered but unacknowledged entries in the group.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize>;

    /// Set a key, with an optional time to live.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Publish to a channel. Returns the number of subscribers reached.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

#[async_trait]
impl<T: Broker + ?Sized> Broker for Arc<T> {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<EntryId> {
        (**self).append(stream, fields).await
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        (**self).ensure_group(stream, group).await
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
        (**self)
            .read_group(stream, group, consumer, cursor, count, block)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        (**self).ack(stream, group, ids).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        (**self).pending_count(stream, group).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        (**self).set_with_expiry(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        (**self).publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        (**self).subscribe(channel).await
    }
}
