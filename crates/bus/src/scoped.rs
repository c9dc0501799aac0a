//! Broker handle bound to one identity.
//!
//! Every call is checked against the [`IsolationPolicy`] before it reaches the
//! underlying broker. A denied call never touches the substrate.

use crate::broker::{Broker, EntryId, ReadCursor, StreamEntry, Subscription};
use crate::error::Result;
use crate::isolation::{IsolationPolicy, Operation};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A [`Broker`] that enforces the isolation rule of `identity`.
#[derive(Debug, Clone)]
pub struct ScopedBroker<B> {
    inner: B,
    identity: String,
    policy: Arc<IsolationPolicy>,
}

impl<B: Broker> ScopedBroker<B> {
    pub fn new(inner: B, identity: impl Into<String>, policy: Arc<IsolationPolicy>) -> Self {
        Self {
            inner,
            identity: identity.into(),
            policy,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn guard(&self, operation: Operation, address: &str) -> Result<()> {
        self.policy
            .check(&self.identity, operation, address)
            .map_err(|e| {
                warn!(identity = %self.identity, %operation, address, "bus operation denied");
                e
            })
    }
}

#[async_trait]
impl<B: Broker> Broker for ScopedBroker<B> {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<EntryId> {
        self.guard(Operation::Publish, stream)?;
        self.inner.append(stream, fields).await
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.guard(Operation::Consume, stream)?;
        self.inner.ensure_group(stream, group).await
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
        self.guard(Operation::Consume, stream)?;
        self.inner
            .read_group(stream, group, consumer, cursor, count, block)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        self.guard(Operation::Ack, stream)?;
        self.inner.ack(stream, group, ids).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        self.guard(Operation::Consume, stream)?;
        self.inner.pending_count(stream, group).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.guard(Operation::Publish, key)?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.guard(Operation::Consume, key)?;
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.guard(Operation::Consume, key)?;
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guard(Operation::Publish, key)?;
        self.inner.delete(key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.guard(Operation::Publish, channel)?;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.guard(Operation::Consume, channel)?;
        self.inner.subscribe(channel).await
    }
}
