//! TTL-based presence.
//!
//! A station is alive exactly as long as `{namespace}:{station}:alive`
//! exists. Stations refresh the key more often than it expires; a crashed
//! station simply stops refreshing.

use crate::error::Result;
use arturo_bus::Broker;
use arturo_protocol::address::{presence_key, DEFAULT_PRESENCE_NAMESPACE};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PresenceTracker<B> {
    broker: B,
    namespace: String,
}

impl<B: Broker> PresenceTracker<B> {
    /// Tracker over the default `device` namespace.
    pub fn new(broker: B) -> Self {
        Self::with_namespace(broker, DEFAULT_PRESENCE_NAMESPACE)
    }

    pub fn with_namespace(broker: B, namespace: impl Into<String>) -> Self {
        Self {
            broker,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, station: &str) -> String {
        presence_key(&self.namespace, station)
    }

    /// Set or refresh the presence key with `status` as its value.
    pub async fn announce(&self, station: &str, status: &str, ttl: Duration) -> Result<()> {
        let key = self.key(station);
        self.broker.set_with_expiry(&key, status, Some(ttl)).await?;
        debug!(station, status, ttl_ms = ttl.as_millis() as u64, "presence refreshed");
        Ok(())
    }

    /// Announce without expiry. The station will look alive until
    /// [`PresenceTracker::withdraw`] is called, even if it crashes.
    pub async fn announce_persistent(&self, station: &str, status: &str) -> Result<()> {
        warn!(station, "presence announced without TTL; liveness can no longer be inferred");
        let key = self.key(station);
        self.broker.set_with_expiry(&key, status, None).await?;
        Ok(())
    }

    pub async fn is_alive(&self, station: &str) -> Result<bool> {
        Ok(self.broker.exists(&self.key(station)).await?)
    }

    /// Status string stored by the last announcement, if still alive.
    pub async fn status(&self, station: &str) -> Result<Option<String>> {
        Ok(self.broker.get(&self.key(station)).await?)
    }

    /// Remove the key on graceful shutdown. Returns whether it existed.
    pub async fn withdraw(&self, station: &str) -> Result<bool> {
        let removed = self.broker.delete(&self.key(station)).await?;
        debug!(station, removed, "presence withdrawn");
        Ok(removed)
    }
}
