//! Periodic heartbeat emission.
//!
//! Each cycle refreshes presence first and then publishes the heartbeat, so a
//! monitor that sees the heartbeat will also find the station alive.

use crate::broadcast::BroadcastChannel;
use crate::error::Result;
use crate::presence::PresenceTracker;
use arturo_bus::Broker;
use arturo_protocol::HeartbeatPayload;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound of the random delay added to each interval, as a fraction of
/// the interval.
const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct HeartbeatEmitter<B> {
    channel: BroadcastChannel<B>,
    presence: PresenceTracker<B>,
    ttl: Duration,
}

impl<B: Broker + Clone + 'static> HeartbeatEmitter<B> {
    /// The station name is taken from the channel's source instance.
    pub fn new(channel: BroadcastChannel<B>, presence: PresenceTracker<B>, ttl: Duration) -> Self {
        Self {
            channel,
            presence,
            ttl,
        }
    }

    pub fn station(&self) -> &str {
        &self.channel.source().instance
    }

    /// Announce presence, then publish `payload`.
    pub async fn beat(&self, payload: HeartbeatPayload) -> Result<usize> {
        self.presence
            .announce(self.station(), payload.status.as_str(), self.ttl)
            .await?;
        let reached = self.channel.publish_heartbeat(payload).await?;
        debug!(station = %self.station(), reached, "heartbeat");
        Ok(reached)
    }

    /// Beat every `interval` plus jitter until the task is aborted.
    /// `snapshot` is called once per cycle to produce the payload.
    pub fn spawn<F>(self, interval: Duration, mut snapshot: F) -> JoinHandle<()>
    where
        F: FnMut() -> HeartbeatPayload + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.beat(snapshot()).await {
                    warn!(station = %self.station(), error = %err, "heartbeat failed");
                }
                tokio::time::sleep(jittered(interval)).await;
            }
        })
    }
}

/// `interval` plus a random delay of up to [`JITTER_FRACTION`] of it, so a
/// rack of stations started together does not beat in lockstep.
pub fn jittered(interval: Duration) -> Duration {
    let max_ms = (interval.as_millis() as f64 * JITTER_FRACTION) as u64;
    if max_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
