//! Best-effort broadcast channels.
//!
//! Heartbeats go out on `events:heartbeat` and emergency stops on
//! `events:emergency_stop`. Nothing is stored: subscribers see only what is
//! published after they subscribe, and a failed publish is not retried.

use crate::error::{Result, RouterError};
use arturo_bus::Broker;
use arturo_protocol::address::{EMERGENCY_STOP_CHANNEL, HEARTBEAT_CHANNEL};
use arturo_protocol::{
    build, BuildOptions, Codec, EmergencyStopPayload, HeartbeatPayload, Message, MessageType,
    Source,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, warn};

/// Validated messages received on one channel.
pub type MessageStream = BoxStream<'static, Message>;

/// The only message type allowed on `channel`, if it is a known channel.
pub fn channel_type(channel: &str) -> Option<MessageType> {
    match channel {
        HEARTBEAT_CHANNEL => Some(MessageType::ServiceHeartbeat),
        EMERGENCY_STOP_CHANNEL => Some(MessageType::SystemEmergencyStop),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastChannel<B> {
    broker: B,
    codec: Codec,
    source: Source,
}

impl<B: Broker> BroadcastChannel<B> {
    pub fn new(broker: B, codec: Codec, source: Source) -> Self {
        Self {
            broker,
            codec,
            source,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Validate and publish. Returns the number of subscribers reached.
    pub async fn publish(&self, channel: &str, message: &Message) -> Result<usize> {
        if channel_type(channel) != Some(message.message_type()) {
            return Err(RouterError::WrongChannel {
                channel: channel.to_string(),
                message_type: message.message_type(),
            });
        }
        let wire = self
            .codec
            .encode(message)
            .map_err(RouterError::InvalidPayload)?;
        let reached = self.broker.publish(channel, &wire).await?;
        debug!(channel, id = %message.id(), reached, "broadcast published");
        Ok(reached)
    }

    /// Build a heartbeat from this channel's source and publish it.
    pub async fn publish_heartbeat(&self, payload: HeartbeatPayload) -> Result<usize> {
        let message = build(&self.source, payload, BuildOptions::new())
            .map_err(RouterError::InvalidPayload)?;
        self.publish(HEARTBEAT_CHANNEL, &message).await
    }

    /// Build an emergency stop from this channel's source and publish it once.
    pub async fn publish_emergency_stop(&self, payload: EmergencyStopPayload) -> Result<usize> {
        let reason = payload.reason;
        let message = build(&self.source, payload, BuildOptions::new())
            .map_err(RouterError::InvalidPayload)?;
        let reached = self.publish(EMERGENCY_STOP_CHANNEL, &message).await?;
        warn!(%reason, reached, "emergency stop published");
        Ok(reached)
    }

    /// Subscribe to `channel`. Traffic that fails validation or has the wrong
    /// type for the channel is logged and skipped.
    pub async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let expected = channel_type(channel);
        let raw = self.broker.subscribe(channel).await?;
        let codec = self.codec.clone();
        let channel = channel.to_string();
        let messages = raw.filter_map(move |payload| {
            let decoded = codec.decode(payload.as_bytes());
            let channel = channel.clone();
            async move {
                match decoded {
                    Ok(message) if expected.map_or(true, |t| t == message.message_type()) => {
                        Some(message)
                    }
                    Ok(message) => {
                        warn!(channel = %channel, message_type = %message.message_type(), "skipping message of wrong type");
                        None
                    }
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "skipping invalid broadcast");
                        None
                    }
                }
            }
        });
        Ok(messages.boxed())
    }
}
