//! Bus addresses used by the protocol.
//!
//! Streams carry commands and responses, channels carry broadcasts, and keys
//! carry presence. Every stream entry stores the serialized message under
//! [`MESSAGE_FIELD`].

/// Stream entry field holding the serialized message.
pub const MESSAGE_FIELD: &str = "message";

/// Prefix of per-station command streams.
pub const COMMAND_STREAM_PREFIX: &str = "commands:";

/// Prefix of controller reply streams.
pub const REPLY_STREAM_PREFIX: &str = "responses:";

/// Prefix shared by the broadcast channels.
pub const EVENT_CHANNEL_PREFIX: &str = "events:";

/// Heartbeat broadcast channel.
pub const HEARTBEAT_CHANNEL: &str = "events:heartbeat";

/// Emergency-stop broadcast channel.
pub const EMERGENCY_STOP_CHANNEL: &str = "events:emergency_stop";

/// Namespace of presence keys unless configured otherwise.
pub const DEFAULT_PRESENCE_NAMESPACE: &str = "device";

/// Suffix of presence keys.
pub const PRESENCE_SUFFIX: &str = ":alive";

/// `commands:{station}`
pub fn command_stream(station: &str) -> String {
    format!("{}{}", COMMAND_STREAM_PREFIX, station)
}

/// `responses:{service}:{instance}`
pub fn reply_stream(service: &str, instance: &str) -> String {
    format!("{}{}:{}", REPLY_STREAM_PREFIX, service, instance)
}

/// `{namespace}:{instance}:alive`
pub fn presence_key(namespace: &str, instance: &str) -> String {
    format!("{}:{}{}", namespace, instance, PRESENCE_SUFFIX)
}

/// Station named by a command stream address.
pub fn station_of_command_stream(address: &str) -> Option<&str> {
    address
        .strip_prefix(COMMAND_STREAM_PREFIX)
        .filter(|station| !station.is_empty())
}
