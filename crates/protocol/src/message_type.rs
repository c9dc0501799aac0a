//! The closed set of message types carried in `envelope.type`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message type discriminator.
///
/// The type selects the payload schema and decides whether the envelope must,
/// may, or must not carry `correlation_id` and `reply_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Controller asks a station to run a device command.
    #[serde(rename = "device.command.request")]
    DeviceCommandRequest,
    /// Station reports the outcome of a device command.
    #[serde(rename = "device.command.response")]
    DeviceCommandResponse,
    /// Periodic station health report.
    #[serde(rename = "service.heartbeat")]
    ServiceHeartbeat,
    /// Emergency stop broadcast.
    #[serde(rename = "system.emergency_stop")]
    SystemEmergencyStop,
    /// Firmware update request.
    #[serde(rename = "system.ota.request")]
    SystemOtaRequest,
}

impl MessageType {
    /// Every type, in schema-directory order.
    pub const ALL: [MessageType; 5] = [
        MessageType::DeviceCommandRequest,
        MessageType::DeviceCommandResponse,
        MessageType::ServiceHeartbeat,
        MessageType::SystemEmergencyStop,
        MessageType::SystemOtaRequest,
    ];

    /// Wire name as it appears in `envelope.type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::DeviceCommandRequest => "device.command.request",
            MessageType::DeviceCommandResponse => "device.command.response",
            MessageType::ServiceHeartbeat => "service.heartbeat",
            MessageType::SystemEmergencyStop => "system.emergency_stop",
            MessageType::SystemOtaRequest => "system.ota.request",
        }
    }

    /// Directory and file stem used for the bundled schema documents,
    /// e.g. `device-command-request`.
    pub fn schema_name(&self) -> &'static str {
        match self {
            MessageType::DeviceCommandRequest => "device-command-request",
            MessageType::DeviceCommandResponse => "device-command-response",
            MessageType::ServiceHeartbeat => "service-heartbeat",
            MessageType::SystemEmergencyStop => "system-emergency-stop",
            MessageType::SystemOtaRequest => "system-ota-request",
        }
    }

    /// Request types expect an answer and must name where it goes.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageType::DeviceCommandRequest | MessageType::SystemOtaRequest
        )
    }

    /// Response types answer a request.
    pub fn is_response(&self) -> bool {
        matches!(self, MessageType::DeviceCommandResponse)
    }

    /// `correlation_id` is mandatory for requests and responses.
    pub fn requires_correlation(&self) -> bool {
        self.is_request() || self.is_response()
    }

    /// `reply_to` is mandatory for requests.
    pub fn requires_reply_to(&self) -> bool {
        self.is_request()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the five wire names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}
