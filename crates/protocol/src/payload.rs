//! Typed payloads, one struct per message type.
//!
//! The schema documents are the authority on what is valid; these types are
//! the decoded view of a message that already passed validation. They reject
//! unknown fields so a typed decode can never silently drop data.

use crate::message_type::MessageType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of error codes a station may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Device did not answer in time.
    #[serde(rename = "E_DEVICE_TIMEOUT")]
    DeviceTimeout,
    /// No device with that id on this station.
    #[serde(rename = "E_DEVICE_NOT_FOUND")]
    DeviceNotFound,
    /// Device known but currently unreachable.
    #[serde(rename = "E_DEVICE_UNAVAILABLE")]
    DeviceUnavailable,
    /// Device reported an error.
    #[serde(rename = "E_DEVICE_ERROR")]
    DeviceError,
    /// Command not in the device profile.
    #[serde(rename = "E_UNKNOWN_COMMAND")]
    UnknownCommand,
    /// Parameters missing or out of range.
    #[serde(rename = "E_INVALID_PARAMETERS")]
    InvalidParameters,
    /// Device speaks a protocol this station cannot drive.
    #[serde(rename = "E_UNSUPPORTED_PROTOCOL")]
    UnsupportedProtocol,
    /// A safety interlock blocks the command.
    #[serde(rename = "E_INTERLOCK_ACTIVE")]
    InterlockActive,
    /// Emergency stop is active.
    #[serde(rename = "E_ESTOP_ACTIVE")]
    EstopActive,
    /// Anything else.
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire name, e.g. `E_DEVICE_TIMEOUT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DeviceTimeout => "E_DEVICE_TIMEOUT",
            ErrorCode::DeviceNotFound => "E_DEVICE_NOT_FOUND",
            ErrorCode::DeviceUnavailable => "E_DEVICE_UNAVAILABLE",
            ErrorCode::DeviceError => "E_DEVICE_ERROR",
            ErrorCode::UnknownCommand => "E_UNKNOWN_COMMAND",
            ErrorCode::InvalidParameters => "E_INVALID_PARAMETERS",
            ErrorCode::UnsupportedProtocol => "E_UNSUPPORTED_PROTOCOL",
            ErrorCode::InterlockActive => "E_INTERLOCK_ACTIVE",
            ErrorCode::EstopActive => "E_ESTOP_ACTIVE",
            ErrorCode::Internal => "E_INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object carried by a failed command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorObject {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message, never empty.
    pub message: String,
    /// Free-form diagnostic context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ErrorObject {
    /// Error without details.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// `device.command.request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandRequestPayload {
    /// Target device on the station.
    pub device_id: String,
    /// Command from the device profile.
    pub command_name: String,
    /// String-valued command parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
    /// Station-side execution budget, 100..=300000 ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CommandRequestPayload {
    /// Request without parameters or timeout.
    pub fn new(device_id: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command_name: command_name.into(),
            parameters: None,
            timeout_ms: None,
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the station-side timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parameter lookup.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .as_ref()
            .and_then(|p| p.get(key))
            .map(String::as_str)
    }
}

/// `device.command.response` payload.
///
/// `error` is present exactly when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandResponsePayload {
    /// Device that ran the command.
    pub device_id: String,
    /// Command that ran.
    pub command_name: String,
    /// Outcome.
    pub success: bool,
    /// Raw device answer; `null` and absent decode the same.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Wall time spent on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CommandResponsePayload {
    /// Successful response.
    pub fn success(
        device_id: impl Into<String>,
        command_name: impl Into<String>,
        response: Option<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            command_name: command_name.into(),
            success: true,
            response,
            error: None,
            duration_ms: None,
        }
    }

    /// Failed response.
    pub fn failure(
        device_id: impl Into<String>,
        command_name: impl Into<String>,
        error: ErrorObject,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            command_name: command_name.into(),
            success: false,
            response: None,
            error: Some(error),
            duration_ms: None,
        }
    }

    /// Failed response for `request`, echoing its device and command.
    pub fn failure_for(request: &CommandRequestPayload, error: ErrorObject) -> Self {
        Self::failure(
            request.device_id.clone(),
            request.command_name.clone(),
            error,
        )
    }

    /// Record how long the command took.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Station lifecycle state reported in heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    /// Booting, devices not yet probed.
    Starting,
    /// Healthy.
    Running,
    /// Up but impaired.
    Degraded,
    /// Shutting down.
    Stopping,
}

impl HeartbeatStatus {
    /// Wire name, also used as the presence key value.
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatStatus::Starting => "starting",
            HeartbeatStatus::Running => "running",
            HeartbeatStatus::Degraded => "degraded",
            HeartbeatStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `service.heartbeat` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatPayload {
    pub status: HeartbeatStatus,
    pub uptime_seconds: u64,
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_types: Option<BTreeMap<String, String>>,
    pub free_heap: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_free_heap: Option<u64>,
    /// dBm, -127..=0.
    pub wifi_rssi: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_reconnects: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_reconnects: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands_failed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog_resets: Option<u64>,
    pub firmware_version: String,
}

impl HeartbeatPayload {
    /// Heartbeat with only the required fields set.
    pub fn new(
        status: HeartbeatStatus,
        uptime_seconds: u64,
        devices: Vec<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        Self {
            status,
            uptime_seconds,
            devices,
            device_types: None,
            free_heap: 0,
            min_free_heap: None,
            wifi_rssi: 0,
            wifi_reconnects: None,
            redis_reconnects: None,
            commands_processed: None,
            commands_failed: None,
            last_error: None,
            watchdog_resets: None,
            firmware_version: firmware_version.into(),
        }
    }
}

/// Why an emergency stop was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstopReason {
    ButtonPress,
    OperatorCommand,
    SafetyInterlock,
    DeviceFault,
    SoftwareError,
}

impl EstopReason {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EstopReason::ButtonPress => "button_press",
            EstopReason::OperatorCommand => "operator_command",
            EstopReason::SafetyInterlock => "safety_interlock",
            EstopReason::DeviceFault => "device_fault",
            EstopReason::SoftwareError => "software_error",
        }
    }
}

impl fmt::Display for EstopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `system.emergency_stop` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyStopPayload {
    pub reason: EstopReason,
    /// At most 256 chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// At most 64 chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
}

impl EmergencyStopPayload {
    /// E-stop with a reason only.
    pub fn new(reason: EstopReason) -> Self {
        Self {
            reason,
            description: None,
            initiator: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Record who raised it.
    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }
}

/// `system.ota.request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtaRequestPayload {
    /// `http://` or `https://` image location.
    pub firmware_url: String,
    /// Target firmware version.
    pub version: String,
    /// Lowercase hex SHA-256 of the image.
    pub sha256: String,
    /// Install even if the version is not newer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

/// Tagged union of all payloads, discriminated by `envelope.type`.
///
/// The wire form carries no tag of its own, so this type serializes as the
/// inner struct and is decoded through [`Payload::from_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    CommandRequest(CommandRequestPayload),
    CommandResponse(CommandResponsePayload),
    Heartbeat(HeartbeatPayload),
    EmergencyStop(EmergencyStopPayload),
    OtaRequest(OtaRequestPayload),
}

impl Payload {
    /// The envelope type this payload travels under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::CommandRequest(_) => MessageType::DeviceCommandRequest,
            Payload::CommandResponse(_) => MessageType::DeviceCommandResponse,
            Payload::Heartbeat(_) => MessageType::ServiceHeartbeat,
            Payload::EmergencyStop(_) => MessageType::SystemEmergencyStop,
            Payload::OtaRequest(_) => MessageType::SystemOtaRequest,
        }
    }

    /// Decode the payload member of a message whose envelope says `message_type`.
    pub fn from_value(message_type: MessageType, value: Value) -> serde_json::Result<Self> {
        Ok(match message_type {
            MessageType::DeviceCommandRequest => Payload::CommandRequest(serde_json::from_value(value)?),
            MessageType::DeviceCommandResponse => {
                Payload::CommandResponse(serde_json::from_value(value)?)
            }
            MessageType::ServiceHeartbeat => Payload::Heartbeat(serde_json::from_value(value)?),
            MessageType::SystemEmergencyStop => Payload::EmergencyStop(serde_json::from_value(value)?),
            MessageType::SystemOtaRequest => Payload::OtaRequest(serde_json::from_value(value)?),
        })
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::CommandRequest(p) => p.serialize(serializer),
            Payload::CommandResponse(p) => p.serialize(serializer),
            Payload::Heartbeat(p) => p.serialize(serializer),
            Payload::EmergencyStop(p) => p.serialize(serializer),
            Payload::OtaRequest(p) => p.serialize(serializer),
        }
    }
}

impl From<CommandRequestPayload> for Payload {
    fn from(p: CommandRequestPayload) -> Self {
        Payload::CommandRequest(p)
    }
}

impl From<CommandResponsePayload> for Payload {
    fn from(p: CommandResponsePayload) -> Self {
        Payload::CommandResponse(p)
    }
}

impl From<HeartbeatPayload> for Payload {
    fn from(p: HeartbeatPayload) -> Self {
        Payload::Heartbeat(p)
    }
}

impl From<EmergencyStopPayload> for Payload {
    fn from(p: EmergencyStopPayload) -> Self {
        Payload::EmergencyStop(p)
    }
}

impl From<OtaRequestPayload> for Payload {
    fn from(p: OtaRequestPayload) -> Self {
        Payload::OtaRequest(p)
    }
}
