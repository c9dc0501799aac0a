//! Built-in device handler that answers without touching hardware.

use arturo_protocol::{CommandRequestPayload, CommandResponsePayload, ErrorCode, ErrorObject};
use std::collections::BTreeSet;
use std::time::Instant;

/// Answers a fixed set of commands for the configured device ids.
#[derive(Debug, Clone)]
pub struct LoopbackDevices {
    devices: BTreeSet<String>,
}

impl LoopbackDevices {
    pub fn new(devices: impl IntoIterator<Item = String>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().cloned().collect()
    }

    pub fn execute(&self, request: &CommandRequestPayload) -> CommandResponsePayload {
        let started = Instant::now();
        let response = self.answer(request);
        response.with_duration_ms(started.elapsed().as_millis() as u64)
    }

    fn answer(&self, request: &CommandRequestPayload) -> CommandResponsePayload {
        let device = request.device_id.as_str();
        if !self.devices.contains(device) {
            return CommandResponsePayload::failure_for(
                request,
                ErrorObject::new(ErrorCode::DeviceNotFound, format!("no device {}", device)),
            );
        }

        let ok = |text: String| {
            CommandResponsePayload::success(
                request.device_id.clone(),
                request.command_name.clone(),
                Some(text),
            )
        };
        match request.command_name.as_str() {
            "identify" => ok(format!("ARTURO,LOOPBACK,{},{}", device, env!("CARGO_PKG_VERSION"))),
            "ping" => ok("pong".to_string()),
            "measure_dc_voltage" => ok("0.000000".to_string()),
            "echo" => match request.parameter("value") {
                Some(value) => ok(value.to_string()),
                None => CommandResponsePayload::failure_for(
                    request,
                    ErrorObject::new(ErrorCode::InvalidParameters, "echo requires a value parameter"),
                ),
            },
            other => CommandResponsePayload::failure_for(
                request,
                ErrorObject::new(ErrorCode::UnknownCommand, format!("unknown command {}", other))
                    .with_detail("device_id", device),
            ),
        }
    }
}
