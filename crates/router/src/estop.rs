//! Local emergency-stop state.
//!
//! The coordinator latches on the first stop it sees, from the bus or from a
//! local trigger, and stays active until explicitly acknowledged. Later stops
//! while active do not overwrite the original cause.

use arturo_core::unix_timestamp_secs;
use arturo_protocol::{EmergencyStopPayload, EstopReason, Message};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EstopState {
    pub active: bool,
    pub reason: Option<EstopReason>,
    pub description: Option<String>,
    pub initiator: Option<String>,
    /// Seconds since epoch.
    pub triggered_at: Option<u64>,
}

#[derive(Debug)]
pub struct EstopCoordinator {
    state: watch::Sender<EstopState>,
}

impl Default for EstopCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl EstopCoordinator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(EstopState::default());
        Self { state }
    }

    /// Activate from a received message. Returns `true` if this call
    /// activated the stop; non-stop messages are ignored.
    pub fn handle_message(&self, message: &Message) -> bool {
        match message.as_emergency_stop() {
            Some(payload) => {
                let initiator = payload
                    .initiator
                    .clone()
                    .or_else(|| Some(message.source().instance.clone()));
                self.activate(payload, initiator)
            }
            None => false,
        }
    }

    /// Activate locally. Returns `true` if this call activated the stop.
    pub fn trigger(&self, payload: &EmergencyStopPayload) -> bool {
        self.activate(payload, payload.initiator.clone())
    }

    fn activate(&self, payload: &EmergencyStopPayload, initiator: Option<String>) -> bool {
        let activated = self.state.send_if_modified(|state| {
            if state.active {
                return false;
            }
            *state = EstopState {
                active: true,
                reason: Some(payload.reason),
                description: payload.description.clone(),
                initiator: initiator.clone(),
                triggered_at: Some(unix_timestamp_secs()),
            };
            true
        });
        if activated {
            warn!(
                reason = %payload.reason,
                initiator = initiator.as_deref().unwrap_or("unknown"),
                "EMERGENCY STOP active"
            );
        }
        activated
    }

    /// Clear the stop. Returns `true` if it was active.
    pub fn acknowledge(&self) -> bool {
        let was_active = self.state.send_if_modified(|state| {
            if !state.active {
                return false;
            }
            *state = EstopState::default();
            true
        });
        if was_active {
            info!("emergency stop acknowledged");
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub fn state(&self) -> EstopState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every activation and acknowledgment.
    pub fn watch(&self) -> watch::Receiver<EstopState> {
        self.state.subscribe()
    }
}
