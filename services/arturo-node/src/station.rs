//! Station runtime.
//!
//! Commands are read on their own task and handed over a channel. One loop
//! drives everything else: emergency stops are checked first on every turn,
//! then one command is taken from the channel. While a stop is active every
//! command is answered with `E_ESTOP_ACTIVE`.

use crate::loopback::LoopbackDevices;
use crate::node::{Node, NodeBus};
use arturo_protocol::address::EMERGENCY_STOP_CHANNEL;
use arturo_protocol::{
    CommandResponsePayload, ErrorCode, ErrorObject, HeartbeatPayload, HeartbeatStatus,
};
use arturo_router::{
    BroadcastChannel, ConsumerOptions, Delivery, EstopCoordinator, HeartbeatEmitter,
    PresenceTracker, StationConsumer, StationResponder,
};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counters reported in heartbeats.
#[derive(Debug)]
pub struct StationStats {
    started: Instant,
    devices: Vec<String>,
    firmware_version: String,
    processed: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl StationStats {
    pub fn new(devices: Vec<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            devices,
            firmware_version: firmware_version.into(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record(&self, response: &CommandResponsePayload) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = &response.error {
            self.failed.fetch_add(1, Ordering::Relaxed);
            let mut last = self.last_error.lock().unwrap_or_else(|p| p.into_inner());
            *last = Some(format!("{}: {}", error.code, error.message));
        }
    }

    pub fn heartbeat(&self, status: HeartbeatStatus) -> HeartbeatPayload {
        let mut payload = HeartbeatPayload::new(
            status,
            self.started.elapsed().as_secs(),
            self.devices.clone(),
            self.firmware_version.clone(),
        );
        payload.device_types = Some(
            self.devices
                .iter()
                .map(|d| (d.clone(), "loopback".to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        payload.commands_processed = Some(self.processed.load(Ordering::Relaxed));
        payload.commands_failed = Some(self.failed.load(Ordering::Relaxed));
        payload.last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        payload
    }
}

pub async fn run(node: &Node) -> anyhow::Result<()> {
    let bus = node.station_bus()?;
    let source = node.source();
    let settings = &node.config.station;
    let station = source.instance.clone();

    let consumer = StationConsumer::new(
        bus.clone(),
        node.codec.clone(),
        source.clone(),
        ConsumerOptions {
            batch_size: settings.batch_size,
            block: settings.consumer_block(),
        },
    )
    .await?;
    let responder = consumer.responder();
    let channel = BroadcastChannel::new(bus.clone(), node.codec.clone(), source.clone());
    let presence = PresenceTracker::with_namespace(bus.clone(), settings.presence_namespace.clone());
    let emitter = HeartbeatEmitter::new(channel.clone(), presence.clone(), settings.presence_ttl());
    let devices = LoopbackDevices::new(settings.devices.clone());
    let stats = Arc::new(StationStats::new(devices.device_ids(), source.version.clone()));
    let estop = Arc::new(EstopCoordinator::new());

    let mut estop_events = channel.subscribe(EMERGENCY_STOP_CHANNEL).await?;
    emitter.beat(stats.heartbeat(HeartbeatStatus::Starting)).await?;

    let heartbeat_task = {
        let stats = stats.clone();
        let estop = estop.clone();
        emitter.clone().spawn(settings.heartbeat_interval(), move || {
            let status = if estop.is_active() {
                HeartbeatStatus::Degraded
            } else {
                HeartbeatStatus::Running
            };
            stats.heartbeat(status)
        })
    };

    let (mut deliveries, reader) = consumer.spawn_reader(settings.batch_size);
    info!(station = %station, devices = ?devices.device_ids(), "station running");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(message) = estop_events.next() => {
                if estop.handle_message(&message) {
                    warn!(station = %station, "commands will be refused until acknowledged");
                }
            }
            delivery = deliveries.recv() => match delivery {
                Some(Ok(delivery)) => {
                    if let Err(err) = handle(&responder, &devices, &estop, &stats, delivery).await {
                        warn!(station = %station, error = %err, "command handling failed");
                    }
                }
                Some(Err(err)) => {
                    warn!(station = %station, error = %err, "command read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                None => {
                    heartbeat_task.abort();
                    anyhow::bail!("command reader for {} stopped", station);
                }
            },
        }
    }

    info!(station = %station, "shutting down");
    reader.abort();
    heartbeat_task.abort();
    if let Err(err) = emitter.beat(stats.heartbeat(HeartbeatStatus::Stopping)).await {
        warn!(error = %err, "final heartbeat failed");
    }
    presence.withdraw(&station).await?;
    Ok(())
}

async fn handle(
    responder: &StationResponder<NodeBus>,
    devices: &LoopbackDevices,
    estop: &EstopCoordinator,
    stats: &StationStats,
    delivery: Delivery,
) -> arturo_router::Result<()> {
    if delivery.is_duplicate() {
        debug!(entry_id = delivery.entry_id(), "already answered, acknowledging");
        responder.ack(&delivery).await?;
        return Ok(());
    }

    let response = answer(devices, estop, &delivery);
    stats.record(&response);
    responder.respond(delivery.message(), response).await?;
    responder.ack(&delivery).await?;
    Ok(())
}

fn answer(
    devices: &LoopbackDevices,
    estop: &EstopCoordinator,
    delivery: &Delivery,
) -> CommandResponsePayload {
    let message = delivery.message();
    match message.as_command_request() {
        Some(request) if estop.is_active() => CommandResponsePayload::failure_for(
            request,
            ErrorObject::new(ErrorCode::EstopActive, "emergency stop is active"),
        ),
        Some(request) => devices.execute(request),
        None => CommandResponsePayload::failure(
            message.source().instance.clone(),
            "ota_update",
            ErrorObject::new(
                ErrorCode::UnsupportedProtocol,
                "firmware updates are not supported by the loopback station",
            ),
        ),
    }
}
