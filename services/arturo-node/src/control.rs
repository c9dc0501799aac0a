//! Operator commands: send, estop, monitor and schema checks.

use crate::node::Node;
use anyhow::{bail, Context};
use arturo_protocol::address::{EMERGENCY_STOP_CHANNEL, HEARTBEAT_CHANNEL};
use arturo_protocol::schema::{bundled_examples, load_examples};
use arturo_protocol::{
    CommandRequestPayload, EmergencyStopPayload, EstopReason, Message, SchemaRegistry,
};
use arturo_router::{
    BroadcastChannel, CommandRouter, PresenceTracker, RouterOptions, StationTracker, Transition,
};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const MONITOR_REFRESH: Duration = Duration::from_secs(5);
const REPLY_BATCH: usize = 32;

/// One `send` invocation from the command line.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub station: String,
    pub device: String,
    pub command: String,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
    pub attempts: u32,
}

impl SendRequest {
    fn payload(&self) -> CommandRequestPayload {
        self.params.iter().fold(
            CommandRequestPayload::new(&self.device, &self.command),
            |payload, (key, value)| payload.with_parameter(key, value),
        )
    }
}

pub async fn send(node: &Node, request: SendRequest) -> anyhow::Result<()> {
    let router = CommandRouter::new(
        node.controller_bus()?,
        node.codec.clone(),
        node.source(),
        RouterOptions {
            reply_block: node.config.controller.reply_block(),
            batch_size: REPLY_BATCH,
        },
    )
    .await?;
    let listener = router.spawn_reply_listener();

    let result = router
        .send_with_retry(
            &request.station,
            request.payload(),
            request.timeout,
            request.attempts.max(1),
        )
        .await;
    listener.abort();

    let message = result.with_context(|| {
        format!(
            "{} {} on {}",
            request.device, request.command, request.station
        )
    })?;
    let Some(response) = message.as_command_response() else {
        bail!("station answered with {}", message.message_type());
    };
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.success {
        bail!("command failed on {}", request.station);
    }
    Ok(())
}

pub async fn estop(
    node: &Node,
    reason: EstopReason,
    description: Option<String>,
) -> anyhow::Result<()> {
    let channel = BroadcastChannel::new(node.controller_bus()?, node.codec.clone(), node.source());
    let mut payload =
        EmergencyStopPayload::new(reason).with_initiator(node.config.identity.instance.clone());
    if let Some(description) = description {
        payload = payload.with_description(description);
    }
    let reached = channel.publish_emergency_stop(payload).await?;
    println!("emergency stop ({}) delivered to {} subscriber(s)", reason, reached);
    if reached == 0 {
        warn!("no subscriber received the emergency stop");
    }
    Ok(())
}

pub async fn monitor(node: &Node, station: Option<&str>, json: bool) -> anyhow::Result<()> {
    let bus = node.controller_bus()?;
    let channel = BroadcastChannel::new(bus.clone(), node.codec.clone(), node.source());
    let presence =
        PresenceTracker::with_namespace(bus, node.config.station.presence_namespace.clone());
    let mut tracker = StationTracker::new(node.config.controller.stale_after());
    if let Some(station) = station {
        tracker.watch_station(station);
    }

    let mut heartbeats = channel.subscribe(HEARTBEAT_CHANNEL).await?;
    let mut stops = channel.subscribe(EMERGENCY_STOP_CHANNEL).await?;
    let mut refresh = tokio::time::interval(MONITOR_REFRESH);
    let wanted = |name: &str| station.map_or(true, |s| s == name);

    info!(station = ?station, "monitoring");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(message) = stops.next() => {
                print_message(&message, json)?;
            }
            Some(message) = heartbeats.next() => {
                if !wanted(&message.source().instance) {
                    continue;
                }
                tracker.record_heartbeat(&message);
                print_message(&message, json)?;
            }
            _ = refresh.tick() => {
                for transition in tracker.refresh(&presence).await? {
                    if wanted(&transition.station) {
                        print_transition(&transition, json)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_message(message: &Message, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(message)?);
        return Ok(());
    }
    let source = message.source();
    if let Some(heartbeat) = message.as_heartbeat() {
        println!(
            "[heartbeat] {} status={} uptime={}s devices={} processed={} failed={}",
            source.instance,
            heartbeat.status,
            heartbeat.uptime_seconds,
            heartbeat.devices.join(","),
            heartbeat.commands_processed.unwrap_or(0),
            heartbeat.commands_failed.unwrap_or(0),
        );
    } else if let Some(stop) = message.as_emergency_stop() {
        println!(
            "[estop] from {} reason={} initiator={} {}",
            source.instance,
            stop.reason,
            stop.initiator.as_deref().unwrap_or("-"),
            stop.description.as_deref().unwrap_or(""),
        );
    } else {
        println!("[{}] from {}", message.message_type(), source.instance);
    }
    Ok(())
}

fn print_transition(transition: &Transition, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(transition)?);
        return Ok(());
    }
    match transition.from {
        Some(from) => println!("[presence] {} {} -> {}", transition.station, from, transition.to),
        None => println!("[presence] {} {}", transition.station, transition.to),
    }
    Ok(())
}

/// Compile every schema and validate every example against it.
pub fn check_schemas(dir: Option<&Path>) -> anyhow::Result<()> {
    let (registry, examples) = match dir {
        Some(dir) => (
            SchemaRegistry::from_dir(dir)
                .with_context(|| format!("compiling schemas in {}", dir.display()))?,
            load_examples(dir).with_context(|| format!("loading examples in {}", dir.display()))?,
        ),
        None => (
            SchemaRegistry::bundled().context("compiling bundled schemas")?,
            bundled_examples().context("loading bundled examples")?,
        ),
    };

    let mut failures = 0usize;
    for example in &examples {
        match example.verify(&registry) {
            Ok(()) => println!("ok    {} ({})", example.name, example.message_type),
            Err(err) => {
                failures += 1;
                println!("FAIL  {} ({}): {}", example.name, example.message_type, err);
            }
        }
    }
    println!("{} example(s), {} failure(s)", examples.len(), failures);
    if failures > 0 {
        bail!("{} schema example(s) failed", failures);
    }
    Ok(())
}
