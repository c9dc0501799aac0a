//! Shared fixtures: one broker, one policy, any number of stations and a
//! controller, each seeing the broker through its own scoped handle.

use arturo_bus::{
    controller_identity, Broker, IsolationPolicy, IsolationRule, MemoryBroker, ScopedBroker,
};
use arturo_protocol::address::DEFAULT_PRESENCE_NAMESPACE;
use arturo_protocol::{Codec, CommandResponsePayload, Source};
use arturo_router::{
    CommandRouter, ConsumerOptions, Delivery, RouterOptions, StationConsumer,
};
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

pub const CONTROLLER_SERVICE: &str = "controller";
pub const CONTROLLER_INSTANCE: &str = "ctrl-01";
pub const STATION_SERVICE: &str = "esp32_tcp_bridge";

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` controls the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Bundled codec, compiled once.
pub fn codec() -> Codec {
    static CODEC: OnceLock<Codec> = OnceLock::new();
    CODEC
        .get_or_init(|| Codec::bundled().expect("bundled schemas compile"))
        .clone()
}

pub fn station_source(station: &str) -> Source {
    Source::new(STATION_SERVICE, station, "1.0.0")
}

pub fn controller_source() -> Source {
    Source::new(CONTROLLER_SERVICE, CONTROLLER_INSTANCE, "1.0.0")
}

/// A substrate shared by a controller and a set of stations.
pub struct TestBench<B> {
    pub broker: B,
    pub policy: Arc<IsolationPolicy>,
}

impl TestBench<MemoryBroker> {
    pub fn in_memory(stations: &[&str]) -> Self {
        Self::new(MemoryBroker::new(), stations)
    }
}

impl<B: Broker + Clone + 'static> TestBench<B> {
    pub fn new(broker: B, stations: &[&str]) -> Self {
        init_tracing();
        let mut policy = IsolationPolicy::new();
        for station in stations {
            policy
                .insert(IsolationRule::station(station, DEFAULT_PRESENCE_NAMESPACE))
                .expect("station rule");
        }
        policy
            .insert(IsolationRule::controller(
                CONTROLLER_SERVICE,
                CONTROLLER_INSTANCE,
                DEFAULT_PRESENCE_NAMESPACE,
            ))
            .expect("controller rule");
        Self {
            broker,
            policy: Arc::new(policy),
        }
    }

    pub fn station_bus(&self, station: &str) -> ScopedBroker<B> {
        ScopedBroker::new(self.broker.clone(), station, self.policy.clone())
    }

    pub fn controller_bus(&self) -> ScopedBroker<B> {
        ScopedBroker::new(
            self.broker.clone(),
            controller_identity(CONTROLLER_SERVICE, CONTROLLER_INSTANCE),
            self.policy.clone(),
        )
    }

    pub async fn router(&self) -> CommandRouter<ScopedBroker<B>> {
        CommandRouter::new(
            self.controller_bus(),
            codec(),
            controller_source(),
            RouterOptions {
                reply_block: Duration::from_millis(50),
                batch_size: 32,
            },
        )
        .await
        .expect("router")
    }

    pub async fn consumer(&self, station: &str) -> StationConsumer<ScopedBroker<B>> {
        StationConsumer::new(
            self.station_bus(station),
            codec(),
            station_source(station),
            ConsumerOptions {
                batch_size: 16,
                block: Duration::from_millis(50),
            },
        )
        .await
        .expect("consumer")
    }
}

/// Wait until the consumer hands out a delivery.
pub async fn next_delivery<B: Broker + Clone + 'static>(
    consumer: &mut StationConsumer<B>,
) -> Delivery {
    loop {
        if let Some(delivery) = consumer.next().await.expect("read commands") {
            return delivery;
        }
    }
}

/// Answer a delivery with a success carrying `text`, then acknowledge it.
pub async fn answer<B: Broker + Clone + 'static>(
    consumer: &StationConsumer<B>,
    delivery: &Delivery,
    text: &str,
) {
    let request = delivery.command().expect("command request");
    let payload = CommandResponsePayload::success(
        request.device_id.clone(),
        request.command_name.clone(),
        Some(text.to_string()),
    );
    consumer
        .respond(delivery.message(), payload)
        .await
        .expect("respond");
    assert!(consumer.ack(delivery).await.expect("ack"));
}
