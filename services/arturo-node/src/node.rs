//! Shared node wiring: substrate connection, schema registry, identity.

use anyhow::Context;
use arturo_bus::{
    controller_identity, Broker, IsolationPolicy, IsolationRule, MemoryBroker, RedisBroker,
    ScopedBroker,
};
use arturo_core::{BusBackend, Config};
use arturo_protocol::{Codec, SchemaRegistry, Source};
use std::sync::Arc;
use tracing::{info, warn};

pub type SharedBroker = Arc<dyn Broker>;
pub type NodeBus = ScopedBroker<SharedBroker>;

pub struct Node {
    pub config: Config,
    pub codec: Codec,
    broker: SharedBroker,
}

impl Node {
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let codec = load_codec(&config)?;
        let broker: SharedBroker = match config.bus.backend {
            BusBackend::Redis => Arc::new(
                RedisBroker::connect(&config.bus.redis_url)
                    .await
                    .with_context(|| format!("connecting to {}", config.bus.redis_url))?,
            ),
            BusBackend::Memory => {
                warn!("using the in-process bus; nothing leaves this process");
                Arc::new(MemoryBroker::new())
            }
        };
        Ok(Self::with_broker(config, codec, broker))
    }

    pub fn with_broker(config: Config, codec: Codec, broker: SharedBroker) -> Self {
        Self {
            config,
            codec,
            broker,
        }
    }

    pub fn source(&self) -> Source {
        let identity = &self.config.identity;
        Source::new(&identity.service, &identity.instance, &identity.version)
    }

    /// Bus handle limited to what a station may touch.
    pub fn station_bus(&self) -> anyhow::Result<NodeBus> {
        let identity = &self.config.identity;
        let rule = IsolationRule::station(&identity.instance, &self.config.station.presence_namespace);
        let policy = IsolationPolicy::new().with_rule(rule)?;
        Ok(ScopedBroker::new(
            self.broker.clone(),
            identity.instance.clone(),
            Arc::new(policy),
        ))
    }

    /// Bus handle limited to what a controller may touch.
    pub fn controller_bus(&self) -> anyhow::Result<NodeBus> {
        let identity = &self.config.identity;
        let rule = IsolationRule::controller(
            &identity.service,
            &identity.instance,
            &self.config.station.presence_namespace,
        );
        let policy = IsolationPolicy::new().with_rule(rule)?;
        Ok(ScopedBroker::new(
            self.broker.clone(),
            controller_identity(&identity.service, &identity.instance),
            Arc::new(policy),
        ))
    }
}

fn load_codec(config: &Config) -> anyhow::Result<Codec> {
    let registry = match &config.schemas.dir {
        Some(dir) => {
            info!(dir = %dir.display(), "loading schemas from disk");
            SchemaRegistry::from_dir(dir)
                .with_context(|| format!("loading schemas from {}", dir.display()))?
        }
        None => SchemaRegistry::bundled().context("compiling bundled schemas")?,
    };
    Ok(Codec::new(Arc::new(registry)))
}
