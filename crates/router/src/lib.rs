//! Arturo command routing, presence and broadcast.
//!
//! This crate sits between the protocol and the bus:
//! - [`CommandRouter`] dispatches commands and correlates responses
//! - [`StationConsumer`] reads a station's own command stream and answers it
//! - [`PresenceTracker`] maintains TTL-based liveness keys
//! - [`BroadcastChannel`] carries heartbeats and emergency stops
//! - [`HeartbeatEmitter`], [`EstopCoordinator`] and [`StationTracker`] build
//!   the station and monitor runtimes on top of those
//!
//! # Example
//!
//! ```no_run
//! use arturo_bus::MemoryBroker;
//! use arturo_protocol::{Codec, CommandRequestPayload, Source};
//! use arturo_router::{CommandRouter, RouterOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> arturo_router::Result<()> {
//! let broker = MemoryBroker::new();
//! let codec = Codec::bundled().expect("bundled schemas");
//! let router = CommandRouter::new(
//!     broker,
//!     codec,
//!     Source::new("controller", "ctrl-01", "1.0.0"),
//!     RouterOptions::default(),
//! )
//! .await?;
//! let _listener = router.spawn_reply_listener();
//!
//! let handle = router
//!     .send(
//!         "station-01",
//!         CommandRequestPayload::new("fluke-8846a", "measure_dc_voltage"),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! let response = handle.wait().await?;
//! println!("{:?}", response.as_command_response());
//! # Ok(())
//! # }
//! ```

pub mod anomaly;
pub mod broadcast;
pub mod dispatcher;
pub mod error;
pub mod estop;
pub mod heartbeat;
pub mod pending;
pub mod presence;
pub mod station;
pub mod tracker;

pub use anomaly::{AnomalyCounters, AnomalyKind, AnomalySnapshot, ProtocolAnomaly};
pub use broadcast::{channel_type, BroadcastChannel, MessageStream};
pub use dispatcher::{CommandHandle, CommandRouter, RouterOptions};
pub use error::{Result, RouterError};
pub use estop::{EstopCoordinator, EstopState};
pub use heartbeat::HeartbeatEmitter;
pub use pending::{CommandState, PendingInfo, PendingTable, Resolution};
pub use presence::PresenceTracker;
pub use station::{ConsumerOptions, Delivery, StationConsumer, StationResponder};
pub use tracker::{StationState, StationTracker, Transition};
