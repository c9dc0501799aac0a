//! Message bus substrate for Arturo.
//!
//! Streams with consumer groups carry commands and replies, expiring keys
//! carry presence, and pub/sub channels carry broadcasts. The [`Broker`]
//! trait abstracts the substrate; [`MemoryBroker`] runs in process and
//! [`RedisBroker`] talks to a Redis server. [`ScopedBroker`] wraps either one
//! with a per-identity [`IsolationPolicy`].

pub mod broker;
pub mod error;
pub mod isolation;
pub mod memory;
pub mod redis_broker;
pub mod scoped;

pub use broker::{Broker, EntryId, ReadCursor, StreamEntry, Subscription};
pub use error::{BusError, Result};
pub use isolation::{
    controller_identity, AddressPattern, Decision, Grant, IsolationPolicy, IsolationRule,
    Operation,
};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
pub use scoped::ScopedBroker;
