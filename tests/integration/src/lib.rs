//! End-to-end tests for the Arturo bus protocol
//!
//! This suite drives controllers and stations against each other through
//! isolation-scoped brokers:
//! - Command round trips, timeouts, retries and out-of-order responses
//! - Station isolation on the substrate
//! - Presence, heartbeats and emergency stops
//! - The same round trip against a live Redis (ignored by default)

pub mod test_utils;

#[cfg(test)]
mod command_flow_tests;

#[cfg(test)]
mod isolation_tests;

#[cfg(test)]
mod broadcast_tests;

#[cfg(test)]
mod redis_tests;
