//! Station isolation enforced at the substrate.
//!
//! A station may read only its own command stream, write only reply streams
//! and its own presence key, and never administer the bus. Denied calls must
//! fail before anything reaches the broker.

use crate::test_utils::*;
use arturo_bus::{Broker, BusError, Grant, IsolationPolicy, IsolationRule, Operation};
use arturo_protocol::address::{command_stream, reply_stream, DEFAULT_PRESENCE_NAMESPACE};
use arturo_protocol::CommandRequestPayload;
use arturo_router::{ConsumerOptions, PresenceTracker, StationConsumer};
use std::time::Duration;

#[tokio::test]
async fn test_station_cannot_read_foreign_commands() {
    let bench = TestBench::in_memory(&["station-01", "station-02"]);
    let router = bench.router().await;
    let _handle = router
        .send(
            "station-02",
            CommandRequestPayload::new("dmm", "identify"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    // station-01 presenting itself as station-02.
    let err = StationConsumer::new(
        bench.station_bus("station-01"),
        codec(),
        station_source("station-02"),
        ConsumerOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(err.is_unauthorized());

    let err = bench
        .station_bus("station-01")
        .read_group(
            &command_stream("station-02"),
            "station-02",
            "station-02",
            arturo_bus::ReadCursor::New,
            10,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized { .. }));

    // The command is still waiting for its real station.
    let mut owner = bench.consumer("station-02").await;
    let delivery = next_delivery(&mut owner).await;
    assert_eq!(delivery.command().unwrap().command_name, "identify");
}

#[tokio::test]
async fn test_station_cannot_inject_commands() {
    let bench = TestBench::in_memory(&["station-01", "station-02"]);
    let err = bench
        .station_bus("station-01")
        .append(&command_stream("station-02"), &[("message", "{}")])
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized { .. }));
    assert_eq!(bench.broker.stream_len(&command_stream("station-02")), 0);
}

#[tokio::test]
async fn test_station_cannot_read_replies() {
    let bench = TestBench::in_memory(&["station-01"]);
    let replies = reply_stream(CONTROLLER_SERVICE, CONTROLLER_INSTANCE);
    let err = bench
        .station_bus("station-01")
        .ensure_group(&replies, "eavesdrop")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Unauthorized {
            operation: Operation::Consume,
            ..
        }
    ));
}

#[tokio::test]
async fn test_controller_cannot_consume_commands() {
    let bench = TestBench::in_memory(&["station-01"]);
    let err = bench
        .controller_bus()
        .ensure_group(&command_stream("station-01"), "station-01")
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_station_presence_is_its_own() {
    let bench = TestBench::in_memory(&["station-01", "station-02"]);
    let presence = PresenceTracker::new(bench.station_bus("station-01"));

    presence
        .announce("station-01", "running", Duration::from_secs(90))
        .await
        .unwrap();
    let err = presence
        .announce("station-02", "running", Duration::from_secs(90))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let monitor = PresenceTracker::new(bench.controller_bus());
    assert!(monitor.is_alive("station-01").await.unwrap());
    assert!(!monitor.is_alive("station-02").await.unwrap());
}

#[tokio::test]
async fn test_unknown_identity_is_denied() {
    let bench = TestBench::in_memory(&["station-01"]);
    let stranger = bench.station_bus("station-99");
    let err = stranger
        .publish("events:heartbeat", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized { .. }));
}

#[test]
fn test_station_rule_cannot_widen_reach() {
    let mut policy = IsolationPolicy::new();
    let widened = IsolationRule::station("station-01", DEFAULT_PRESENCE_NAMESPACE)
        .with_grant(Grant::new("commands:*", &[Operation::Consume]));
    let err = policy.insert(widened).unwrap_err();
    assert!(matches!(err, BusError::RuleRejected { .. }));
    assert!(policy.rule("station-01").is_none());
}
