//! Heartbeats, presence and emergency stops between stations and a monitor.

use crate::test_utils::*;
use arturo_protocol::address::{EMERGENCY_STOP_CHANNEL, HEARTBEAT_CHANNEL};
use arturo_protocol::{EmergencyStopPayload, EstopReason, HeartbeatPayload, HeartbeatStatus};
use arturo_router::{
    BroadcastChannel, EstopCoordinator, HeartbeatEmitter, PresenceTracker, RouterError,
    StationState, StationTracker,
};
use futures::StreamExt;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(90);

fn heartbeat(status: HeartbeatStatus) -> HeartbeatPayload {
    HeartbeatPayload::new(status, 12, vec!["dmm".to_string()], "1.0.0")
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_drives_station_state() {
    let bench = TestBench::in_memory(&["station-01"]);
    let station_bus = bench.station_bus("station-01");
    let emitter = HeartbeatEmitter::new(
        BroadcastChannel::new(station_bus.clone(), codec(), station_source("station-01")),
        PresenceTracker::new(station_bus.clone()),
        TTL,
    );

    let monitor_channel = BroadcastChannel::new(bench.controller_bus(), codec(), controller_source());
    let presence = PresenceTracker::new(bench.controller_bus());
    let mut heartbeats = monitor_channel.subscribe(HEARTBEAT_CHANNEL).await.unwrap();
    let mut tracker = StationTracker::new(Duration::from_secs(60));

    assert_eq!(emitter.beat(heartbeat(HeartbeatStatus::Running)).await.unwrap(), 1);
    let message = heartbeats.next().await.unwrap();
    assert_eq!(tracker.record_heartbeat(&message).as_deref(), Some("station-01"));
    assert_eq!(presence.status("station-01").await.unwrap().as_deref(), Some("running"));

    let transitions = tracker.refresh(&presence).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from, None);
    assert_eq!(transitions[0].to, StationState::Online);

    // Heartbeats stop, presence still holds.
    tokio::time::advance(Duration::from_secs(61)).await;
    tracker.refresh(&presence).await.unwrap();
    assert_eq!(tracker.state("station-01"), Some(StationState::Stale));

    // Presence expires too.
    tokio::time::advance(TTL).await;
    tracker.refresh(&presence).await.unwrap();
    assert_eq!(tracker.state("station-01"), Some(StationState::Offline));

    // And comes back with the next beat.
    emitter.beat(heartbeat(HeartbeatStatus::Running)).await.unwrap();
    let message = heartbeats.next().await.unwrap();
    tracker.record_heartbeat(&message);
    let transitions = tracker.refresh(&presence).await.unwrap();
    assert_eq!(transitions[0].from, Some(StationState::Offline));
    assert_eq!(transitions[0].to, StationState::Online);
}

#[tokio::test]
async fn test_withdraw_marks_station_offline() {
    let bench = TestBench::in_memory(&["station-01"]);
    let own = PresenceTracker::new(bench.station_bus("station-01"));
    let monitor = PresenceTracker::new(bench.controller_bus());

    own.announce("station-01", "running", TTL).await.unwrap();
    assert!(monitor.is_alive("station-01").await.unwrap());
    assert!(own.withdraw("station-01").await.unwrap());
    assert!(!monitor.is_alive("station-01").await.unwrap());
}

#[tokio::test]
async fn test_emergency_stop_reaches_every_station() {
    let stations = ["station-01", "station-02"];
    let bench = TestBench::in_memory(&stations);

    let mut subscriptions = Vec::new();
    for station in stations {
        let channel = BroadcastChannel::new(bench.station_bus(station), codec(), station_source(station));
        subscriptions.push(channel.subscribe(EMERGENCY_STOP_CHANNEL).await.unwrap());
    }

    let controller = BroadcastChannel::new(bench.controller_bus(), codec(), controller_source());
    let reached = controller
        .publish_emergency_stop(
            EmergencyStopPayload::new(EstopReason::OperatorCommand)
                .with_description("bench fire drill")
                .with_initiator("operator-7"),
        )
        .await
        .unwrap();
    assert_eq!(reached, 2);

    for subscription in &mut subscriptions {
        let estop = EstopCoordinator::new();
        let message = subscription.next().await.unwrap();
        assert!(estop.handle_message(&message));
        let state = estop.state();
        assert!(state.active);
        assert_eq!(state.reason, Some(EstopReason::OperatorCommand));
        assert_eq!(state.initiator.as_deref(), Some("operator-7"));
        assert_eq!(state.description.as_deref(), Some("bench fire drill"));
    }
}

#[tokio::test]
async fn test_first_stop_is_kept_until_acknowledged() {
    let bench = TestBench::in_memory(&["station-01"]);
    let channel = BroadcastChannel::new(
        bench.station_bus("station-01"),
        codec(),
        station_source("station-01"),
    );
    let mut stops = channel.subscribe(EMERGENCY_STOP_CHANNEL).await.unwrap();
    let controller = BroadcastChannel::new(bench.controller_bus(), codec(), controller_source());

    controller
        .publish_emergency_stop(EmergencyStopPayload::new(EstopReason::ButtonPress))
        .await
        .unwrap();
    controller
        .publish_emergency_stop(EmergencyStopPayload::new(EstopReason::DeviceFault))
        .await
        .unwrap();

    let estop = EstopCoordinator::new();
    assert!(estop.handle_message(&stops.next().await.unwrap()));
    assert!(!estop.handle_message(&stops.next().await.unwrap()));
    assert_eq!(estop.state().reason, Some(EstopReason::ButtonPress));
    assert_eq!(estop.state().initiator.as_deref(), Some(CONTROLLER_INSTANCE));

    assert!(estop.acknowledge());
    assert!(!estop.is_active());
}

#[tokio::test]
async fn test_station_cannot_listen_to_other_channels() {
    let bench = TestBench::in_memory(&["station-01"]);
    let channel = BroadcastChannel::new(
        bench.station_bus("station-01"),
        codec(),
        station_source("station-01"),
    );
    // Stations only listen for emergency stops.
    match channel.subscribe("events:diagnostics").await {
        Err(err) => assert!(matches!(err, RouterError::Unauthorized(_))),
        Ok(_) => panic!("subscription should be denied"),
    }
}
