//! The same flows against a live Redis.
//!
//! Ignored by default. Run with
//! `ARTURO_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
//! Station names are randomized so runs do not see each other's entries.

use crate::test_utils::*;
use arturo_bus::{Broker, BusError, ReadCursor, RedisBroker};
use arturo_protocol::address::{command_stream, EMERGENCY_STOP_CHANNEL};
use arturo_protocol::{CommandRequestPayload, EmergencyStopPayload, EstopReason};
use arturo_router::{BroadcastChannel, PresenceTracker};
use futures::StreamExt;
use std::time::Duration;

async fn redis() -> RedisBroker {
    let url = std::env::var("ARTURO_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisBroker::connect(&url).await.expect("redis reachable")
}

fn unique_station() -> String {
    format!("station-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

#[tokio::test]
#[ignore]
async fn test_redis_round_trip() {
    let station = unique_station();
    let bench = TestBench::new(redis().await, &[station.as_str()]);
    let router = bench.router().await;
    let _listener = router.spawn_reply_listener();
    let mut consumer = bench.consumer(&station).await;

    let handle = router
        .send(
            &station,
            CommandRequestPayload::new("dmm", "identify"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let delivery = next_delivery(&mut consumer).await;
    answer(&consumer, &delivery, "ARTURO,DMM").await;

    let response = handle.wait().await.unwrap();
    assert_eq!(response.correlation_id(), delivery.message().correlation_id());
    assert_eq!(
        bench
            .broker
            .pending_count(&command_stream(&station), &station)
            .await
            .unwrap(),
        0
    );
    assert!(!consumer.ack(&delivery).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_redis_blocking_reads_share_one_connection() {
    let station = unique_station();
    let broker = redis().await;
    let stream = command_stream(&station);
    broker.ensure_group(&stream, &station).await.unwrap();
    assert_eq!(broker.open_connections().await, 1);

    for _ in 0..20 {
        let entries = broker
            .read_group(
                &stream,
                &station,
                &station,
                ReadCursor::New,
                10,
                Some(Duration::from_millis(10)),
            )
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
    assert_eq!(broker.open_connections().await, 2);

    // Still usable after all those waits.
    broker.append(&stream, &[("message", "{}")]).await.unwrap();
    let entries = broker
        .read_group(
            &stream,
            &station,
            &station,
            ReadCursor::New,
            10,
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(broker.open_connections().await, 2);
}

#[tokio::test]
#[ignore]
async fn test_redis_pending_pages_after_id() {
    let station = unique_station();
    let broker = redis().await;
    let stream = command_stream(&station);
    broker.ensure_group(&stream, &station).await.unwrap();
    for n in 0..5 {
        let value = n.to_string();
        broker.append(&stream, &[("message", value.as_str())]).await.unwrap();
    }
    broker
        .read_group(&stream, &station, &station, ReadCursor::New, 10, None)
        .await
        .unwrap();

    let first = broker
        .read_group(&stream, &station, &station, ReadCursor::pending(), 3, None)
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    let rest = broker
        .read_group(
            &stream,
            &station,
            &station,
            ReadCursor::pending_after(first[2].id.clone()),
            3,
            None,
        )
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1].field("message"), Some("4"));
}

#[tokio::test]
#[ignore]
async fn test_redis_timeout() {
    let station = unique_station();
    let bench = TestBench::new(redis().await, &[station.as_str()]);
    let router = bench.router().await;
    let _listener = router.spawn_reply_listener();

    let handle = router
        .send(
            &station,
            CommandRequestPayload::new("dmm", "identify"),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
    assert!(handle.wait().await.unwrap_err().is_timeout());
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test]
#[ignore]
async fn test_redis_isolation() {
    let mine = unique_station();
    let theirs = unique_station();
    let bench = TestBench::new(redis().await, &[mine.as_str(), theirs.as_str()]);

    let err = bench
        .station_bus(&mine)
        .ensure_group(&command_stream(&theirs), &theirs)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized { .. }));
}

#[tokio::test]
#[ignore]
async fn test_redis_presence_and_estop() {
    let station = unique_station();
    let bench = TestBench::new(redis().await, &[station.as_str()]);

    let presence = PresenceTracker::new(bench.station_bus(&station));
    presence
        .announce(&station, "running", Duration::from_secs(2))
        .await
        .unwrap();
    let monitor = PresenceTracker::new(bench.controller_bus());
    assert!(monitor.is_alive(&station).await.unwrap());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!monitor.is_alive(&station).await.unwrap());

    let listener = BroadcastChannel::new(bench.station_bus(&station), codec(), station_source(&station));
    let mut stops = listener.subscribe(EMERGENCY_STOP_CHANNEL).await.unwrap();
    let controller = BroadcastChannel::new(bench.controller_bus(), codec(), controller_source());
    controller
        .publish_emergency_stop(EmergencyStopPayload::new(EstopReason::SafetyInterlock))
        .await
        .unwrap();
    let message = tokio::time::timeout(Duration::from_secs(2), stops.next())
        .await
        .expect("estop within 2s")
        .unwrap();
    assert_eq!(
        message.as_emergency_stop().unwrap().reason,
        EstopReason::SafetyInterlock
    );
}
