//! Command dispatch and correlation across a controller and stations.
//!
//! # Test Scenarios
//!
//! 1. **Round trip**: request on the station's stream, response on the
//!    controller's reply stream, nothing left pending on either side
//! 2. **Timeout**: no answer within the deadline, late answer counted
//! 3. **Concurrent sends**: several stations answering out of order
//! 4. **Retry**: each attempt carries a fresh correlation id
//! 5. **Crash recovery**: an unacknowledged command is handed out again,
//!    including backlogs larger than one read batch

use crate::test_utils::*;
use arturo_bus::Broker;
use arturo_protocol::address::command_stream;
use arturo_protocol::CommandRequestPayload;
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_round_trip() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;
    let mut station = bench.consumer("station-01").await;

    let handle = router
        .send(
            "station-01",
            CommandRequestPayload::new("fluke-8846a", "measure_dc_voltage")
                .with_parameter("range", "10"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let correlation_id = handle.correlation_id();

    let delivery = next_delivery(&mut station).await;
    let request = delivery.message();
    assert_eq!(request.correlation_id(), Some(correlation_id));
    assert_eq!(request.reply_to(), Some(router.reply_stream()));
    assert_eq!(
        delivery.command().unwrap().timeout_ms,
        Some(5000),
        "timeout is carried to the station"
    );
    answer(&station, &delivery, "1.234567").await;

    assert_eq!(router.poll_replies(None).await.unwrap(), 1);
    let response = handle.wait().await.unwrap();
    assert_eq!(response.correlation_id(), Some(correlation_id));
    assert_eq!(response.source().instance, "station-01");
    let payload = response.as_command_response().unwrap();
    assert!(payload.success);
    assert_eq!(payload.response.as_deref(), Some("1.234567"));

    assert_eq!(router.pending_count(), 0);
    assert_eq!(
        bench
            .broker
            .pending_count(&command_stream("station-01"), "station-01")
            .await
            .unwrap(),
        0
    );
    assert_eq!(router.anomalies().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_response() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;
    let mut station = bench.consumer("station-01").await;

    let handle = router
        .send(
            "station-01",
            CommandRequestPayload::new("dmm", "identify"),
            Duration::from_millis(2000),
        )
        .await
        .unwrap();
    let correlation_id = handle.correlation_id();
    let started = tokio::time::Instant::now();

    let err = handle.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert_eq!(router.pending_count(), 0);

    let delivery = next_delivery(&mut station).await;
    assert_eq!(delivery.message().correlation_id(), Some(correlation_id));
    answer(&station, &delivery, "too late").await;

    assert_eq!(router.poll_replies(None).await.unwrap(), 0);
    let anomalies = router.anomalies();
    assert_eq!(anomalies.late, 1);
    assert_eq!(anomalies.unmatched, 0);
}

#[tokio::test]
async fn test_concurrent_sends_out_of_order() {
    let stations = ["station-01", "station-02", "station-03"];
    let bench = TestBench::in_memory(&stations);
    let router = bench.router().await;
    let _listener = router.spawn_reply_listener();

    let mut handles = Vec::new();
    for station in stations {
        for n in 0..3 {
            let handle = router
                .send(
                    station,
                    CommandRequestPayload::new("dmm", "echo")
                        .with_parameter("value", format!("{}-{}", station, n)),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
            handles.push((format!("{}-{}", station, n), handle));
        }
    }

    let ids: HashSet<_> = handles.iter().map(|(_, h)| h.correlation_id()).collect();
    assert_eq!(ids.len(), handles.len(), "correlation ids are unique");
    assert_eq!(router.pending_count(), handles.len());

    // Each station answers its commands newest first, stations in reverse.
    for station in stations.iter().rev() {
        let mut consumer = bench.consumer(station).await;
        let mut deliveries = Vec::new();
        while deliveries.len() < 3 {
            deliveries.push(next_delivery(&mut consumer).await);
        }
        for delivery in deliveries.iter().rev() {
            let value = delivery.command().unwrap().parameter("value").unwrap();
            answer(&consumer, delivery, value).await;
        }
    }

    for (expected, handle) in handles {
        let response = handle.wait().await.unwrap();
        let payload = response.as_command_response().unwrap();
        assert_eq!(payload.response.as_deref(), Some(expected.as_str()));
    }
    assert_eq!(router.pending_count(), 0);
    assert_eq!(router.anomalies().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_uses_fresh_correlation_ids() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;
    let _listener = router.spawn_reply_listener();
    let mut station = bench.consumer("station-01").await;

    // Ignore the first attempt, answer the second.
    let station_task = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let delivery = next_delivery(&mut station).await;
            seen.push(delivery.message().correlation_id());
            if seen.len() == 1 {
                station.ack(&delivery).await.unwrap();
                continue;
            }
            answer(&station, &delivery, "pong").await;
            return seen;
        }
    });

    let response = router
        .send_with_retry(
            "station-01",
            CommandRequestPayload::new("dmm", "ping"),
            Duration::from_secs(1),
            3,
        )
        .await
        .unwrap();

    let seen = station_task.await.unwrap();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
    assert_eq!(response.correlation_id(), seen[1]);
    assert!(response.as_command_response().unwrap().success);
}

#[tokio::test]
async fn test_unacknowledged_command_is_recovered() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;

    let handle = router
        .send(
            "station-01",
            CommandRequestPayload::new("psu", "set_voltage").with_parameter("voltage", "5.0"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    {
        let mut crashed = bench.consumer("station-01").await;
        let delivery = next_delivery(&mut crashed).await;
        assert!(!delivery.is_recovered());
    }

    let mut restarted = bench.consumer("station-01").await;
    let delivery = next_delivery(&mut restarted).await;
    assert!(delivery.is_recovered());
    assert_eq!(
        delivery.message().correlation_id(),
        Some(handle.correlation_id())
    );
    answer(&restarted, &delivery, "ok").await;
    assert!(
        !restarted.ack(&delivery).await.unwrap(),
        "second acknowledgment is a no-op"
    );

    router.poll_replies(None).await.unwrap();
    assert!(handle.wait().await.unwrap().as_command_response().unwrap().success);
}

#[tokio::test]
async fn test_backlog_beyond_one_batch_is_recovered() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;
    let _listener = router.spawn_reply_listener();

    // More than the consumer's batch of 16.
    let mut handles = Vec::new();
    for n in 0..20 {
        let handle = router
            .send(
                "station-01",
                CommandRequestPayload::new("dmm", "echo").with_parameter("value", n.to_string()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        handles.push(handle);
    }

    {
        let mut crashed = bench.consumer("station-01").await;
        for _ in 0..handles.len() {
            next_delivery(&mut crashed).await;
        }
    }

    // Take the whole backlog before answering any of it.
    let mut restarted = bench.consumer("station-01").await;
    let mut deliveries = Vec::new();
    for _ in 0..handles.len() {
        deliveries.push(next_delivery(&mut restarted).await);
    }
    let recovered: HashSet<_> = deliveries
        .iter()
        .filter(|d| d.is_recovered())
        .map(|d| d.message().correlation_id())
        .collect();
    assert_eq!(recovered.len(), handles.len());
    for delivery in &deliveries {
        let value = delivery.command().unwrap().parameter("value").unwrap();
        answer(&restarted, delivery, value).await;
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let response = handle.wait().await.unwrap();
        let payload = response.as_command_response().unwrap();
        assert_eq!(payload.response, Some(n.to_string()));
    }
    assert_eq!(
        bench
            .broker
            .pending_count(&command_stream("station-01"), "station-01")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_invalid_station_name_is_rejected() {
    let bench = TestBench::in_memory(&["station-01"]);
    let router = bench.router().await;

    let err = router
        .send(
            "Station 01",
            CommandRequestPayload::new("dmm", "identify"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, arturo_router::RouterError::InvalidStation(_)));
    assert_eq!(router.pending_count(), 0);
}
