mod support;

use std::time::Duration;

use ride_dispatch::services::lifecycle::{self, Heartbeat};
use ride_dispatch::services::tracker;
use ride_dispatch::AppState;
use uuid::Uuid;

use support::*;

async fn sample_count(state: &AppState, trip_id: Uuid) -> usize {
    tracker::trace(&state.db, trip_id).await.unwrap().len()
}

async fn wait_for_samples(state: &AppState, trip_id: Uuid, at_least: usize) {
    for _ in 0..300 {
        if sample_count(state, trip_id).await >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tracer never recorded {} samples", at_least);
}

#[tokio::test]
async fn test_tracer_samples_until_stopped() {
    let mut config = test_config();
    config.dispatch.trace_interval = Duration::from_millis(20);
    let state = app_with(config).await;

    let (_, driver, trip) = ongoing_trip(&state).await;
    wait_for_samples(&state, trip.id, 3).await;

    lifecycle::cancel_trip(&state, &driver, trip.id, None).await.unwrap();
    // Let an insert that was already in flight land
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = sample_count(&state, trip.id).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(sample_count(&state, trip.id).await, frozen);
}

#[tokio::test]
async fn test_trace_reported_after_completion() {
    let state = app().await;
    let (rider, driver, trip) = ongoing_trip(&state).await;
    wait_for_samples(&state, trip.id, 1).await;

    let fix = Heartbeat {
        lat: Some(DROPOFF.0),
        lon: Some(DROPOFF.1),
        ..Default::default()
    };
    lifecycle::driver_heartbeat(&state, &driver, &fix).await.unwrap();
    lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    let trace = lifecycle::trip_trace(&state, &rider, trip.id).await.unwrap();
    assert_eq!(trace.samples.len(), 2);
    assert!((trace.path_distance_km - 3.13).abs() < 0.05);
    let history = trace.history.unwrap();
    assert_eq!(history.sample_count, 2);
    assert!(history.duration_seconds.is_some());
}

#[tokio::test]
async fn test_fare_from_trace_prices_driven_path() {
    let mut config = test_config();
    config.dispatch.fare_from_trace = true;
    let state = app_with(config).await;

    let (_, driver, trip) = ongoing_trip(&state).await;
    wait_for_samples(&state, trip.id, 1).await;

    // Detour well past the dropoff
    let fix = Heartbeat {
        lat: Some(9.10),
        lon: Some(38.80),
        ..Default::default()
    };
    lifecycle::driver_heartbeat(&state, &driver, &fix).await.unwrap();
    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    let fare_final = report.trip.fare_final.unwrap();
    assert!(fare_final > trip.fare_estimated, "{} <= {}", fare_final, trip.fare_estimated);
}

#[tokio::test]
async fn test_shutdown_stops_every_tracer() {
    let state = app().await;
    let (_, _, first) = ongoing_trip(&state).await;
    let (_, _, second) = ongoing_trip(&state).await;

    let mut active = state.tracker.active_trips();
    active.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(active, expected);

    state.tracker.shutdown_all();
    assert!(state.tracker.active_trips().is_empty());
    assert!(!state.tracker.stop(first.id));
}

#[tokio::test]
async fn test_late_tracer_for_canceled_trip_exits() {
    let mut config = test_config();
    config.dispatch.trace_interval = Duration::from_millis(20);
    let state = app_with(config).await;

    let rider = passenger("Late");
    let (driver, _) = online_driver(&state, "Racer", PICKUP.0, PICKUP.1).await;
    let trip = requested_trip(&state, &rider).await;
    lifecycle::accept_trip(&state, &driver, trip.id).await.unwrap();
    lifecycle::cancel_trip(&state, &rider, trip.id, None).await.unwrap();

    // Tracer registered after the cancellation already ran its stop
    state.tracker.start(state.db.clone(), trip.id, driver.id);
    wait_until(|| !state.tracker.is_tracking(trip.id)).await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(sample_count(&state, trip.id).await, 0);
}
