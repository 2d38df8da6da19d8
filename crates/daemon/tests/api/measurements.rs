use crate::helpers::{berlin_grid, spawn_app, NOW};
use radiation_daemon::{
    measurement_file_name, ExtractionError, ExtractionSettings, FeedKind, HealthState,
};
use radiation_test_utils::{gradient_values, measurement_file};
use time::{macros::datetime, Duration};

fn half_hour_lookback() -> ExtractionSettings {
    ExtractionSettings {
        lookback: Duration::minutes(30),
        use_directory_index: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn one_unreachable_file_degrades_the_run() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    let slot = datetime!(2024-05-14 20:30 UTC);
    app.source.publish(
        measurement_file_name(slot),
        measurement_file(&grid, slot, &gradient_values(&grid)),
    );
    app.radiation.add_location("berlin", 52.5200, 13.4050).unwrap();

    // the window is 20:15 and 20:30, 20:15 never arrives
    let report = app.radiation.fetch_measurements(None).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.decoded, 1);
    assert_eq!(report.failures[0].file, "SISin202405142015DEv3.nc");
    assert_eq!(app.radiation.measurement_health(), HealthState::Degraded);
    assert_eq!(app.radiation.last_measurement_fetch(), Some(NOW));

    let berlin = app.radiation.location("berlin").unwrap();
    assert_eq!(berlin.measurements.len(), 1);
    let result = berlin.latest_measurement().unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].timestamp, slot.unix_timestamp());
    assert_eq!(result.entries[0].sis, 202.0);
    assert_eq!(result.resolved.index, grid.index(2, 2));
    assert!((result.resolved.grid_latitude - 52.5).abs() < 1e-4);
    assert!((result.resolved.grid_longitude - 13.4).abs() < 1e-9);
    assert!(result.resolved.distance_km < 2.5);
}

#[tokio::test]
async fn total_failure_keeps_earlier_history() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    for slot in [
        datetime!(2024-05-14 20:15 UTC),
        datetime!(2024-05-14 20:30 UTC),
    ] {
        app.source.publish(
            measurement_file_name(slot),
            measurement_file(&grid, slot, &gradient_values(&grid)),
        );
    }
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    app.radiation.fetch_measurements(None).await.unwrap();
    assert_eq!(app.radiation.measurement_health(), HealthState::Nominal);
    let before = app.radiation.location("berlin").unwrap().clone();

    // nothing is published two hours later
    app.clock.advance(Duration::hours(2));
    let err = app.radiation.fetch_measurements(None).await.unwrap_err();
    match err {
        ExtractionError::TotalFetchFailure { kind, failures } => {
            assert_eq!(kind, FeedKind::Measurement);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(app.radiation.measurement_health(), HealthState::Failed);
    assert_eq!(app.radiation.location("berlin"), Some(&before));
    assert_eq!(app.radiation.last_measurement_fetch(), Some(NOW));
}

#[tokio::test]
async fn health_recovers_on_the_next_good_run() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    assert!(app.radiation.fetch_measurements(None).await.is_err());
    assert_eq!(app.radiation.measurement_health(), HealthState::Failed);

    for slot in [
        datetime!(2024-05-14 20:15 UTC),
        datetime!(2024-05-14 20:30 UTC),
    ] {
        app.source.publish(
            measurement_file_name(slot),
            measurement_file(&grid, slot, &gradient_values(&grid)),
        );
    }
    app.radiation.fetch_measurements(None).await.unwrap();
    assert_eq!(app.radiation.measurement_health(), HealthState::Nominal);
}

#[tokio::test]
async fn decoded_files_are_reused_between_runs() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    let slot = datetime!(2024-05-14 20:30 UTC);
    app.source.publish(
        measurement_file_name(slot),
        measurement_file(&grid, slot, &gradient_values(&grid)),
    );
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    app.radiation.fetch_measurements(None).await.unwrap();
    app.radiation.fetch_measurements(None).await.unwrap();

    assert_eq!(app.source.requests_for("SISin202405142030DEv3.nc"), 1);
    // the missing slot is retried every run
    assert_eq!(app.source.requests_for("SISin202405142015DEv3.nc"), 2);
    assert_eq!(app.radiation.location("berlin").unwrap().measurements.len(), 2);
    // the grid was only scanned once for the location
    assert_eq!(app.resolver.cached_entries(), 1);
}

#[tokio::test]
async fn lookback_override_widens_the_window() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();
    let mut slot = datetime!(2024-05-14 19:45 UTC);
    while slot <= datetime!(2024-05-14 20:30 UTC) {
        app.source.publish(
            measurement_file_name(slot),
            measurement_file(&grid, slot, &gradient_values(&grid)),
        );
        slot += Duration::minutes(15);
    }

    let report = app
        .radiation
        .fetch_measurements(Some(Duration::hours(1)))
        .await
        .unwrap();
    assert_eq!(report.attempted, 4);
    let entries = &app
        .radiation
        .location("berlin")
        .unwrap()
        .latest_measurement()
        .unwrap()
        .entries;
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].timestamp, datetime!(2024-05-14 20:30 UTC).unix_timestamp());
    assert_eq!(entries[3].timestamp, datetime!(2024-05-14 19:45 UTC).unix_timestamp());
}

#[tokio::test]
async fn directory_index_skips_unpublished_files() {
    let mut app = spawn_app(ExtractionSettings {
        lookback: Duration::minutes(30),
        ..Default::default()
    });
    let grid = berlin_grid();
    let slot = datetime!(2024-05-14 20:30 UTC);
    app.source.publish(
        measurement_file_name(slot),
        measurement_file(&grid, slot, &gradient_values(&grid)),
    );
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    let report = app.radiation.fetch_measurements(None).await.unwrap();
    assert_eq!(app.source.requests_for("SISin202405142015DEv3.nc"), 0);
    assert!(report.failures[0].error.contains("directory index"));
}

#[tokio::test]
async fn history_limit_drops_the_oldest_results() {
    let mut app = spawn_app(ExtractionSettings {
        history_limit: Some(1),
        ..half_hour_lookback()
    });
    let grid = berlin_grid();
    let mut slot = datetime!(2024-05-14 20:15 UTC);
    while slot <= datetime!(2024-05-14 20:45 UTC) {
        app.source.publish(
            measurement_file_name(slot),
            measurement_file(&grid, slot, &gradient_values(&grid)),
        );
        slot += Duration::minutes(15);
    }
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    app.radiation.fetch_measurements(None).await.unwrap();
    app.clock.advance(Duration::minutes(15));
    app.radiation.fetch_measurements(None).await.unwrap();

    let berlin = app.radiation.location("berlin").unwrap();
    assert_eq!(berlin.measurements.len(), 1);
    assert_eq!(
        berlin.latest_measurement().unwrap().latest().unwrap().timestamp,
        datetime!(2024-05-14 20:45 UTC).unix_timestamp()
    );
}

#[tokio::test]
async fn runs_without_locations_still_track_health() {
    let mut app = spawn_app(half_hour_lookback());
    let grid = berlin_grid();
    let slot = datetime!(2024-05-14 20:30 UTC);
    app.source.publish(
        measurement_file_name(slot),
        measurement_file(&grid, slot, &gradient_values(&grid)),
    );

    app.radiation.fetch_measurements(None).await.unwrap();
    assert_eq!(app.radiation.measurement_health(), HealthState::Degraded);
    assert!(app.radiation.locations().is_empty());
}
