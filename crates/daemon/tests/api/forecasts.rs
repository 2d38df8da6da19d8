use crate::helpers::{berlin_grid, spawn_app, NOW};
use radiation_daemon::{
    forecast_file_name, ExtractionError, ExtractionSettings, FeedKind, ForecastEntry, HealthState,
};
use radiation_test_utils::{forecast_file, uniform_values, GridSpec};
use time::{macros::datetime, Duration, OffsetDateTime};

fn hourly(grid: &GridSpec, steps: usize) -> Vec<Vec<f32>> {
    (1..=steps)
        .map(|h| uniform_values(grid, 100.0 * h as f32))
        .collect()
}

fn publish_forecast(app: &crate::helpers::TestApp, issuance: OffsetDateTime, steps: usize) {
    let grid = berlin_grid();
    app.source.publish(
        forecast_file_name(issuance),
        forecast_file(&grid, issuance, &hourly(&grid, steps)),
    );
}

#[tokio::test]
async fn latest_issuance_gives_a_nominal_run() {
    let mut app = spawn_app(ExtractionSettings::default());
    // 20:43 expects the 20:00 run
    let issuance = datetime!(2024-05-14 20:00 UTC);
    publish_forecast(&app, issuance, 3);
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    let report = app.radiation.fetch_forecasts().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(app.radiation.forecast_health(), HealthState::Nominal);
    assert_eq!(app.radiation.last_forecast_fetch(), Some(NOW));

    let forecast = app
        .radiation
        .location("berlin")
        .unwrap()
        .latest_forecast()
        .unwrap();
    assert_eq!(forecast.issued_at, issuance.unix_timestamp());
    assert_eq!(
        forecast.entries,
        vec![
            ForecastEntry {
                timestamp: (issuance + Duration::hours(1)).unix_timestamp(),
                sis: 100.0
            },
            ForecastEntry {
                timestamp: (issuance + Duration::hours(2)).unix_timestamp(),
                sis: 200.0
            },
            ForecastEntry {
                timestamp: (issuance + Duration::hours(3)).unix_timestamp(),
                sis: 300.0
            },
        ]
    );
    assert_eq!(
        forecast.metadata.get("long_name").map(String::as_str),
        Some("Surface Incoming Shortwave Radiation")
    );
}

#[tokio::test]
async fn older_issuance_is_used_and_past_steps_dropped() {
    let mut app = spawn_app(ExtractionSettings::default());
    let issuance = datetime!(2024-05-14 19:00 UTC);
    publish_forecast(&app, issuance, 4);
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    let report = app.radiation.fetch_forecasts().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures[0].file, "SISfc2024051420_fc+18h-DE.nc");
    assert_eq!(app.radiation.forecast_health(), HealthState::Degraded);

    let forecast = app
        .radiation
        .location("berlin")
        .unwrap()
        .latest_forecast()
        .unwrap();
    // 20:00 is before the 20:43:12 fetch
    assert_eq!(forecast.entries.len(), 3);
    assert!(forecast
        .entries
        .iter()
        .all(|entry| entry.timestamp >= NOW.unix_timestamp()));
    assert!(forecast
        .entries
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));
    assert_eq!(forecast.issued_at, issuance.unix_timestamp());
}

#[tokio::test]
async fn no_issuance_within_reach_fails() {
    let mut app = spawn_app(ExtractionSettings {
        forecast_hours_back: 2,
        ..Default::default()
    });
    // three hours old, one more than allowed
    publish_forecast(&app, datetime!(2024-05-14 18:00 UTC), 6);
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    let err = app.radiation.fetch_forecasts().await.unwrap_err();
    assert!(matches!(
        err,
        ExtractionError::TotalFetchFailure {
            kind: FeedKind::Forecast,
            ref failures
        } if failures.len() == 2
    ));
    assert_eq!(app.radiation.forecast_health(), HealthState::Failed);
    assert!(app.radiation.location("berlin").unwrap().forecasts.is_empty());
    assert_eq!(app.radiation.last_forecast_fetch(), None);
}

#[tokio::test]
async fn forecast_run_is_decoded_once() {
    let mut app = spawn_app(ExtractionSettings::default());
    publish_forecast(&app, datetime!(2024-05-14 20:00 UTC), 3);
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();

    app.radiation.fetch_forecasts().await.unwrap();
    app.clock.advance(Duration::minutes(15));
    app.radiation.fetch_forecasts().await.unwrap();

    assert_eq!(app.source.requests_for("SISfc2024051420_fc+18h-DE.nc"), 1);
    let berlin = app.radiation.location("berlin").unwrap();
    assert_eq!(berlin.forecasts.len(), 2);
    // 21:00 is still ahead at 20:58:12
    assert_eq!(berlin.latest_forecast().unwrap().entries.len(), 3);
}
