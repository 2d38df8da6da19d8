use crate::helpers::{berlin_grid, spawn_app};
use radiation_daemon::{measurement_file_name, ExtractionSettings};
use radiation_test_utils::{gradient_values, measurement_file, SIS_FILL};
use time::{macros::datetime, Duration};

#[tokio::test]
async fn snapshot_carries_history_and_health() {
    let mut app = spawn_app(ExtractionSettings {
        lookback: Duration::minutes(30),
        use_directory_index: false,
        ..Default::default()
    });
    let grid = berlin_grid();
    let slot = datetime!(2024-05-14 20:30 UTC);
    let mut values = gradient_values(&grid);
    values[grid.index(2, 2)] = SIS_FILL;
    app.source.publish(
        measurement_file_name(slot),
        measurement_file(&grid, slot, &values),
    );
    app.radiation.add_location("berlin", 52.52, 13.405).unwrap();
    app.radiation.fetch_measurements(None).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&app.radiation.to_json().unwrap()).unwrap();
    assert_eq!(json["last_measurement_fetch"], "2024-05-14T20:43:12Z");
    assert!(json["last_forecast_fetch"].is_null());
    assert_eq!(json["measurement_health"], "degraded");
    assert_eq!(json["forecast_health"], "nominal");
    assert_eq!(json["measurement_report"]["attempted"], 2);
    assert_eq!(
        json["measurement_report"]["failures"][0]["file"],
        "SISin202405142015DEv3.nc"
    );

    let berlin = &json["locations"][0];
    assert_eq!(berlin["name"], "berlin");
    let entry = &berlin["measurements"][0]["entries"][0];
    assert_eq!(entry["timestamp"], slot.unix_timestamp());
    // fill values come out as NaN, which JSON has no literal for
    assert!(entry["sis"].is_null());
}
