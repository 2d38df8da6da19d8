use radiation_daemon::{
    get_config_info, setup_logger, Cli, GlobalRadiation, HttpSource, NearestPointResolver,
};
use slog::{debug, error, info, warn, Logger};
use std::{sync::Arc, time::Duration};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::time::interval;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    info!(logger, "DWD Radiation Daemon starting...");
    info!(logger, "  Feed URL: {}", cli.base_url());
    info!(logger, "  Fetch interval: {} seconds", cli.interval());
    info!(logger, "  Tie break: {:?}", cli.tie_break());

    let source = HttpSource::new(
        logger.clone(),
        cli.base_url(),
        &cli.user_agent(),
        cli.timeout(),
    )?;
    let resolver = Arc::new(NearestPointResolver::new(cli.tie_break()));
    let mut radiation =
        GlobalRadiation::new(logger.clone(), Arc::new(source), resolver, cli.settings());

    for location in &cli.locations {
        if let Err(err) =
            radiation.add_location(location.name.clone(), location.latitude, location.longitude)
        {
            error!(logger, "Skipping location: {}", err);
        }
    }
    if radiation.locations().is_empty() {
        warn!(logger, "No locations configured, only the feed health is tracked");
    }

    tokio::select! {
        _ = process_radiation_data(&cli, &logger, &mut radiation) => {}
        _ = tokio::signal::ctrl_c() => info!(logger, "Shutting down"),
    }
    Ok(())
}

async fn process_radiation_data(cli: &Cli, logger: &Logger, radiation: &mut GlobalRadiation) {
    let sleep_between_checks = cli.interval();
    info!(
        logger,
        "Wait time between data pulls: {} seconds", sleep_between_checks
    );

    let mut check_interval = interval(Duration::from_secs(sleep_between_checks));
    loop {
        check_interval.tick().await;
        match process_data(cli, logger, radiation).await {
            Ok(_) => info!(
                logger,
                "Finished processing data, waiting {} seconds for next run", sleep_between_checks
            ),
            Err(err) => error!(logger, "Error processing data: {}", err),
        }
    }
}

async fn process_data(
    cli: &Cli,
    logger: &Logger,
    radiation: &mut GlobalRadiation,
) -> Result<(), anyhow::Error> {
    if let Err(err) = radiation.fetch_measurements(None).await {
        error!(logger, "Measurement fetch failed: {}", err);
    }
    if let Err(err) = radiation.fetch_forecasts().await {
        error!(logger, "Forecast fetch failed: {}", err);
    }

    info!(
        logger,
        "Health: measurements {}, forecasts {}",
        radiation.measurement_health(),
        radiation.forecast_health()
    );
    for location in radiation.locations() {
        let measured = location
            .latest_measurement()
            .and_then(|result| result.latest().map(|entry| (result, entry)));
        match measured {
            Some((result, entry)) => info!(
                logger,
                "{}: {:.1} W/m² at {} (cell {:.3},{:.3}, {:.2} km away)",
                location.name,
                entry.sis,
                format_timestamp(entry.timestamp),
                result.resolved.grid_latitude,
                result.resolved.grid_longitude,
                result.resolved.distance_km
            ),
            None => info!(logger, "{}: no measurement yet", location.name),
        }
        if let Some(forecast) = location.latest_forecast() {
            debug!(
                logger,
                "{}: forecast issued {} with {} entries",
                location.name,
                format_timestamp(forecast.issued_at),
                forecast.entries.len()
            );
        }
    }

    if cli.json {
        println!("{}", radiation.to_json()?);
    }
    Ok(())
}

fn format_timestamp(timestamp: i64) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}
