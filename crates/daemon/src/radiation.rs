//! In-memory aggregate of locations and their extraction history.
//!
//! [`GlobalRadiation`] owns every [`Location`] and runs the measurement and
//! forecast pipelines against them. A run first fetches and decodes what it
//! needs, then computes a result for every location and only then commits
//! them, so a run that fails leaves all earlier results in place.

use serde::Serialize;
use slog::{error, info, Logger};
use std::collections::HashSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::catalog::{FeedKind, FileCatalog, RemoteSource};
use crate::clock::{Clock, SystemClock};
use crate::domains::{
    forecast_result, measurement_result, ExtractionError, ForecastService, MeasurementService,
};
use crate::grid_cache::DecodedFileCache;
use crate::health::{HealthState, HealthTracker, RunReport};
use crate::models::{Location, LocationError};
use crate::netcdf::GridDecoder;
use crate::resolver::NearestPointResolver;
use crate::settings::ExtractionSettings;
use crate::time_window::TimeWindowPolicy;

pub struct GlobalRadiation {
    logger: Logger,
    settings: ExtractionSettings,
    policy: TimeWindowPolicy,
    clock: Arc<dyn Clock>,
    resolver: Arc<NearestPointResolver>,
    measurements: MeasurementService,
    forecasts: ForecastService,
    locations: Vec<Location>,
    measurement_files: DecodedFileCache,
    forecast_files: DecodedFileCache,
    measurement_health: HealthTracker,
    forecast_health: HealthTracker,
    last_measurement_fetch: Option<OffsetDateTime>,
    last_forecast_fetch: Option<OffsetDateTime>,
}

/// Serializable view of the whole aggregate.
#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    pub locations: &'a [Location],
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_measurement_fetch: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_forecast_fetch: Option<OffsetDateTime>,
    pub measurement_health: HealthState,
    pub forecast_health: HealthState,
    pub measurement_report: Option<&'a RunReport>,
    pub forecast_report: Option<&'a RunReport>,
}

impl GlobalRadiation {
    pub fn new(
        logger: Logger,
        source: Arc<dyn RemoteSource>,
        resolver: Arc<NearestPointResolver>,
        settings: ExtractionSettings,
    ) -> Self {
        let catalog = Arc::new(FileCatalog::new(logger.clone(), source));
        let decoder = GridDecoder::new(settings.variable.clone());
        let measurements = MeasurementService::new(
            logger.clone(),
            Arc::clone(&catalog),
            decoder.clone(),
            settings.use_directory_index,
        );
        let forecasts = ForecastService::new(logger.clone(), catalog, decoder);
        let policy = TimeWindowPolicy::new(settings.lookback, settings.forecast_hours_back);

        GlobalRadiation {
            logger,
            settings,
            policy,
            clock: Arc::new(SystemClock),
            resolver,
            measurements,
            forecasts,
            locations: Vec::new(),
            measurement_files: DecodedFileCache::default(),
            forecast_files: DecodedFileCache::default(),
            measurement_health: HealthTracker::default(),
            forecast_health: HealthTracker::default(),
            last_measurement_fetch: None,
            last_forecast_fetch: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    pub fn add_location(
        &mut self,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<&Location, LocationError> {
        let name = name.into();
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(LocationError::InvalidCoordinates {
                name,
                latitude,
                longitude,
            });
        }
        if !self.settings.coverage.contains(latitude, longitude) {
            return Err(LocationError::OutsideCoverage {
                name,
                latitude,
                longitude,
            });
        }

        info!(
            self.logger,
            "tracking {} at ({}, {})", name, latitude, longitude
        );
        self.locations.push(Location::new(name, latitude, longitude));
        Ok(&self.locations[self.locations.len() - 1])
    }

    /// Removes the first location called `name`.
    pub fn remove_location(&mut self, name: &str) -> Result<Location, LocationError> {
        let position = self
            .locations
            .iter()
            .position(|location| location.name == name)
            .ok_or_else(|| LocationError::UnknownLocation(name.to_string()))?;
        Ok(self.locations.remove(position))
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|location| location.name == name)
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Fetches the measurement window ending now and appends one result per
    /// location. `lookback` overrides the configured lookback for this call.
    pub async fn fetch_measurements(
        &mut self,
        lookback: Option<Duration>,
    ) -> Result<RunReport, ExtractionError> {
        let policy = match lookback {
            Some(lookback) => self.policy.with_lookback(lookback),
            None => self.policy,
        };
        let window = policy.measurement_window(self.clock.now());
        let retrieval = self
            .measurements
            .retrieve(&window, &self.measurement_files)
            .await;

        let completed = self.clock.now();
        let report = retrieval.report(completed.unix_timestamp());
        if retrieval.decoded.is_empty() {
            self.measurement_health.record(report.clone());
            error!(
                self.logger,
                "measurement run failed, none of {} files usable", report.attempted
            );
            return Err(ExtractionError::TotalFetchFailure {
                kind: FeedKind::Measurement,
                failures: report.failures,
            });
        }

        let results = self
            .locations
            .iter()
            .map(|location| {
                measurement_result(
                    location,
                    &retrieval.decoded,
                    &self.resolver,
                    self.settings.sentinel,
                )
            })
            .collect::<Result<Vec<_>, _>>();
        let results = match results {
            Ok(results) => results,
            Err(err) => {
                self.measurement_health.record_failed(report);
                error!(self.logger, "measurement run failed: {}", err);
                return Err(err.into());
            }
        };

        let limit = self.settings.history_limit;
        for (location, result) in self.locations.iter_mut().zip(results) {
            location.measurements.push(result);
            trim_history(&mut location.measurements, limit);
        }

        let keep: HashSet<&str> = retrieval
            .decoded
            .iter()
            .map(|decoded| decoded.file.name.as_str())
            .collect();
        let evicted = self.measurement_files.retain_only(&keep);
        for decoded in &retrieval.decoded {
            self.measurement_files
                .insert(decoded.file.name.clone(), Arc::clone(&decoded.grid));
        }

        self.last_measurement_fetch = Some(completed);
        let state = self.measurement_health.record(report.clone());
        info!(
            self.logger,
            "measurement run {}: {} of {} files decoded, {} evicted from cache",
            state,
            report.decoded,
            report.attempted,
            evicted
        );
        Ok(report)
    }

    /// Fetches the newest available forecast run and appends one result per
    /// location.
    pub async fn fetch_forecasts(&mut self) -> Result<RunReport, ExtractionError> {
        let now = self.clock.now();
        let issuances = self.policy.forecast_issuances(now);
        let cutoff = self.policy.forecast_cutoff(now).unix_timestamp();
        let retrieval = self.forecasts.retrieve(&issuances, &self.forecast_files).await;

        let completed = self.clock.now();
        let report = retrieval.report(completed.unix_timestamp());
        let Some(decoded) = retrieval.decoded.first() else {
            self.forecast_health.record(report.clone());
            error!(
                self.logger,
                "forecast run failed, none of {} issuances usable", report.attempted
            );
            return Err(ExtractionError::TotalFetchFailure {
                kind: FeedKind::Forecast,
                failures: report.failures,
            });
        };

        let results = self
            .locations
            .iter()
            .map(|location| {
                forecast_result(
                    location,
                    decoded,
                    &self.resolver,
                    self.settings.sentinel,
                    cutoff,
                )
            })
            .collect::<Result<Vec<_>, _>>();
        let results = match results {
            Ok(results) => results,
            Err(err) => {
                self.forecast_health.record_failed(report);
                error!(self.logger, "forecast run failed: {}", err);
                return Err(err.into());
            }
        };

        let limit = self.settings.history_limit;
        for (location, result) in self.locations.iter_mut().zip(results) {
            location.forecasts.push(result);
            trim_history(&mut location.forecasts, limit);
        }

        let keep: HashSet<&str> = [decoded.file.name.as_str()].into();
        self.forecast_files.retain_only(&keep);
        self.forecast_files
            .insert(decoded.file.name.clone(), Arc::clone(&decoded.grid));

        self.last_forecast_fetch = Some(completed);
        let state = self.forecast_health.record(report.clone());
        info!(
            self.logger,
            "forecast run {}: using {} after {} attempts",
            state,
            decoded.file.name,
            report.attempted
        );
        Ok(report)
    }

    pub fn measurement_health(&self) -> HealthState {
        self.measurement_health.state()
    }

    pub fn forecast_health(&self) -> HealthState {
        self.forecast_health.state()
    }

    pub fn last_measurement_report(&self) -> Option<&RunReport> {
        self.measurement_health.last_report()
    }

    pub fn last_forecast_report(&self) -> Option<&RunReport> {
        self.forecast_health.last_report()
    }

    /// When the last successful measurement run completed.
    pub fn last_measurement_fetch(&self) -> Option<OffsetDateTime> {
        self.last_measurement_fetch
    }

    /// When the last successful forecast run completed.
    pub fn last_forecast_fetch(&self) -> Option<OffsetDateTime> {
        self.last_forecast_fetch
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            locations: &self.locations,
            last_measurement_fetch: self.last_measurement_fetch,
            last_forecast_fetch: self.last_forecast_fetch,
            measurement_health: self.measurement_health.state(),
            forecast_health: self.forecast_health.state(),
            measurement_report: self.measurement_health.last_report(),
            forecast_report: self.forecast_health.last_report(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

/// Drops the oldest results beyond `limit`.
fn trim_history<T>(history: &mut Vec<T>, limit: Option<usize>) {
    if let Some(limit) = limit {
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
    }
}
