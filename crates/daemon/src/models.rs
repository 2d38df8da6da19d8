use serde::Serialize;
use std::collections::BTreeMap;

use crate::resolver::ResolvedIndex;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("coordinates of {name} are not finite: ({latitude}, {longitude})")]
    InvalidCoordinates {
        name: String,
        latitude: f64,
        longitude: f64,
    },
    #[error("{name} at ({latitude}, {longitude}) is outside the covered area")]
    OutsideCoverage {
        name: String,
        latitude: f64,
        longitude: f64,
    },
    #[error("no location named {0}")]
    UnknownLocation(String),
}

/// A named point of interest and the results of every extraction run for
/// it, oldest first. Names are not required to be unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub measurements: Vec<MeasurementResult>,
    pub forecasts: Vec<ForecastResult>,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            measurements: Vec::new(),
            forecasts: Vec::new(),
        }
    }

    pub fn latest_measurement(&self) -> Option<&MeasurementResult> {
        self.measurements.last()
    }

    pub fn latest_forecast(&self) -> Option<&ForecastResult> {
        self.forecasts.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementEntry {
    /// Epoch seconds, UTC
    pub timestamp: i64,
    /// W/m²
    pub sis: f64,
}

/// Measurements of one run, most recent first and unique by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub resolved: ResolvedIndex,
    pub entries: Vec<MeasurementEntry>,
}

impl MeasurementResult {
    pub fn latest(&self) -> Option<&MeasurementEntry> {
        self.entries.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastEntry {
    pub timestamp: i64,
    pub sis: f64,
}

/// Forecast of one run, entries ascending and none before the fetch time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub resolved: ResolvedIndex,
    /// When the forecast run was published
    pub issued_at: i64,
    pub metadata: BTreeMap<String, String>,
    pub entries: Vec<ForecastEntry>,
}

impl ForecastResult {
    /// First entry at or after `timestamp`.
    pub fn entry_at(&self, timestamp: i64) -> Option<&ForecastEntry> {
        self.entries.iter().find(|e| e.timestamp >= timestamp)
    }
}
