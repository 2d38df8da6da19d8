use radiation_core::{DEFAULT_FORECAST_HOURS_BACK, DEFAULT_LOOKBACK_HOURS};
use serde::{Deserialize, Serialize};
use time::Duration;

/// Which cell wins when two cells are exactly equidistant from a location.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Lowest flattened index
    #[default]
    FirstIndex,
    /// Highest flattened index
    LastIndex,
}

/// What to do with cells flagged by `_FillValue`/`missing_value`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SentinelPolicy {
    /// Keep the entry with a NaN value
    #[default]
    Nan,
    /// Keep the entry with the raw stored value
    Passthrough,
    /// Drop the entry
    Skip,
}

/// Area in which locations may be added. Defaults to the extent of the DWD
/// SIS grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Default for CoverageBounds {
    fn default() -> Self {
        Self {
            min_latitude: 46.0,
            max_latitude: 57.0,
            min_longitude: 5.0,
            max_longitude: 16.0,
        }
    }
}

impl CoverageBounds {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    /// Name of the irradiance variable in the grid files
    pub variable: String,
    /// Default measurement lookback
    pub lookback: Duration,
    /// How many older hourly forecast issuances may be tried
    pub forecast_hours_back: u32,
    pub sentinel: SentinelPolicy,
    pub coverage: CoverageBounds,
    /// Confirm measurement files against the directory listing before
    /// downloading them
    pub use_directory_index: bool,
    /// Results kept per location and feed, unbounded when `None`
    pub history_limit: Option<usize>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            variable: "SIS".to_string(),
            lookback: Duration::hours(DEFAULT_LOOKBACK_HOURS as i64),
            forecast_hours_back: DEFAULT_FORECAST_HOURS_BACK,
            sentinel: SentinelPolicy::default(),
            coverage: CoverageBounds::default(),
            use_directory_index: true,
            history_limit: None,
        }
    }
}
