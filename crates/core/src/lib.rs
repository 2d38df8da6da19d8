//! DWD Radiation Core Library
//!
//! Shared utilities for the radiation daemon:
//! - Configuration loading (XDG-compliant)
//! - Feed defaults

mod config;

pub use config::{find_config_file, get_xdg_config_path, load_config, ConfigSource};

/// Application name used for XDG paths
pub const APP_NAME: &str = "dwd-radiation";

/// Directory on the DWD open-data server holding the SIS grid files
pub const DEFAULT_BASE_URL: &str = "https://opendata.dwd.de/weather/satellite/radiation/sis/";

/// Default daemon fetch interval (15 minutes, one measurement slot)
pub const DEFAULT_FETCH_INTERVAL: u64 = 900;

/// Default measurement lookback in hours
pub const DEFAULT_LOOKBACK_HOURS: u32 = 3;

/// Default number of hourly issuances tried before forecasts give up
pub const DEFAULT_FORECAST_HOURS_BACK: u32 = 10;
