use anyhow::{anyhow, Error};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use radiation_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_BASE_URL, DEFAULT_FETCH_INTERVAL,
    DEFAULT_FORECAST_HOURS_BACK, DEFAULT_LOOKBACK_HOURS,
};
use reqwest::{Client, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use slog::{debug, o, Drain, Level, Logger};
use std::{env, time::Duration};

use crate::catalog::{FetchError, RemoteSource};
use crate::settings::{ExtractionSettings, SentinelPolicy, TieBreak};

/// A location given as `name:latitude:longitude` or as a `[[locations]]`
/// table in the config file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Parses `name:latitude:longitude`. The name itself may contain colons.
pub fn parse_location(value: &str) -> Result<LocationConfig, String> {
    let mut parts = value.rsplitn(3, ':');
    let (Some(longitude), Some(latitude), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected name:latitude:longitude, got {}", value));
    };
    if name.is_empty() {
        return Err(format!("location name missing in {}", value));
    }
    let latitude = latitude
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid latitude {}: {}", latitude, e))?;
    let longitude = longitude
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid longitude {}: {}", longitude, e))?;
    Ok(LocationConfig {
        name: name.to_string(),
        latitude,
        longitude,
    })
}

#[derive(Parser, Clone, Debug, Deserialize, Default)]
#[command(
    author,
    version,
    about = "DWD Radiation Daemon - Extracts satellite global radiation for named locations"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $RADIATION_DAEMON_CONFIG, ./daemon.toml,
    /// $XDG_CONFIG_HOME/dwd-radiation/daemon.toml, /etc/dwd-radiation/daemon.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "RADIATION_DAEMON_LEVEL")]
    pub level: Option<String>,

    /// Directory on the open-data server holding the SIS files
    #[arg(short, long, env = "RADIATION_DAEMON_BASE_URL")]
    pub base_url: Option<String>,

    /// HTTP User-Agent header for open-data requests
    #[arg(short, long, env = "RADIATION_DAEMON_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Timeout of a single file request in seconds
    #[arg(short, long, env = "RADIATION_DAEMON_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Seconds between fetch cycles (a measurement slot is 15 minutes)
    #[arg(short, long, env = "RADIATION_DAEMON_INTERVAL")]
    pub interval: Option<u64>,

    /// Hours of measurements fetched per cycle
    #[arg(long, env = "RADIATION_DAEMON_LOOKBACK_HOURS")]
    pub lookback_hours: Option<u32>,

    /// Hourly forecast issuances tried before a forecast run fails
    #[arg(long, env = "RADIATION_DAEMON_FORECAST_HOURS_BACK")]
    pub forecast_hours_back: Option<u32>,

    /// Name of the irradiance variable in the grid files
    #[arg(long, env = "RADIATION_DAEMON_VARIABLE")]
    pub variable: Option<String>,

    /// Treatment of fill values: nan, passthrough, skip
    #[arg(short, long, value_enum, env = "RADIATION_DAEMON_SENTINEL")]
    pub sentinel: Option<SentinelPolicy>,

    /// Winner between equidistant grid cells: first-index, last-index
    #[arg(long, value_enum, env = "RADIATION_DAEMON_TIE_BREAK")]
    pub tie_break: Option<TieBreak>,

    /// Check measurement files against the directory listing before download
    #[arg(long, env = "RADIATION_DAEMON_DIRECTORY_INDEX")]
    pub directory_index: Option<bool>,

    /// Results kept per location and feed (unbounded if unset)
    #[arg(long, env = "RADIATION_DAEMON_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// Location to track, repeatable
    #[arg(long = "location", value_name = "NAME:LAT:LON", value_parser = parse_location)]
    #[serde(default)]
    pub locations: Vec<LocationConfig>,

    /// Print the whole state as JSON after every cycle
    #[arg(long, env = "RADIATION_DAEMON_JSON")]
    #[serde(default)]
    pub json: bool,
}

impl Cli {
    /// Get the effective configuration value with defaults
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("dwd-radiation-daemon/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(60))
    }

    pub fn interval(&self) -> u64 {
        self.interval.unwrap_or(DEFAULT_FETCH_INTERVAL)
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break.unwrap_or_default()
    }

    pub fn settings(&self) -> ExtractionSettings {
        let defaults = ExtractionSettings::default();
        ExtractionSettings {
            variable: self.variable.clone().unwrap_or(defaults.variable),
            lookback: time::Duration::hours(
                self.lookback_hours.unwrap_or(DEFAULT_LOOKBACK_HOURS) as i64,
            ),
            forecast_hours_back: self
                .forecast_hours_back
                .unwrap_or(DEFAULT_FORECAST_HOURS_BACK),
            sentinel: self.sentinel.unwrap_or(defaults.sentinel),
            coverage: defaults.coverage,
            use_directory_index: self
                .directory_index
                .unwrap_or(defaults.use_directory_index),
            history_limit: self.history_limit,
        }
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("RADIATION_DAEMON_CONFIG", "daemon.toml")
    };

    let file_config: Cli = load_config(&source).unwrap_or_default();
    merge(cli_args, file_config)
}

/// CLI args override file config (env vars are handled by clap). Locations
/// given on the command line replace the configured ones.
fn merge(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        base_url: cli_args.base_url.or(file_config.base_url),
        user_agent: cli_args.user_agent.or(file_config.user_agent),
        timeout: cli_args.timeout.or(file_config.timeout),
        interval: cli_args.interval.or(file_config.interval),
        lookback_hours: cli_args.lookback_hours.or(file_config.lookback_hours),
        forecast_hours_back: cli_args
            .forecast_hours_back
            .or(file_config.forecast_hours_back),
        variable: cli_args.variable.or(file_config.variable),
        sentinel: cli_args.sentinel.or(file_config.sentinel),
        tie_break: cli_args.tie_break.or(file_config.tie_break),
        directory_index: cli_args.directory_index.or(file_config.directory_index),
        history_limit: cli_args.history_limit.or(file_config.history_limit),
        locations: if cli_args.locations.is_empty() {
            file_config.locations
        } else {
            cli_args.locations
        },
        json: cli_args.json || file_config.json,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

/// Grid files over HTTPS, retried with exponential backoff.
pub struct HttpSource {
    logger: Logger,
    base_url: String,
    client: ClientWithMiddleware,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(
        logger: Logger,
        base_url: String,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<HttpSource, Error> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| anyhow!("error building http client: {}", e))?;
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            logger,
            base_url,
            client,
            timeout,
        })
    }

    /// URL of a file in the feed directory; `+` in forecast names is encoded.
    pub fn file_url(&self, file: &str) -> String {
        format!("{}/{}", self.index_url(), file.replace('+', "%2B"))
    }

    pub fn index_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        debug!(self.logger, "requesting: {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, file: &str) -> Result<Bytes, FetchError> {
        let url = self.file_url(file);
        let response = self.get(&url).await?;
        response.bytes().await.map_err(|e| FetchError::Body {
            url,
            reason: e.to_string(),
        })
    }

    async fn directory_index(&self) -> Result<String, FetchError> {
        let url = format!("{}/", self.index_url());
        let response = self.get(&url).await?;
        response.text().await.map_err(|e| FetchError::Body {
            url,
            reason: e.to_string(),
        })
    }
}
