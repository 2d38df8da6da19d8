//! Remote file naming and retrieval for the DWD SIS feed.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use slog::{debug, error, info, warn, Logger};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};
use time::{OffsetDateTime, UtcOffset};
use tokio::task::JoinSet;

use crate::netcdf::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Measurement,
    Forecast,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Measurement => write!(f, "measurement"),
            FeedKind::Forecast => write!(f, "forecast"),
        }
    }
}

/// Network side of a per-file failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request for {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read body of {url}: {reason}")]
    Body { url: String, reason: String },
    #[error("{0} is not listed in the directory index")]
    NotPublished(String),
    #[error("fetch task for {0} did not complete")]
    Aborted(String),
}

/// Why one required file contributed nothing to a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FileError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("decoding {0} did not complete")]
    DecodeAborted(String),
}

/// A file the feed publishes for one slot or issuance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    pub name: String,
    pub kind: FeedKind,
    /// Slot time for measurements, issuance time for forecasts
    pub valid_at: OffsetDateTime,
}

impl RemoteFile {
    pub fn measurement(slot: OffsetDateTime) -> Self {
        Self {
            name: measurement_file_name(slot),
            kind: FeedKind::Measurement,
            valid_at: slot,
        }
    }

    pub fn forecast(issuance: OffsetDateTime) -> Self {
        Self {
            name: forecast_file_name(issuance),
            kind: FeedKind::Forecast,
            valid_at: issuance,
        }
    }
}

/// `SISin202405142030DEv3.nc`
pub fn measurement_file_name(slot: OffsetDateTime) -> String {
    let t = slot.to_offset(UtcOffset::UTC);
    format!(
        "SISin{:04}{:02}{:02}{:02}{:02}DEv3.nc",
        t.year(),
        t.month() as u8,
        t.day(),
        t.hour(),
        t.minute()
    )
}

/// `SISfc2024051420_fc+18h-DE.nc`
pub fn forecast_file_name(issuance: OffsetDateTime) -> String {
    let t = issuance.to_offset(UtcOffset::UTC);
    format!(
        "SISfc{:04}{:02}{:02}{:02}_fc+18h-DE.nc",
        t.year(),
        t.month() as u8,
        t.day(),
        t.hour()
    )
}

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SIS(?:in\d{12}DEv3|fc\d{10}_fc\+18h-DE)\.nc").expect("valid index regex")
});

/// File names found in an HTML directory listing.
pub fn parse_directory_index(html: &str) -> HashSet<String> {
    INDEX_RE
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Where grid files come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Raw bytes of a published file.
    async fn fetch(&self, file: &str) -> Result<Bytes, FetchError>;
    /// HTML listing of the feed directory.
    async fn directory_index(&self) -> Result<String, FetchError>;
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Retrieved files in request order
    pub retrieved: Vec<(RemoteFile, Bytes)>,
    pub failed: Vec<(RemoteFile, FetchError)>,
}

#[derive(thiserror::Error, Debug)]
#[error("none of the {} requested files could be retrieved", .0.failed.len())]
pub struct NothingRetrieved(pub FetchOutcome);

pub struct FileCatalog {
    logger: Logger,
    source: Arc<dyn RemoteSource>,
}

impl FileCatalog {
    pub fn new(logger: Logger, source: Arc<dyn RemoteSource>) -> Self {
        Self { logger, source }
    }

    /// Files a run needs, one per timestamp, in the order given.
    pub fn list_required_files(
        &self,
        kind: FeedKind,
        timestamps: &[OffsetDateTime],
    ) -> Vec<RemoteFile> {
        timestamps
            .iter()
            .map(|t| match kind {
                FeedKind::Measurement => RemoteFile::measurement(*t),
                FeedKind::Forecast => RemoteFile::forecast(*t),
            })
            .collect()
    }

    /// Names currently listed by the feed, `None` when the listing could not
    /// be fetched.
    pub async fn published_files(&self) -> Option<HashSet<String>> {
        match self.source.directory_index().await {
            Ok(html) => {
                let names = parse_directory_index(&html);
                debug!(self.logger, "directory index lists {} files", names.len());
                Some(names)
            }
            Err(err) => {
                warn!(
                    self.logger,
                    "directory index unavailable, fetching files blindly: {}", err
                );
                None
            }
        }
    }

    pub async fn fetch(&self, file: &RemoteFile) -> Result<Bytes, FetchError> {
        debug!(self.logger, "fetching {}", file.name);
        self.source.fetch(&file.name).await
    }

    /// Fetches every file concurrently. Single failures are collected; the
    /// call only fails when files were requested and none arrived. Files
    /// missing from `published` are not requested.
    pub async fn fetch_all(
        &self,
        files: Vec<RemoteFile>,
        published: Option<&HashSet<String>>,
    ) -> Result<FetchOutcome, NothingRetrieved> {
        let requested = files.len();
        let mut results: Vec<Option<Result<Bytes, FetchError>>> = vec![None; requested];
        let mut set = JoinSet::new();

        for (position, file) in files.iter().enumerate() {
            if let Some(published) = published {
                if !published.contains(&file.name) {
                    results[position] = Some(Err(FetchError::NotPublished(file.name.clone())));
                    continue;
                }
            }
            let source = Arc::clone(&self.source);
            let name = file.name.clone();
            let logger = self.logger.clone();
            set.spawn(async move {
                debug!(logger, "fetching {}", name);
                (position, source.fetch(&name).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, result)) => results[position] = Some(result),
                Err(err) => error!(self.logger, "fetch task failed: {}", err),
            }
        }

        let mut outcome = FetchOutcome::default();
        for (file, result) in files.into_iter().zip(results) {
            match result {
                Some(Ok(bytes)) => outcome.retrieved.push((file, bytes)),
                Some(Err(err)) => {
                    warn!(self.logger, "skipping {}: {}", file.name, err);
                    outcome.failed.push((file, err));
                }
                None => {
                    let err = FetchError::Aborted(file.name.clone());
                    outcome.failed.push((file, err));
                }
            }
        }

        info!(
            self.logger,
            "retrieved {} of {} files",
            outcome.retrieved.len(),
            requested
        );
        if requested > 0 && outcome.retrieved.is_empty() {
            return Err(NothingRetrieved(outcome));
        }
        Ok(outcome)
    }
}
