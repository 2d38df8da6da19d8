use bytes::Bytes;
use slog::{error, warn, Logger};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::catalog::{FeedKind, FileError, RemoteFile};
use crate::health::{FileFailure, RunReport};
use crate::netcdf::{DecodedGrid, GridDecoder, Sample};
use crate::resolver::ResolveError;
use crate::settings::SentinelPolicy;

/// The only errors an extraction run returns. Per-file problems never get
/// here, they end up in the run report.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no {kind} file could be used, {} failed", failures.len())]
    TotalFetchFailure {
        kind: FeedKind,
        failures: Vec<FileFailure>,
    },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub file: RemoteFile,
    pub grid: Arc<DecodedGrid>,
}

/// Files a run could use and the ones it could not.
#[derive(Debug, Default)]
pub struct Retrieval {
    /// In the order the files were required
    pub decoded: Vec<DecodedFile>,
    pub failures: Vec<(RemoteFile, FileError)>,
    pub attempted: usize,
}

impl Retrieval {
    pub fn report(&self, completed_at: i64) -> RunReport {
        RunReport {
            attempted: self.attempted,
            decoded: self.decoded.len(),
            failures: self
                .failures
                .iter()
                .map(|(file, err)| FileFailure {
                    file: file.name.clone(),
                    error: err.to_string(),
                })
                .collect(),
            completed_at,
        }
    }
}

/// Decodes fetched payloads on the blocking pool, one task per file.
/// Results keep the order of `fetched`.
pub async fn decode_all(
    logger: &Logger,
    decoder: &GridDecoder,
    fetched: Vec<(RemoteFile, Bytes)>,
) -> (Vec<DecodedFile>, Vec<(RemoteFile, FileError)>) {
    let mut results: Vec<Option<Result<DecodedGrid, FileError>>> =
        fetched.iter().map(|_| None).collect();
    let mut set = JoinSet::new();
    for (position, (_, bytes)) in fetched.iter().enumerate() {
        let decoder = decoder.clone();
        let bytes = bytes.clone();
        set.spawn_blocking(move || (position, decoder.decode(&bytes)));
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((position, result)) => results[position] = Some(result.map_err(FileError::from)),
            Err(err) => error!(logger, "decode task failed: {}", err),
        }
    }

    let mut decoded = Vec::new();
    let mut failures = Vec::new();
    for ((file, _), result) in fetched.into_iter().zip(results) {
        match result {
            Some(Ok(grid)) => decoded.push(DecodedFile {
                file,
                grid: Arc::new(grid),
            }),
            Some(Err(err)) => {
                warn!(logger, "could not decode {}: {}", file.name, err);
                failures.push((file, err));
            }
            None => {
                let err = FileError::DecodeAborted(file.name.clone());
                failures.push((file, err));
            }
        }
    }
    (decoded, failures)
}

/// Value to record for a sample, `None` when the entry is dropped.
pub fn apply_sentinel(sample: Sample, policy: SentinelPolicy) -> Option<f64> {
    match (sample, policy) {
        (Sample::Value(value), _) => Some(value),
        (Sample::Missing(_), SentinelPolicy::Nan) => Some(f64::NAN),
        (Sample::Missing(raw), SentinelPolicy::Passthrough) => Some(raw),
        (Sample::Missing(_), SentinelPolicy::Skip) => None,
    }
}
