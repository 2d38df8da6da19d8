use slog::{debug, info, warn, Logger};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::catalog::{FileCatalog, FileError, RemoteFile};
use crate::domains::{apply_sentinel, decode_all, DecodedFile, Retrieval};
use crate::grid_cache::DecodedFileCache;
use crate::models::{ForecastEntry, ForecastResult, Location};
use crate::netcdf::GridDecoder;
use crate::resolver::{NearestPointResolver, ResolveError};
use crate::settings::SentinelPolicy;

/// Forecast steps are hourly.
const FORECAST_STEP_SECONDS: i64 = 3600;

pub struct ForecastService {
    pub catalog: Arc<FileCatalog>,
    pub logger: Logger,
    decoder: GridDecoder,
}

impl ForecastService {
    pub fn new(logger: Logger, catalog: Arc<FileCatalog>, decoder: GridDecoder) -> Self {
        ForecastService {
            catalog,
            logger,
            decoder,
        }
    }

    /// Tries `issuances` in order and stops at the first run that decodes.
    /// Every issuance tried before it counts as a failure.
    pub async fn retrieve(&self, issuances: &[OffsetDateTime], cache: &DecodedFileCache) -> Retrieval {
        let mut retrieval = Retrieval::default();

        for issuance in issuances {
            let file = RemoteFile::forecast(*issuance);
            retrieval.attempted += 1;

            if let Some(grid) = cache.get(&file.name) {
                debug!(self.logger, "using decoded {}", file.name);
                retrieval.decoded.push(DecodedFile { file, grid });
                break;
            }

            let bytes = match self.catalog.fetch(&file).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(self.logger, "forecast {} unavailable: {}", file.name, err);
                    retrieval.failures.push((file, FileError::from(err)));
                    continue;
                }
            };

            let (mut decoded, failures) =
                decode_all(&self.logger, &self.decoder, vec![(file, bytes)]).await;
            retrieval.failures.extend(failures);
            if let Some(decoded) = decoded.pop() {
                info!(self.logger, "using forecast {}", decoded.file.name);
                retrieval.decoded.push(decoded);
                break;
            }
        }

        retrieval
    }
}

/// Forecast at the location's nearest cell, ascending and starting at
/// `cutoff` (epoch seconds).
pub fn forecast_result(
    location: &Location,
    decoded: &DecodedFile,
    resolver: &NearestPointResolver,
    sentinel: SentinelPolicy,
    cutoff: i64,
) -> Result<ForecastResult, ResolveError> {
    let grid = &decoded.grid;
    let resolved = resolver.resolve(location, &grid.geometry)?;
    let issuance = decoded.file.valid_at.unix_timestamp();

    let mut entries = Vec::new();
    for step in 0..grid.field.steps {
        let timestamp = grid
            .time_of(step)
            .unwrap_or(issuance + step as i64 * FORECAST_STEP_SECONDS);
        if timestamp < cutoff {
            continue;
        }
        let Some(sis) = grid
            .field
            .sample(step, resolved.index)
            .and_then(|sample| apply_sentinel(sample, sentinel))
        else {
            continue;
        };
        entries.push(ForecastEntry { timestamp, sis });
    }
    entries.sort_by_key(|entry| entry.timestamp);
    entries.dedup_by_key(|entry| entry.timestamp);

    Ok(ForecastResult {
        resolved,
        issued_at: grid.metadata.issued_at.unwrap_or(issuance),
        metadata: grid.metadata.variable.clone(),
        entries,
    })
}
