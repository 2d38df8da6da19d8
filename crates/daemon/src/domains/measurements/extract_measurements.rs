use slog::{info, warn, Logger};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::catalog::{FeedKind, FileCatalog, FileError, NothingRetrieved};
use crate::domains::{apply_sentinel, decode_all, DecodedFile, Retrieval};
use crate::grid::GeometryKey;
use crate::grid_cache::DecodedFileCache;
use crate::models::{Location, MeasurementEntry, MeasurementResult};
use crate::netcdf::{DecodedGrid, GridDecoder};
use crate::resolver::{NearestPointResolver, ResolveError, ResolvedIndex};
use crate::settings::SentinelPolicy;
use crate::time_window::SLOT;

pub struct MeasurementService {
    pub catalog: Arc<FileCatalog>,
    pub logger: Logger,
    decoder: GridDecoder,
    use_directory_index: bool,
}

impl MeasurementService {
    pub fn new(
        logger: Logger,
        catalog: Arc<FileCatalog>,
        decoder: GridDecoder,
        use_directory_index: bool,
    ) -> Self {
        MeasurementService {
            catalog,
            logger,
            decoder,
            use_directory_index,
        }
    }

    /// Gets a decoded grid for every slot of `window` it can. Files already
    /// in `cache` are not fetched again.
    pub async fn retrieve(&self, window: &[OffsetDateTime], cache: &DecodedFileCache) -> Retrieval {
        let required = self
            .catalog
            .list_required_files(FeedKind::Measurement, window);
        let missing: Vec<_> = required
            .iter()
            .filter(|file| !cache.contains(&file.name))
            .cloned()
            .collect();
        info!(
            self.logger,
            "measurement window needs {} files, {} not decoded yet",
            required.len(),
            missing.len()
        );

        let published = if self.use_directory_index && !missing.is_empty() {
            self.catalog.published_files().await
        } else {
            None
        };
        let outcome = match self.catalog.fetch_all(missing, published.as_ref()).await {
            Ok(outcome) => outcome,
            Err(NothingRetrieved(outcome)) => {
                warn!(self.logger, "no measurement file could be retrieved");
                outcome
            }
        };

        let (fresh, decode_failures) =
            decode_all(&self.logger, &self.decoder, outcome.retrieved).await;
        let mut fresh: HashMap<String, Arc<DecodedGrid>> = fresh
            .into_iter()
            .map(|decoded| (decoded.file.name, decoded.grid))
            .collect();

        let mut decoded = Vec::with_capacity(required.len());
        for file in &required {
            let grid = cache.get(&file.name).or_else(|| fresh.remove(&file.name));
            if let Some(grid) = grid {
                decoded.push(DecodedFile {
                    file: file.clone(),
                    grid,
                });
            }
        }

        let mut failures: Vec<_> = outcome
            .failed
            .into_iter()
            .map(|(file, err)| (file, FileError::from(err)))
            .collect();
        failures.extend(decode_failures);

        Retrieval {
            decoded,
            failures,
            attempted: required.len(),
        }
    }
}

/// Values at the location's nearest cell in every file, most recent first.
/// The nearest cell is resolved once per distinct geometry.
pub fn measurement_result(
    location: &Location,
    files: &[DecodedFile],
    resolver: &NearestPointResolver,
    sentinel: SentinelPolicy,
) -> Result<MeasurementResult, ResolveError> {
    let mut by_geometry: HashMap<GeometryKey, ResolvedIndex> = HashMap::new();
    let mut newest: Option<ResolvedIndex> = None;
    let mut entries = Vec::new();

    for decoded in files.iter().rev() {
        let grid = &decoded.grid;
        let index = match by_geometry.get(&grid.geometry.key()) {
            Some(index) => *index,
            None => {
                let index = resolver.resolve(location, &grid.geometry)?;
                by_geometry.insert(grid.geometry.key(), index);
                index
            }
        };
        newest.get_or_insert(index);

        let slot = decoded.file.valid_at.unix_timestamp();
        for step in 0..grid.field.steps {
            let Some(sample) = grid.field.sample(step, index.index) else {
                continue;
            };
            let Some(sis) = apply_sentinel(sample, sentinel) else {
                continue;
            };
            let timestamp = grid
                .time_of(step)
                .unwrap_or(slot + step as i64 * SLOT.whole_seconds());
            entries.push(MeasurementEntry { timestamp, sis });
        }
    }

    // newest file wins when two files carry the same timestamp
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.timestamp));
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let resolved = newest.ok_or(ResolveError::EmptyGeometry)?;
    Ok(MeasurementResult { resolved, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FetchError, MockRemoteSource, RemoteFile};
    use bytes::Bytes;
    use mockall::predicate::eq;
    use radiation_test_utils::{gradient_values, measurement_file, GridSpec, SIS_FILL};
    use time::macros::datetime;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn decoded(shape: &GridSpec, slot: OffsetDateTime, values: &[f32]) -> DecodedFile {
        let bytes = measurement_file(shape, slot, values);
        DecodedFile {
            file: RemoteFile::measurement(slot),
            grid: Arc::new(GridDecoder::new("SIS").decode(&bytes).unwrap()),
        }
    }

    #[test]
    fn entries_are_most_recent_first() {
        let shape = GridSpec::new(52.4, 13.3, 0.05, 4, 4);
        let files = vec![
            decoded(&shape, datetime!(2024-05-14 20:15 UTC), &gradient_values(&shape)),
            decoded(&shape, datetime!(2024-05-14 20:30 UTC), &gradient_values(&shape)),
        ];
        let resolver = NearestPointResolver::default();
        let location = Location::new("berlin", 52.52, 13.405);

        let result =
            measurement_result(&location, &files, &resolver, SentinelPolicy::Nan).unwrap();
        assert_eq!(
            result.entries.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![
                datetime!(2024-05-14 20:30 UTC).unix_timestamp(),
                datetime!(2024-05-14 20:15 UTC).unix_timestamp()
            ]
        );
        // (52.5, 13.4) is row 2, column 2
        assert_eq!(result.resolved.index, shape.index(2, 2));
        assert_eq!(result.latest().map(|e| e.sis), Some(202.0));
        // both files share a geometry
        assert_eq!(resolver.cached_entries(), 1);
    }

    #[test]
    fn fill_values_follow_the_sentinel_policy() {
        let shape = GridSpec::new(52.4, 13.3, 0.05, 4, 4);
        let mut values = gradient_values(&shape);
        values[shape.index(2, 2)] = SIS_FILL;
        let files = vec![decoded(&shape, datetime!(2024-05-14 20:30 UTC), &values)];
        let resolver = NearestPointResolver::default();
        let location = Location::new("berlin", 52.52, 13.405);

        let nan = measurement_result(&location, &files, &resolver, SentinelPolicy::Nan).unwrap();
        assert!(nan.entries[0].sis.is_nan());
        let raw =
            measurement_result(&location, &files, &resolver, SentinelPolicy::Passthrough).unwrap();
        assert_eq!(raw.entries[0].sis, SIS_FILL as f64);
        let skipped =
            measurement_result(&location, &files, &resolver, SentinelPolicy::Skip).unwrap();
        assert!(skipped.entries.is_empty());
    }

    #[test]
    fn no_files_cannot_resolve() {
        let resolver = NearestPointResolver::default();
        let location = Location::new("berlin", 52.52, 13.405);
        assert_eq!(
            measurement_result(&location, &[], &resolver, SentinelPolicy::Nan),
            Err(ResolveError::EmptyGeometry)
        );
    }

    #[tokio::test]
    async fn cached_files_are_not_fetched_again() {
        let shape = GridSpec::new(52.4, 13.3, 0.05, 4, 4);
        let cached_slot = datetime!(2024-05-14 20:15 UTC);
        let fresh_slot = datetime!(2024-05-14 20:30 UTC);
        let fresh_bytes = measurement_file(&shape, fresh_slot, &gradient_values(&shape));

        let mut source = MockRemoteSource::new();
        source
            .expect_fetch()
            .with(eq("SISin202405142030DEv3.nc"))
            .times(1)
            .returning(move |_| Ok(Bytes::from(fresh_bytes.clone())));
        let catalog = Arc::new(FileCatalog::new(logger(), Arc::new(source)));
        let service = MeasurementService::new(logger(), catalog, GridDecoder::new("SIS"), false);

        let mut cache = DecodedFileCache::default();
        let cached = decoded(&shape, cached_slot, &gradient_values(&shape));
        cache.insert(cached.file.name.clone(), cached.grid);

        let retrieval = service.retrieve(&[cached_slot, fresh_slot], &cache).await;
        assert_eq!(retrieval.attempted, 2);
        assert!(retrieval.failures.is_empty());
        assert_eq!(
            retrieval
                .decoded
                .iter()
                .map(|d| d.file.valid_at)
                .collect::<Vec<_>>(),
            vec![cached_slot, fresh_slot]
        );
    }

    #[tokio::test]
    async fn failures_are_kept_per_file() {
        let mut source = MockRemoteSource::new();
        source.expect_directory_index().returning(|| {
            Ok(r#"<a href="SISin202405142030DEv3.nc">SISin202405142030DEv3.nc</a>"#.to_string())
        });
        source
            .expect_fetch()
            .with(eq("SISin202405142030DEv3.nc"))
            .returning(|name| {
                Err(FetchError::Request {
                    url: name.to_string(),
                    reason: "connection reset".to_string(),
                })
            });
        let catalog = Arc::new(FileCatalog::new(logger(), Arc::new(source)));
        let service = MeasurementService::new(logger(), catalog, GridDecoder::new("SIS"), true);

        let retrieval = service
            .retrieve(
                &[
                    datetime!(2024-05-14 20:15 UTC),
                    datetime!(2024-05-14 20:30 UTC),
                ],
                &DecodedFileCache::default(),
            )
            .await;
        assert!(retrieval.decoded.is_empty());
        assert_eq!(retrieval.failures.len(), 2);
        assert!(matches!(
            retrieval.failures[0].1,
            FileError::Fetch(FetchError::NotPublished(_))
        ));
        assert!(matches!(
            retrieval.failures[1].1,
            FileError::Fetch(FetchError::Request { .. })
        ));
    }
}
