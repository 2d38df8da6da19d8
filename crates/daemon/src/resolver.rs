//! Nearest grid cell lookup with a process-wide cache.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::grid::{GeometryKey, GridGeometry};
use crate::models::Location;
use crate::settings::TieBreak;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("grid geometry has no cells")]
    EmptyGeometry,
    #[error("grid geometry {0} has no cell with finite coordinates")]
    NoFiniteCell(GeometryKey),
}

/// Closest grid cell to a location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedIndex {
    /// Flattened index into the geometry
    pub index: usize,
    pub grid_latitude: f64,
    pub grid_longitude: f64,
    pub distance_km: f64,
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// A location is identified by its name and exact coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LocationKey {
    name: String,
    latitude: u64,
    longitude: u64,
}

impl LocationKey {
    fn of(location: &Location) -> Self {
        Self {
            name: location.name.clone(),
            latitude: location.latitude.to_bits(),
            longitude: location.longitude.to_bits(),
        }
    }
}

/// Exhaustive haversine search, cached per (location, geometry). The cache
/// is only written on a miss; concurrent misses for the same key compute the
/// same answer and the first insert wins.
#[derive(Debug, Default)]
pub struct NearestPointResolver {
    tie_break: TieBreak,
    cache: RwLock<HashMap<(LocationKey, GeometryKey), ResolvedIndex>>,
    evaluations: AtomicU64,
}

impl NearestPointResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self {
            tie_break,
            ..Default::default()
        }
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn resolve(
        &self,
        location: &Location,
        geometry: &GridGeometry,
    ) -> Result<ResolvedIndex, ResolveError> {
        let key = (LocationKey::of(location), geometry.key());
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*hit);
        }

        let resolved = self.nearest(location.latitude, location.longitude, geometry)?;
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(*cache.entry(key).or_insert(resolved))
    }

    /// Uncached scan over every cell. Cells with non-finite coordinates are
    /// ignored.
    pub fn nearest(
        &self,
        latitude: f64,
        longitude: f64,
        geometry: &GridGeometry,
    ) -> Result<ResolvedIndex, ResolveError> {
        if geometry.is_empty() {
            return Err(ResolveError::EmptyGeometry);
        }

        let mut best: Option<ResolvedIndex> = None;
        let mut evaluated = 0u64;
        for (index, (lat, lon)) in geometry.cells().enumerate() {
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }
            evaluated += 1;
            let distance_km = haversine_km(latitude, longitude, lat, lon);
            let better = match (&best, self.tie_break) {
                (None, _) => true,
                (Some(current), TieBreak::FirstIndex) => distance_km < current.distance_km,
                (Some(current), TieBreak::LastIndex) => distance_km <= current.distance_km,
            };
            if better {
                best = Some(ResolvedIndex {
                    index,
                    grid_latitude: lat,
                    grid_longitude: lon,
                    distance_km,
                });
            }
        }
        self.evaluations.fetch_add(evaluated, Ordering::Relaxed);

        best.ok_or(ResolveError::NoFiniteCell(geometry.key()))
    }

    /// Number of distance computations performed so far.
    pub fn distance_evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
