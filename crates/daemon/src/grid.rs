use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a grid geometry, derived from its shape and every coordinate.
/// Two files on the same grid produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GeometryKey(u64);

impl fmt::Display for GeometryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How the native grid was laid out before flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLayout {
    /// 1D latitude and longitude axes, flattened latitude-major
    Regular { rows: usize, cols: usize },
    /// 2D latitude/longitude arrays, flattened row-major
    Curvilinear { rows: usize, cols: usize },
    /// Coordinates already stored per cell
    Flat,
}

/// Flattened coordinates of every grid cell. Index `i` of `latitudes` and
/// `longitudes` describes the same cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridGeometry {
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    layout: GridLayout,
    resolution: String,
    key: GeometryKey,
}

impl GridGeometry {
    /// Builds the cell list of a regular grid from its axes. Cell
    /// `row * lons.len() + col` sits at `(lats[row], lons[col])`.
    pub fn from_axes(lats: &[f64], lons: &[f64]) -> Self {
        let mut latitudes = Vec::with_capacity(lats.len() * lons.len());
        let mut longitudes = Vec::with_capacity(lats.len() * lons.len());
        for lat in lats {
            for lon in lons {
                latitudes.push(*lat);
                longitudes.push(*lon);
            }
        }
        let layout = GridLayout::Regular {
            rows: lats.len(),
            cols: lons.len(),
        };
        let resolution = match (axis_step(lats), axis_step(lons)) {
            (Some(dlat), Some(dlon)) => format!("{:.3}x{:.3}", dlat, dlon),
            _ => format!("{}x{}", lats.len(), lons.len()),
        };
        Self::assemble(latitudes, longitudes, layout, resolution)
    }

    /// Wraps per-cell coordinates. Callers guarantee both vectors have the
    /// same length.
    pub fn from_cells(latitudes: Vec<f64>, longitudes: Vec<f64>, layout: GridLayout) -> Self {
        debug_assert_eq!(latitudes.len(), longitudes.len());
        let resolution = match layout {
            GridLayout::Curvilinear { rows, cols } => format!("{}x{}", rows, cols),
            GridLayout::Regular { rows, cols } => format!("{}x{}", rows, cols),
            GridLayout::Flat => format!("{}-cells", latitudes.len()),
        };
        Self::assemble(latitudes, longitudes, layout, resolution)
    }

    fn assemble(
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        layout: GridLayout,
        resolution: String,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        latitudes.len().hash(&mut hasher);
        for value in latitudes.iter().chain(longitudes.iter()) {
            value.to_bits().hash(&mut hasher);
        }
        Self {
            latitudes,
            longitudes,
            layout,
            resolution,
            key: GeometryKey(hasher.finish()),
        }
    }

    pub fn len(&self) -> usize {
        self.latitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitudes.is_empty()
    }

    pub fn key(&self) -> GeometryKey {
        self.key
    }

    /// Human readable resolution, e.g. `0.050x0.050` for a regular grid.
    pub fn resolution(&self) -> &str {
        &self.resolution
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    /// `(latitude, longitude)` of a cell.
    pub fn cell(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.latitudes.get(index)?, *self.longitudes.get(index)?))
    }

    pub fn cells(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.latitudes
            .iter()
            .copied()
            .zip(self.longitudes.iter().copied())
    }
}

fn axis_step(axis: &[f64]) -> Option<f64> {
    match axis {
        [first, second, ..] => Some((second - first).abs()),
        _ => None,
    }
}
