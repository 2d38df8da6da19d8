//! Decoding of SIS grid files into flattened grids.
//!
//! Payloads are sniffed for the NetCDF classic (CDF-1/2/5) or NetCDF-4/HDF5
//! signature and opened through libnetcdf as a [`NativeFile`]. The decoder
//! itself only talks to [`GridDataset`].

mod native;

pub use native::NativeFile;

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use time::{macros::format_description, Date, Month, PrimitiveDateTime, Time};

use crate::grid::{GridGeometry, GridLayout};

const CLASSIC_MAGIC: &[u8] = b"CDF";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
/// Upper bound on the values read from one HDF5 variable. Chunked data may
/// be compressed, so the payload size alone does not bound it.
pub const MAX_HDF5_VALUES: usize = 1 << 26;
const LATITUDE_NAMES: [&str; 2] = ["lat", "latitude"];
const LONGITUDE_NAMES: [&str; 2] = ["lon", "longitude"];
const METADATA_KEYS: [&str; 3] = ["standard_name", "long_name", "units"];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload is not a recognizable grid file")]
    NotAGridFile,
    #[error("invalid grid file: {0}")]
    InvalidFormat(String),
    #[error("missing coordinate: {0}")]
    MissingCoordinate(String),
    #[error("missing variable: {0}")]
    MissingVariable(String),
    #[error("variable {variable} holds {found} values, grid needs {expected}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        found: usize,
    },
    #[error("{variable} declares more than {limit} values")]
    Oversized { variable: String, limit: usize },
    #[error("unparseable time units: {0}")]
    TimeUnits(String),
}

/// Value of a NetCDF attribute. Numeric attributes of any type are widened to
/// `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(text) => Some(text),
            AttrValue::Numbers(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Numbers(values) => values.first().copied(),
            AttrValue::Text(_) => None,
        }
    }
}

/// Read access to a self-describing gridded file.
pub trait GridDataset {
    fn global_attribute(&self, name: &str) -> Option<AttrValue>;
    /// Names and lengths of a variable's dimensions, `None` when the variable
    /// does not exist.
    fn dimensions_of(&self, variable: &str) -> Option<Vec<(String, usize)>>;
    fn attribute(&self, variable: &str, name: &str) -> Option<AttrValue>;
    /// All values of a variable in storage order.
    fn values(&self, variable: &str) -> Result<Vec<f64>, DecodeError>;
}

/// One cell of one time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Unpacked physical value
    Value(f64),
    /// Cell flagged by `_FillValue`/`missing_value` (or NaN), carrying the raw
    /// stored value
    Missing(f64),
}

/// The irradiance variable of a file, latitude-major per time step.
#[derive(Debug, Clone, PartialEq)]
pub struct GridField {
    pub name: String,
    pub steps: usize,
    pub cells: usize,
    raw: Vec<f32>,
    scale_factor: f64,
    add_offset: f64,
    fill_values: Vec<f32>,
}

impl GridField {
    pub fn sample(&self, step: usize, cell: usize) -> Option<Sample> {
        if step >= self.steps || cell >= self.cells {
            return None;
        }
        let raw = *self.raw.get(step * self.cells + cell)?;
        if raw.is_nan() || self.fill_values.contains(&raw) {
            return Some(Sample::Missing(raw as f64));
        }
        Some(Sample::Value(raw as f64 * self.scale_factor + self.add_offset))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    /// `standard_name`, `long_name` and `units` of the variable when present
    pub variable: BTreeMap<String, String>,
    pub history: Option<String>,
    /// Timestamp found in the history attribute (forecast issuance or
    /// measurement processing time)
    pub issued_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedGrid {
    pub geometry: Arc<GridGeometry>,
    pub field: GridField,
    /// Epoch seconds of each time step; empty when the file has no usable
    /// time coordinate
    pub times: Vec<i64>,
    pub metadata: FileMetadata,
}

impl DecodedGrid {
    pub fn time_of(&self, step: usize) -> Option<i64> {
        self.times.get(step).copied()
    }
}

enum Spatial {
    /// 1D axes on distinct dimensions
    Axes { lat_dim: String, lon_dim: String },
    /// Coordinates on the same dimension(s) as the cells
    Cells { dims: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct GridDecoder {
    variable: String,
}

impl GridDecoder {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedGrid, DecodeError> {
        // classic files store every value uncompressed, one byte at least
        let limit = if bytes.starts_with(CLASSIC_MAGIC) {
            bytes.len()
        } else if bytes.starts_with(HDF5_MAGIC) {
            MAX_HDF5_VALUES
        } else {
            return Err(DecodeError::NotAGridFile);
        };
        let file = NativeFile::from_bytes(bytes)?;
        self.decode_dataset(&file, limit)
    }

    /// Decodes an opened dataset. No variable declaring more than `limit`
    /// values is read.
    pub fn decode_dataset(
        &self,
        dataset: &dyn GridDataset,
        limit: usize,
    ) -> Result<DecodedGrid, DecodeError> {
        let (lat_name, lat_dims) = find_coordinate(dataset, &LATITUDE_NAMES)
            .ok_or_else(|| DecodeError::MissingCoordinate("latitude".to_string()))?;
        let (lon_name, lon_dims) = find_coordinate(dataset, &LONGITUDE_NAMES)
            .ok_or_else(|| DecodeError::MissingCoordinate("longitude".to_string()))?;
        let var_dims = dataset
            .dimensions_of(&self.variable)
            .ok_or_else(|| DecodeError::MissingVariable(self.variable.clone()))?;
        check_size(lat_name, &lat_dims, limit)?;
        check_size(lon_name, &lon_dims, limit)?;
        check_size(&self.variable, &var_dims, limit)?;

        let lats = dataset.values(lat_name)?;
        let lons = dataset.values(lon_name)?;

        let lat_dim_names: Vec<String> = lat_dims.iter().map(|(n, _)| n.clone()).collect();
        let lon_dim_names: Vec<String> = lon_dims.iter().map(|(n, _)| n.clone()).collect();
        let spatial = match (lat_dim_names.as_slice(), lon_dim_names.as_slice()) {
            ([lat], [lon]) if lat != lon => Spatial::Axes {
                lat_dim: lat.clone(),
                lon_dim: lon.clone(),
            },
            (lat, lon) if lat == lon && !lat.is_empty() && lat.len() <= 2 => Spatial::Cells {
                dims: lat.to_vec(),
            },
            _ => {
                return Err(DecodeError::InvalidFormat(format!(
                    "coordinates {}{:?} and {}{:?} do not describe a grid",
                    lat_name, lat_dim_names, lon_name, lon_dim_names
                )))
            }
        };

        let names: Vec<&str> = var_dims.iter().map(|(n, _)| n.as_str()).collect();
        let (geometry, trailing, transposed) = match &spatial {
            Spatial::Axes { lat_dim, lon_dim } => {
                let transposed = match names.as_slice() {
                    [.., a, b] if *a == lat_dim.as_str() && *b == lon_dim.as_str() => false,
                    [.., a, b] if *a == lon_dim.as_str() && *b == lat_dim.as_str() => true,
                    _ => {
                        return Err(DecodeError::InvalidFormat(format!(
                            "{} is not laid out on ({}, {})",
                            self.variable, lat_dim, lon_dim
                        )))
                    }
                };
                (GridGeometry::from_axes(&lats, &lons), 2, transposed)
            }
            Spatial::Cells { dims } => {
                if names.len() < dims.len() || names[names.len() - dims.len()..] != dims[..] {
                    return Err(DecodeError::InvalidFormat(format!(
                        "{} is not laid out on {:?}",
                        self.variable, dims
                    )));
                }
                if lats.len() != lons.len() {
                    return Err(DecodeError::ShapeMismatch {
                        variable: lon_name.to_string(),
                        expected: lats.len(),
                        found: lons.len(),
                    });
                }
                let layout = match lat_dims.as_slice() {
                    [(_, rows), (_, cols)] => GridLayout::Curvilinear {
                        rows: *rows,
                        cols: *cols,
                    },
                    _ => GridLayout::Flat,
                };
                (
                    GridGeometry::from_cells(lats, lons, layout),
                    dims.len(),
                    false,
                )
            }
        };

        let cells = geometry.len();
        let steps: usize = var_dims[..var_dims.len() - trailing]
            .iter()
            .map(|(_, len)| *len)
            .product();
        let stored = dataset.values(&self.variable)?;
        if stored.len() != steps * cells {
            return Err(DecodeError::ShapeMismatch {
                variable: self.variable.clone(),
                expected: steps * cells,
                found: stored.len(),
            });
        }
        let raw = if transposed {
            transpose_steps(&stored, steps, &geometry)
        } else {
            stored.iter().map(|v| *v as f32).collect()
        };

        let number = |name: &str| dataset.attribute(&self.variable, name)?.as_number();
        let fill_values = ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|name| number(name))
            .map(|v| v as f32)
            .collect();
        let field = GridField {
            name: self.variable.clone(),
            steps,
            cells,
            raw,
            scale_factor: number("scale_factor").unwrap_or(1.0),
            add_offset: number("add_offset").unwrap_or(0.0),
            fill_values,
        };

        Ok(DecodedGrid {
            geometry: Arc::new(geometry),
            field,
            times: read_times(dataset, limit)?,
            metadata: self.read_metadata(dataset),
        })
    }

    fn read_metadata(&self, dataset: &dyn GridDataset) -> FileMetadata {
        let variable = METADATA_KEYS
            .iter()
            .filter_map(|key| {
                let value = dataset.attribute(&self.variable, key)?;
                Some((key.to_string(), value.as_text()?.to_string()))
            })
            .collect();
        let history = dataset
            .global_attribute("history")
            .and_then(|v| v.as_text().map(str::to_string));
        let issued_at = history.as_deref().and_then(history_timestamp);
        FileMetadata {
            variable,
            history,
            issued_at,
        }
    }
}

/// Element count of a variable, rejected before anything is allocated when
/// it overflows or exceeds `limit`.
fn check_size(
    variable: &str,
    dims: &[(String, usize)],
    limit: usize,
) -> Result<usize, DecodeError> {
    dims.iter()
        .try_fold(1usize, |count, (_, len)| count.checked_mul(*len))
        .filter(|count| *count <= limit)
        .ok_or_else(|| DecodeError::Oversized {
            variable: variable.to_string(),
            limit,
        })
}

fn find_coordinate<'a>(
    dataset: &dyn GridDataset,
    candidates: &[&'a str],
) -> Option<(&'a str, Vec<(String, usize)>)> {
    candidates
        .iter()
        .find_map(|name| Some((*name, dataset.dimensions_of(name)?)))
}

/// Reorders `(step, lon, lat)` storage into latitude-major cells.
fn transpose_steps(stored: &[f64], steps: usize, geometry: &GridGeometry) -> Vec<f32> {
    let (rows, cols) = match geometry.layout() {
        GridLayout::Regular { rows, cols } => (rows, cols),
        _ => return stored.iter().map(|v| *v as f32).collect(),
    };
    let mut out = Vec::with_capacity(stored.len());
    for step in 0..steps {
        let base = step * rows * cols;
        for row in 0..rows {
            for col in 0..cols {
                out.push(stored[base + col * rows + row] as f32);
            }
        }
    }
    out
}

fn read_times(dataset: &dyn GridDataset, limit: usize) -> Result<Vec<i64>, DecodeError> {
    let Some(dims) = dataset.dimensions_of("time") else {
        return Ok(Vec::new());
    };
    check_size("time", &dims, limit)?;
    let units = match dataset.attribute("time", "units") {
        Some(AttrValue::Text(units)) => units,
        _ => return Ok(Vec::new()),
    };
    let (unit_seconds, origin) = parse_time_units(&units)?;
    Ok(dataset
        .values("time")?
        .iter()
        .map(|v| origin + (v * unit_seconds as f64).round() as i64)
        .collect())
}

static TIME_UNITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(seconds?|secs?|s|minutes?|mins?|hours?|hrs?|h|days?|d)\s+since\s+(\d{4})-(\d{1,2})-(\d{1,2})(?:[ T](\d{1,2}):(\d{1,2})(?::(\d{1,2})(?:\.\d+)?)?)?\s*(?:Z|UTC|[+-]00:?00)?\s*$",
    )
    .expect("valid time units regex")
});

/// Parses CF `<unit> since <date>` into (seconds per unit, origin epoch
/// seconds).
pub fn parse_time_units(units: &str) -> Result<(i64, i64), DecodeError> {
    let bad = || DecodeError::TimeUnits(units.to_string());
    let caps = TIME_UNITS_RE.captures(units).ok_or_else(bad)?;
    let unit_seconds = match &caps[1] {
        u if u.starts_with('s') => 1,
        u if u.starts_with('m') => 60,
        u if u.starts_with('h') => 3600,
        _ => 86_400,
    };
    let number = |i: usize| -> Result<u32, DecodeError> {
        caps.get(i)
            .map_or(Ok(0), |m| m.as_str().parse::<u32>().map_err(|_| bad()))
    };
    let year = caps[2].parse::<i32>().map_err(|_| bad())?;
    let month = Month::try_from(number(3)? as u8).map_err(|_| bad())?;
    let date = Date::from_calendar_date(year, month, number(4)? as u8).map_err(|_| bad())?;
    let time =
        Time::from_hms(number(5)? as u8, number(6)? as u8, number(7)? as u8).map_err(|_| bad())?;
    let origin = PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp();
    Ok((unit_seconds, origin))
}

static FORECAST_HISTORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2},\d{2}:\d{2}").expect("valid history regex"));

static MEASUREMENT_HISTORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]{2} \d{2} \d{2}:\d{2}:\d{2} \d{4}\b").expect("valid history regex")
});

/// Timestamp embedded in a `history` attribute. Forecast files carry
/// `2024-05-14,20:25`, measurement files a ctime-like `May 27 16:03:17 2024`.
pub fn history_timestamp(history: &str) -> Option<i64> {
    if let Some(found) = FORECAST_HISTORY_RE.find(history) {
        let format = format_description!("[year]-[month]-[day],[hour]:[minute]");
        if let Ok(parsed) = PrimitiveDateTime::parse(found.as_str(), format) {
            return Some(parsed.assume_utc().unix_timestamp());
        }
    }
    let found = MEASUREMENT_HISTORY_RE.find(history)?;
    let format =
        format_description!("[month repr:short] [day] [hour]:[minute]:[second] [year]");
    PrimitiveDateTime::parse(found.as_str(), format)
        .ok()
        .map(|parsed| parsed.assume_utc().unix_timestamp())
}
