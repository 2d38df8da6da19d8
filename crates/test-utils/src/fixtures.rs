//! SIS grid files shaped like the DWD satellite radiation feed.
//!
//! Measurement files carry one time step on a regular lat/lon grid, forecast
//! files carry hourly steps after their issuance. Values are `f32` W/m² with
//! [`SIS_FILL`] marking missing cells. Files are written with libnetcdf to a
//! temporary directory and returned as bytes.

use netcdf::{FileMut, VariableMut};
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

/// `_FillValue` written into the SIS variable.
pub const SIS_FILL: f32 = -999.0;

/// Regular grid starting at (`lat0`, `lon0`) with `step` degrees spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub lat0: f64,
    pub lon0: f64,
    pub step: f64,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(lat0: f64, lon0: f64, step: f64, rows: usize, cols: usize) -> Self {
        Self {
            lat0,
            lon0,
            step,
            rows,
            cols,
        }
    }

    pub fn latitudes(&self) -> Vec<f64> {
        (0..self.rows)
            .map(|r| round6(self.lat0 + r as f64 * self.step))
            .collect()
    }

    pub fn longitudes(&self) -> Vec<f64> {
        (0..self.cols)
            .map(|c| round6(self.lon0 + c as f64 * self.step))
            .collect()
    }

    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Flattened index of a cell, latitude-major.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Every cell holds `row * 100 + col`, which makes the picked cell obvious.
pub fn gradient_values(grid: &GridSpec) -> Vec<f32> {
    (0..grid.rows)
        .flat_map(|r| (0..grid.cols).map(move |c| (r * 100 + c) as f32))
        .collect()
}

pub fn uniform_values(grid: &GridSpec, value: f32) -> Vec<f32> {
    vec![value; grid.cells()]
}

/// History line as written by the measurement processing chain.
pub fn measurement_history(processed_at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year]"
    );
    let stamp = processed_at
        .format(format)
        .expect("format history");
    format!("{}: cdo -selvar,SIS -sellonlatbox,5,16,46,57 in.nc out.nc", stamp)
}

/// History line carrying a forecast issuance time.
pub fn forecast_history(issuance: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day],[hour]:[minute]");
    let stamp = issuance
        .format(format)
        .expect("format history");
    format!("Forecast run issued {} by SIS nowcasting", stamp)
}

fn since_epoch_units(origin: OffsetDateTime, unit: &str) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let stamp = origin
        .format(format)
        .expect("format units");
    format!("{} since {}", unit, stamp)
}

/// Runs `build` against a fresh NetCDF file and returns the file's bytes.
pub fn write_netcdf(build: impl FnOnce(&mut FileMut) -> Result<(), netcdf::Error>) -> Vec<u8> {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("fixture.nc");
    {
        let mut file = netcdf::create(&path).expect("create NetCDF fixture");
        build(&mut file).expect("write NetCDF fixture");
    }
    std::fs::read(&path).expect("read NetCDF fixture")
}

fn sis_attributes(var: &mut VariableMut<'_>) -> Result<(), netcdf::Error> {
    var.put_attribute("standard_name", "surface_downwelling_shortwave_flux_in_air")?;
    var.put_attribute("long_name", "Surface Incoming Shortwave Radiation")?;
    var.put_attribute("units", "W m-2")?;
    var.put_attribute("_FillValue", SIS_FILL)?;
    Ok(())
}

fn put_axes(file: &mut FileMut, grid: &GridSpec) -> Result<(), netcdf::Error> {
    file.add_dimension("lat", grid.rows)?;
    file.add_dimension("lon", grid.cols)?;
    {
        let lats: Vec<f32> = grid.latitudes().iter().map(|v| *v as f32).collect();
        let mut lat = file.add_variable::<f32>("lat", &["lat"])?;
        lat.put_attribute("units", "degrees_north")?;
        lat.put_values(&lats, ..)?;
    }
    {
        let mut lon = file.add_variable::<f64>("lon", &["lon"])?;
        lon.put_attribute("units", "degrees_east")?;
        lon.put_values(&grid.longitudes(), ..)?;
    }
    Ok(())
}

/// `time(time)` holding `values` in `units`.
fn put_time(file: &mut FileMut, units: &str, values: &[f64]) -> Result<(), netcdf::Error> {
    file.add_dimension("time", values.len())?;
    let mut time = file.add_variable::<f64>("time", &["time"])?;
    time.put_attribute("units", units)?;
    time.put_values(values, ..)?;
    Ok(())
}

fn seconds_since_epoch(slot: OffsetDateTime) -> f64 {
    (slot - OffsetDateTime::UNIX_EPOCH).whole_seconds() as f64
}

/// One 15-minute SIS measurement on a regular grid, `SIS(time, lat, lon)`.
pub fn measurement_file(grid: &GridSpec, slot: OffsetDateTime, values: &[f32]) -> Vec<u8> {
    write_netcdf(|file| {
        file.add_attribute(
            "history",
            measurement_history(slot + Duration::minutes(3)).as_str(),
        )?;
        put_time(
            file,
            &since_epoch_units(OffsetDateTime::UNIX_EPOCH, "seconds"),
            &[seconds_since_epoch(slot)],
        )?;
        put_axes(file, grid)?;
        let mut sis = file.add_variable::<f32>("SIS", &["time", "lat", "lon"])?;
        sis_attributes(&mut sis)?;
        sis.put_values(values, ..)?;
        Ok(())
    })
}

/// Measurement stored as packed shorts: `value = raw * 0.1 + 0.0`, fill -1.
pub fn packed_measurement_file(grid: &GridSpec, slot: OffsetDateTime, values: &[f32]) -> Vec<u8> {
    let packed: Vec<i16> = values
        .iter()
        .map(|v| {
            if *v == SIS_FILL {
                -1
            } else {
                (v * 10.0).round() as i16
            }
        })
        .collect();
    let minutes = (slot - OffsetDateTime::UNIX_EPOCH).whole_minutes() as f64;
    write_netcdf(|file| {
        put_time(
            file,
            &since_epoch_units(OffsetDateTime::UNIX_EPOCH, "minutes"),
            &[minutes],
        )?;
        put_axes(file, grid)?;
        let mut sis = file.add_variable::<i16>("SIS", &["time", "lat", "lon"])?;
        sis.put_attribute("units", "W m-2")?;
        sis.put_attribute("scale_factor", 0.1f32)?;
        sis.put_attribute("add_offset", 0.0f32)?;
        sis.put_attribute("_FillValue", -1i16)?;
        sis.put_values(&packed, ..)?;
        Ok(())
    })
}

/// Measurement with per-cell coordinates: `lat(cell)`, `lon(cell)`,
/// `SIS(time, cell)`.
pub fn flat_measurement_file(
    lats: &[f64],
    lons: &[f64],
    slot: OffsetDateTime,
    values: &[f32],
) -> Vec<u8> {
    write_netcdf(|file| {
        put_time(
            file,
            &since_epoch_units(OffsetDateTime::UNIX_EPOCH, "seconds"),
            &[seconds_since_epoch(slot)],
        )?;
        file.add_dimension("cell", lats.len())?;
        file.add_variable::<f64>("lat", &["cell"])?.put_values(lats, ..)?;
        file.add_variable::<f64>("lon", &["cell"])?.put_values(lons, ..)?;
        let mut sis = file.add_variable::<f32>("SIS", &["time", "cell"])?;
        sis_attributes(&mut sis)?;
        sis.put_values(values, ..)?;
        Ok(())
    })
}

/// Measurement with 2D coordinate arrays: `lat(y, x)`, `lon(y, x)`.
pub fn curvilinear_measurement_file(
    grid: &GridSpec,
    slot: OffsetDateTime,
    values: &[f32],
) -> Vec<u8> {
    let lats = grid.latitudes();
    let lons = grid.longitudes();
    let lat2d: Vec<f64> = (0..grid.rows)
        .flat_map(|r| std::iter::repeat(lats[r]).take(grid.cols))
        .collect();
    let lon2d: Vec<f64> = (0..grid.rows).flat_map(|_| lons.clone()).collect();
    write_netcdf(|file| {
        put_time(
            file,
            &since_epoch_units(OffsetDateTime::UNIX_EPOCH, "seconds"),
            &[seconds_since_epoch(slot)],
        )?;
        file.add_dimension("y", grid.rows)?;
        file.add_dimension("x", grid.cols)?;
        file.add_variable::<f64>("lat", &["y", "x"])?.put_values(&lat2d, ..)?;
        file.add_variable::<f64>("lon", &["y", "x"])?.put_values(&lon2d, ..)?;
        let mut sis = file.add_variable::<f32>("SIS", &["time", "y", "x"])?;
        sis_attributes(&mut sis)?;
        sis.put_values(values, ..)?;
        Ok(())
    })
}

/// Measurement whose SIS variable is stored longitude-major,
/// `SIS(time, lon, lat)`. `values` are given latitude-major like every other
/// fixture and transposed on write.
pub fn transposed_measurement_file(
    grid: &GridSpec,
    slot: OffsetDateTime,
    values: &[f32],
) -> Vec<u8> {
    let mut transposed = Vec::with_capacity(values.len());
    for c in 0..grid.cols {
        for r in 0..grid.rows {
            transposed.push(values[grid.index(r, c)]);
        }
    }
    write_netcdf(|file| {
        put_time(
            file,
            &since_epoch_units(OffsetDateTime::UNIX_EPOCH, "seconds"),
            &[seconds_since_epoch(slot)],
        )?;
        put_axes(file, grid)?;
        let mut sis = file.add_variable::<f32>("SIS", &["time", "lon", "lat"])?;
        sis_attributes(&mut sis)?;
        sis.put_values(&transposed, ..)?;
        Ok(())
    })
}

/// Hourly forecast issued at `issuance`; step `i` is valid at
/// `issuance + (i + 1) hours`. Each entry of `steps` is one latitude-major
/// grid.
pub fn forecast_file(grid: &GridSpec, issuance: OffsetDateTime, steps: &[Vec<f32>]) -> Vec<u8> {
    let hours: Vec<f64> = (1..=steps.len()).map(|h| h as f64).collect();
    let values: Vec<f32> = steps.iter().flatten().copied().collect();
    write_netcdf(|file| {
        file.add_attribute("history", forecast_history(issuance).as_str())?;
        put_time(file, &since_epoch_units(issuance, "hours"), &hours)?;
        put_axes(file, grid)?;
        let mut sis = file.add_variable::<f32>("SIS", &["time", "lat", "lon"])?;
        sis_attributes(&mut sis)?;
        sis.put_values(&values, ..)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn grid_spec_axes() {
        let grid = GridSpec::new(52.4, 13.3, 0.05, 3, 4);
        assert_eq!(grid.latitudes(), vec![52.4, 52.45, 52.5]);
        assert_eq!(grid.longitudes(), vec![13.3, 13.35, 13.4, 13.45]);
        assert_eq!(grid.index(2, 3), 11);
    }

    #[test]
    fn history_lines_match_feed_format() {
        let at = datetime!(2024-05-27 16:03:17 UTC);
        assert!(measurement_history(at).starts_with("Mon May 27 16:03:17 2024:"));
        assert!(forecast_history(at).contains("2024-05-27,16:03"));
    }

    #[test]
    fn fixtures_are_netcdf4() {
        let grid = GridSpec::new(52.4, 13.3, 0.05, 2, 2);
        let slot = datetime!(2024-05-14 20:30 UTC);
        let hdf5 = b"\x89HDF\r\n\x1a\n";
        assert!(measurement_file(&grid, slot, &uniform_values(&grid, 1.0)).starts_with(hdf5));
        assert!(forecast_file(&grid, slot, &[uniform_values(&grid, 1.0)]).starts_with(hdf5));
    }
}
