//! NetCDF access through libnetcdf, for classic and NetCDF-4/HDF5 files alike.
//!
//! libnetcdf only opens paths, so the payload is written to a temporary file
//! that lives as long as the opened dataset.

use std::io::Write;

use ::netcdf::AttributeValue;
use tempfile::NamedTempFile;

use super::{AttrValue, DecodeError, GridDataset};

pub struct NativeFile {
    file: ::netcdf::File,
    _backing: NamedTempFile,
}

impl NativeFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let io = |e: std::io::Error| DecodeError::InvalidFormat(format!("temp file: {}", e));
        let mut backing = NamedTempFile::new().map_err(io)?;
        backing.write_all(bytes).map_err(io)?;
        backing.flush().map_err(io)?;

        let file = ::netcdf::open(backing.path())
            .map_err(|e| DecodeError::InvalidFormat(format!("failed to open NetCDF: {}", e)))?;
        Ok(Self {
            file,
            _backing: backing,
        })
    }
}

fn convert(value: AttributeValue) -> Option<AttrValue> {
    let numbers = |values: Vec<f64>| Some(AttrValue::Numbers(values));
    match value {
        AttributeValue::Str(text) => Some(AttrValue::Text(text)),
        AttributeValue::Strs(texts) => Some(AttrValue::Text(texts.join("\n"))),
        AttributeValue::Schar(v) => numbers(vec![v as f64]),
        AttributeValue::Uchar(v) => numbers(vec![v as f64]),
        AttributeValue::Short(v) => numbers(vec![v as f64]),
        AttributeValue::Ushort(v) => numbers(vec![v as f64]),
        AttributeValue::Int(v) => numbers(vec![v as f64]),
        AttributeValue::Uint(v) => numbers(vec![v as f64]),
        AttributeValue::Float(v) => numbers(vec![v as f64]),
        AttributeValue::Double(v) => numbers(vec![v]),
        AttributeValue::Shorts(v) => numbers(v.into_iter().map(f64::from).collect()),
        AttributeValue::Ints(v) => numbers(v.into_iter().map(f64::from).collect()),
        AttributeValue::Floats(v) => numbers(v.into_iter().map(f64::from).collect()),
        AttributeValue::Doubles(v) => numbers(v),
        _ => None,
    }
}

impl GridDataset for NativeFile {
    fn global_attribute(&self, name: &str) -> Option<AttrValue> {
        convert(self.file.attribute(name)?.value().ok()?)
    }

    fn dimensions_of(&self, variable: &str) -> Option<Vec<(String, usize)>> {
        let var = self.file.variable(variable)?;
        Some(
            var.dimensions()
                .iter()
                .map(|dim| (dim.name(), dim.len()))
                .collect(),
        )
    }

    fn attribute(&self, variable: &str, name: &str) -> Option<AttrValue> {
        let var = self.file.variable(variable)?;
        // probing a missing attribute makes HDF5 print diagnostics
        if !var.attributes().any(|attr| attr.name() == name) {
            return None;
        }
        convert(var.attribute_value(name)?.ok()?)
    }

    fn values(&self, variable: &str) -> Result<Vec<f64>, DecodeError> {
        let var = self
            .file
            .variable(variable)
            .ok_or_else(|| DecodeError::MissingVariable(variable.to_string()))?;
        var.get_values::<f64, _>(..)
            .map_err(|e| DecodeError::InvalidFormat(format!("failed to read {}: {}", variable, e)))
    }
}
