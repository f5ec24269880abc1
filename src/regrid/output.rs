//! Destinations for regridded fields.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::OutputType;
use crate::error::{Error, Result};
use crate::field::{AttrValue, Attributes};
use crate::nc;

/// Attributes that are tied to the storage type and never copied.
const STORAGE_ATTRIBUTES: &[&str] = &["_FillValue", "missing_value", "scale_factor", "add_offset"];

/// A labelled array store with named dimensions.
pub trait OutputStore {
    /// Length of a dimension; for an unlimited one, the current length.
    fn dimension_len(&self, name: &str) -> Option<usize>;

    fn define_dimension(&mut self, name: &str, len: usize, unlimited: bool) -> Result<()>;

    fn define_variable(
        &mut self,
        name: &str,
        dims: &[&str],
        kind: OutputType,
        attributes: &Attributes,
    ) -> Result<()>;

    fn has_variable(&self, name: &str) -> bool;

    /// Write a hyperslab of a variable.
    fn write(&mut self, name: &str, start: &[usize], count: &[usize], values: &[f64]) -> Result<()>;

    fn set_global_attribute(&mut self, name: &str, value: &AttrValue) -> Result<()>;

    /// Identifier used in log messages.
    fn identifier(&self) -> String;
}

fn copyable(attributes: &Attributes) -> impl Iterator<Item = (&str, &AttrValue)> {
    attributes
        .iter()
        .filter(|(k, _)| !STORAGE_ATTRIBUTES.contains(k))
}

/// A netCDF file being written.
pub struct NetcdfStore {
    path: PathBuf,
    file: netcdf::MutableFile,
    kinds: HashMap<String, OutputType>,
}

impl NetcdfStore {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = netcdf::create(&path)?;
        debug!(path = %path.display(), "created output file");
        Ok(Self {
            path,
            file,
            kinds: HashMap::new(),
        })
    }
}

impl OutputStore for NetcdfStore {
    fn dimension_len(&self, name: &str) -> Option<usize> {
        self.file.dimension(name).map(|d| d.len())
    }

    fn define_dimension(&mut self, name: &str, len: usize, unlimited: bool) -> Result<()> {
        if unlimited {
            self.file.add_unlimited_dimension(name)?;
        } else {
            self.file.add_dimension(name, len)?;
        }
        Ok(())
    }

    fn define_variable(
        &mut self,
        name: &str,
        dims: &[&str],
        kind: OutputType,
        attributes: &Attributes,
    ) -> Result<()> {
        let mut var = match kind {
            OutputType::F4 => self.file.add_variable::<f32>(name, dims)?,
            OutputType::F8 => self.file.add_variable::<f64>(name, dims)?,
        };
        for (key, value) in copyable(attributes) {
            var.add_attribute(key, nc::to_nc(value))?;
        }
        self.kinds.insert(name.to_string(), kind);
        Ok(())
    }

    fn has_variable(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    fn write(&mut self, name: &str, start: &[usize], count: &[usize], values: &[f64]) -> Result<()> {
        let kind = *self
            .kinds
            .get(name)
            .ok_or_else(|| Error::missing(format!("output variable '{name}'")))?;
        let mut var = self
            .file
            .variable_mut(name)
            .ok_or_else(|| Error::missing(format!("output variable '{name}'")))?;
        match kind {
            OutputType::F4 => {
                let values: Vec<f32> = values.iter().map(|v| *v as f32).collect();
                var.put_values(&values, Some(start), Some(count))?;
            }
            OutputType::F8 => var.put_values(values, Some(start), Some(count))?,
        }
        Ok(())
    }

    fn set_global_attribute(&mut self, name: &str, value: &AttrValue) -> Result<()> {
        self.file.add_attribute(name, nc::to_nc(value))?;
        Ok(())
    }

    fn identifier(&self) -> String {
        self.path.display().to_string()
    }
}

/// One variable held by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVariable {
    pub dims: Vec<String>,
    pub kind: OutputType,
    pub attributes: Attributes,
    /// Row-major values; grows along a leading unlimited dimension
    pub values: Vec<f64>,
}

/// An in-memory [`OutputStore`], mainly for inspecting what a run wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub dimensions: Vec<(String, usize, bool)>,
    pub variables: HashMap<String, StoredVariable>,
    pub attributes: Attributes,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(&self, name: &str) -> Option<&StoredVariable> {
        self.variables.get(name)
    }
}

impl OutputStore for MemoryStore {
    fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, len, _)| *len)
    }

    fn define_dimension(&mut self, name: &str, len: usize, unlimited: bool) -> Result<()> {
        if self.dimension_len(name).is_some() {
            return Err(Error::shape(format!("dimension '{name}' already exists")));
        }
        let len = if unlimited { 0 } else { len };
        self.dimensions.push((name.to_string(), len, unlimited));
        Ok(())
    }

    fn define_variable(
        &mut self,
        name: &str,
        dims: &[&str],
        kind: OutputType,
        attributes: &Attributes,
    ) -> Result<()> {
        let mut kept = Attributes::default();
        for (key, value) in copyable(attributes) {
            kept.set(key, value.clone());
        }
        for (axis, dim) in dims.iter().enumerate() {
            let Some((_, _, unlimited)) = self.dimensions.iter().find(|(n, _, _)| n == dim) else {
                return Err(Error::missing(format!("dimension '{dim}'")));
            };
            if *unlimited && axis != 0 {
                return Err(Error::shape(format!("unlimited dimension '{dim}' must lead")));
            }
        }
        let len: usize = dims
            .iter()
            .map(|d| self.dimension_len(d).unwrap_or(0))
            .product();
        self.variables.insert(
            name.to_string(),
            StoredVariable {
                dims: dims.iter().map(|d| d.to_string()).collect(),
                kind,
                attributes: kept,
                values: vec![0.0; len],
            },
        );
        Ok(())
    }

    fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    fn write(&mut self, name: &str, start: &[usize], count: &[usize], values: &[f64]) -> Result<()> {
        let dims = self
            .variables
            .get(name)
            .map(|v| v.dims.clone())
            .ok_or_else(|| Error::missing(format!("output variable '{name}'")))?;
        if start.len() != dims.len() || count.len() != dims.len() {
            return Err(Error::shape(format!("hyperslab rank differs from '{name}'")));
        }
        if values.len() != count.iter().product::<usize>() {
            return Err(Error::shape(format!("hyperslab of '{name}' has the wrong size")));
        }

        // grow a leading unlimited dimension
        let mut shape = Vec::with_capacity(dims.len());
        for (axis, dim) in dims.iter().enumerate() {
            let Some(entry) = self.dimensions.iter_mut().find(|(n, _, _)| n == dim) else {
                return Err(Error::missing(format!("dimension '{dim}'")));
            };
            if entry.2 {
                entry.1 = entry.1.max(start[axis] + count[axis]);
            } else if start[axis] + count[axis] > entry.1 {
                return Err(Error::shape(format!("write past the end of '{dim}'")));
            }
            shape.push(entry.1);
        }

        let var = self
            .variables
            .get_mut(name)
            .ok_or_else(|| Error::missing(format!("output variable '{name}'")))?;
        var.values.resize(shape.iter().product(), 0.0);

        let strides: Vec<usize> = (0..shape.len())
            .map(|axis| shape[axis + 1..].iter().product())
            .collect();
        let mut index = vec![0usize; count.len()];
        for value in values {
            let offset: usize = index
                .iter()
                .zip(start)
                .zip(&strides)
                .map(|((i, s), stride)| (i + s) * stride)
                .sum();
            var.values[offset] = match var.kind {
                OutputType::F4 => *value as f32 as f64,
                OutputType::F8 => *value,
            };
            for axis in (0..count.len()).rev() {
                index[axis] += 1;
                if index[axis] < count[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(())
    }

    fn set_global_attribute(&mut self, name: &str, value: &AttrValue) -> Result<()> {
        self.attributes.set(name, value.clone());
        Ok(())
    }

    fn identifier(&self) -> String {
        "memory".to_string()
    }
}
