//! Gridded fields and the datasets that hold them.
//!
//! Consumers only see the [`FieldSource`] capability: values, dimension
//! names, coordinates and attributes. Two implementations exist:
//!
//! - [`LabeledField`]: read from a netCDF variable, carrying the coordinate
//!   variables and attributes found next to it;
//! - [`RawField`]: an array supplied by the caller together with explicit
//!   dimension names and whatever coordinates the caller knows.
//!
//! A [`FieldCollection`] hands fields out one at a time so that a streaming
//! regrid never holds more than one source field in memory.

use std::path::{Path, PathBuf};

use ndarray::{Array1, ArrayD, ArrayViewD};
use tracing::debug;

use crate::error::{Error, Result};
use crate::grid::{self, GridType};
use crate::nc;
use crate::time::{self, TimeAxis, TimeValue};
use crate::units::{MolecularWeight, UnitSpec};
use crate::vertical::{VerticalAxis, VERTICAL_DIMS};

/// Variables that describe a grid or a time axis rather than a field.
pub const BOOKKEEPING_VARIABLES: &[&str] = &[
    "lon_bnds",
    "lat_bnds",
    "time_bnds",
    "lon",
    "lat",
    "time",
    "date",
    "datesec",
    "crs",
    "gridcell_area",
    "area",
];

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Numbers(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

/// Ordered attribute list; insertion order is kept when written back out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttrValue)>);

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Values along one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub values: Array1<f64>,
    /// Decoded samples, only for a `time` coordinate
    pub times: Option<Vec<TimeValue>>,
    pub attributes: Attributes,
}

impl Coordinate {
    pub fn new(values: impl Into<Array1<f64>>) -> Self {
        Self {
            values: values.into(),
            times: None,
            attributes: Attributes::default(),
        }
    }

    /// A time coordinate from already-typed samples.
    pub fn times(times: Vec<TimeValue>) -> Self {
        let values = Array1::from_iter((0..times.len()).map(|i| i as f64));
        Self {
            values,
            times: Some(times),
            attributes: Attributes::default(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.set(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read access to one gridded field.
pub trait FieldSource {
    fn name(&self) -> &str;

    fn values(&self) -> ArrayViewD<'_, f64>;

    fn dims(&self) -> &[String];

    fn coordinate(&self, name: &str) -> Option<&Coordinate>;

    fn attribute(&self, name: &str) -> Option<&AttrValue>;

    fn attributes(&self) -> &Attributes;

    fn grid_type(&self) -> Result<GridType> {
        grid::detect_grid_type(self.name(), self.dims())
    }

    fn dim_len(&self, name: &str) -> Option<usize> {
        let axis = self.dims().iter().position(|d| d == name)?;
        Some(self.values().shape()[axis])
    }
}

/// Classify the `time` coordinate of a field.
pub fn time_axis(field: &dyn FieldSource) -> Result<Option<TimeAxis>> {
    if !field.dims().iter().any(|d| d == "time") {
        return Ok(None);
    }
    let coord = field
        .coordinate("time")
        .ok_or_else(|| Error::missing(format!("time coordinate of '{}'", field.name())))?;
    let times = match &coord.times {
        Some(times) => times.clone(),
        None => coord.values.iter().map(|v| TimeValue::Undecoded(*v)).collect(),
    };
    TimeAxis::classify(&times).map(Some)
}

/// Unit description of a field; explicit values win over attributes.
pub fn unit_spec(field: &dyn FieldSource, unit: Option<&str>, mw: Option<f64>) -> Result<UnitSpec> {
    unit_spec_from(field.name(), field.attributes(), unit, mw)
}

/// Like [`unit_spec`] but from a bare attribute list.
pub fn unit_spec_from(
    name: &str,
    attributes: &Attributes,
    unit: Option<&str>,
    mw: Option<f64>,
) -> Result<UnitSpec> {
    let unit = match unit {
        Some(unit) => unit.to_string(),
        None => attributes
            .get("units")
            .or_else(|| attributes.get("unit"))
            .and_then(AttrValue::as_text)
            .map(str::to_lowercase)
            .ok_or_else(|| {
                Error::missing(format!("'{name}' has no unit attribute; a unit must be provided"))
            })?,
    };
    let molecular_weight = match mw {
        Some(mw) => Some(MolecularWeight::grams_per_mole(mw)),
        None => {
            let units = attributes
                .get("molecular_weight_units")
                .and_then(AttrValue::as_text)
                .map(str::to_string);
            match attributes.get("molecular_weight") {
                Some(AttrValue::Text(text)) => Some(MolecularWeight::parse(text, units)?),
                Some(value) => value.as_number().map(|value| MolecularWeight { value, units }),
                None => None,
            }
        }
    };
    Ok(UnitSpec {
        unit,
        molecular_weight,
    })
}

/// A field built from a bare array and explicit dimension names.
#[derive(Debug, Clone)]
pub struct RawField {
    name: String,
    values: ArrayD<f64>,
    dims: Vec<String>,
    coords: Vec<(String, Coordinate)>,
    attributes: Attributes,
}

impl RawField {
    pub fn new(name: impl Into<String>, values: ArrayD<f64>, dims: &[&str]) -> Result<Self> {
        let name = name.into();
        if values.ndim() != dims.len() {
            return Err(Error::shape(format!(
                "'{name}' has {} axes but {} dimension names {:?}",
                values.ndim(),
                dims.len(),
                dims
            )));
        }
        Ok(Self {
            name,
            values,
            dims: dims.iter().map(|d| d.to_string()).collect(),
            coords: Vec::new(),
            attributes: Attributes::default(),
        })
    }

    pub fn with_coordinate(mut self, dim: &str, coord: Coordinate) -> Result<Self> {
        let Some(axis) = self.dims.iter().position(|d| d == dim) else {
            return Err(Error::shape(format!("'{}' has no dimension '{dim}'", self.name)));
        };
        if self.values.shape()[axis] != coord.len() {
            return Err(Error::shape(format!(
                "coordinate '{dim}' has {} values, '{}' has {} along it",
                coord.len(),
                self.name,
                self.values.shape()[axis]
            )));
        }
        self.coords.retain(|(k, _)| k != dim);
        self.coords.push((dim.to_string(), coord));
        Ok(self)
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.set(name, value);
        self
    }

    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }
}

impl FieldSource for RawField {
    fn name(&self) -> &str {
        &self.name
    }

    fn values(&self) -> ArrayViewD<'_, f64> {
        self.values.view()
    }

    fn dims(&self) -> &[String] {
        &self.dims
    }

    fn coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|(k, _)| k == name).map(|(_, c)| c)
    }

    fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A field read from a labelled store together with its coordinates.
#[derive(Debug, Clone)]
pub struct LabeledField {
    name: String,
    values: ArrayD<f64>,
    dims: Vec<String>,
    coords: Vec<(String, Coordinate)>,
    attributes: Attributes,
}

impl LabeledField {
    fn read(file: &netcdf::File, name: &str) -> Result<Self> {
        let var = file
            .variable(name)
            .ok_or_else(|| Error::missing(format!("variable '{name}'")))?;
        let dims = nc::dimension_names(&var);
        let mut values = var.values::<f64>(None, None)?;
        let attributes = nc::variable_attributes(&var);
        unpack(values.iter_mut(), &attributes);

        let mut coords = Vec::new();
        for dim in &dims {
            if let Some(coord) = read_coordinate(file, dim)? {
                coords.push((dim.clone(), coord));
            }
        }
        debug!(field = name, ?dims, "read labelled field");

        Ok(Self {
            name: name.to_string(),
            values,
            dims,
            coords,
            attributes,
        })
    }
}

/// Decode packed storage in place: values equal to `_FillValue` or
/// `missing_value` become NaN, the rest are scaled by `scale_factor` and
/// shifted by `add_offset`.
pub fn unpack<'a>(values: impl IntoIterator<Item = &'a mut f64>, attributes: &Attributes) {
    let number = |name: &str| attributes.get(name).and_then(AttrValue::as_number);
    let fills: Vec<f64> = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|name| attributes.get(name))
        .flat_map(|value| match value {
            AttrValue::Number(n) => vec![*n],
            AttrValue::Numbers(v) => v.clone(),
            AttrValue::Text(_) => Vec::new(),
        })
        .filter(|fill| !fill.is_nan())
        .collect();
    let scale = number("scale_factor").unwrap_or(1.0);
    let offset = number("add_offset").unwrap_or(0.0);
    if fills.is_empty() && scale == 1.0 && offset == 0.0 {
        return;
    }
    for value in values {
        let fill = fills
            .iter()
            .any(|fill| *value == *fill || (*value - fill).abs() <= fill.abs() * 1e-7);
        *value = if fill { f64::NAN } else { *value * scale + offset };
    }
}

fn read_coordinate(file: &netcdf::File, dim: &str) -> Result<Option<Coordinate>> {
    let Some(var) = file.variable(dim) else {
        return Ok(None);
    };
    if var.dimensions().len() != 1 {
        return Ok(None);
    }
    let mut buffer = vec![0.0; var.len()];
    // character or string coordinates are not carried
    if var.values_to(&mut buffer, None, None).is_err() {
        return Ok(None);
    }
    let attributes = nc::variable_attributes(&var);
    let times = (dim == "time").then(|| {
        time::decode_cf_time(
            &buffer,
            nc::text_attribute(&var, "units").as_deref(),
            nc::text_attribute(&var, "calendar").as_deref(),
        )
    });
    Ok(Some(Coordinate {
        values: Array1::from_vec(buffer),
        times,
        attributes,
    }))
}

impl FieldSource for LabeledField {
    fn name(&self) -> &str {
        &self.name
    }

    fn values(&self) -> ArrayViewD<'_, f64> {
        self.values.view()
    }

    fn dims(&self) -> &[String] {
        &self.dims
    }

    fn coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|(k, _)| k == name).map(|(_, c)| c)
    }

    fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A set of fields that can be loaded one at a time.
pub trait FieldCollection {
    /// Names of the fields that carry a spatial grid signature.
    fn field_names(&self) -> Vec<String>;

    fn load(&self, name: &str) -> Result<Box<dyn FieldSource>>;

    /// Dimension names of a field, without loading its values.
    fn field_dims(&self, name: &str) -> Result<Vec<String>>;

    /// Attributes of a field, without loading its values.
    fn field_attributes(&self, name: &str) -> Result<Attributes>;

    fn global_attributes(&self) -> Attributes;

    /// Identifier used in provenance records.
    fn identifier(&self) -> String;
}

/// A netCDF file opened for field access; values are read on demand.
pub struct Dataset {
    path: PathBuf,
    file: netcdf::File,
}

impl Dataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = nc::open_existing(&path)?;
        Ok(Self { path, file })
    }

    pub fn field(&self, name: &str) -> Result<LabeledField> {
        LabeledField::read(&self.file, name)
    }

    /// Vertical layers of a field, with interfaces from `<dim>_int` when the
    /// file has them.
    pub fn vertical_axis(&self, field: &dyn FieldSource, quiet: bool) -> Result<Option<VerticalAxis>> {
        let Some(dim) = field
            .dims()
            .iter()
            .find(|d| VERTICAL_DIMS.contains(&d.as_str()))
        else {
            return Ok(None);
        };
        let coord = field
            .coordinate(dim)
            .ok_or_else(|| Error::missing(format!("coordinate variable '{dim}'")))?;
        let interfaces = nc::read_optional_f64(&self.file, &format!("{dim}_int"))?;
        VerticalAxis::from_coordinate(coord, interfaces, quiet).map(Some)
    }
}

impl FieldCollection for Dataset {
    fn field_names(&self) -> Vec<String> {
        self.file
            .variables()
            .filter(|var| !BOOKKEEPING_VARIABLES.contains(&var.name().as_str()))
            .filter(|var| grid::detect_grid_type(&var.name(), nc::dimension_names(var).as_slice()).is_ok())
            .map(|var| var.name())
            .collect()
    }

    fn load(&self, name: &str) -> Result<Box<dyn FieldSource>> {
        Ok(Box::new(self.field(name)?))
    }

    fn field_dims(&self, name: &str) -> Result<Vec<String>> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| Error::missing(format!("variable '{name}'")))?;
        Ok(nc::dimension_names(&var))
    }

    fn field_attributes(&self, name: &str) -> Result<Attributes> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| Error::missing(format!("variable '{name}'")))?;
        Ok(nc::variable_attributes(&var))
    }

    fn global_attributes(&self) -> Attributes {
        nc::global_attributes(&self.file)
    }

    fn identifier(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory fields, e.g. built by a caller from raw arrays.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    pub fields: Vec<RawField>,
    pub attributes: Attributes,
}

impl FieldSet {
    pub fn new(fields: Vec<RawField>) -> Self {
        Self {
            fields,
            attributes: Attributes::default(),
        }
    }

    fn get(&self, name: &str) -> Result<&RawField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::missing(format!("field '{name}'")))
    }
}

impl FieldCollection for FieldSet {
    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn load(&self, name: &str) -> Result<Box<dyn FieldSource>> {
        Ok(Box::new(self.get(name)?.clone()))
    }

    fn field_dims(&self, name: &str) -> Result<Vec<String>> {
        self.get(name).map(|f| f.dims.clone())
    }

    fn field_attributes(&self, name: &str) -> Result<Attributes> {
        self.get(name).map(|f| f.attributes.clone())
    }

    fn global_attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    fn identifier(&self) -> String {
        "in-memory fields".to_string()
    }
}
