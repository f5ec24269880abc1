//! Small helpers around the `netcdf` crate.

use std::path::Path;

use crate::error::{Error, Result};
use crate::field::{AttrValue, Attributes};

/// Open a netCDF file, reporting a missing file with its path.
pub(crate) fn open_existing(path: &Path) -> Result<netcdf::File> {
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    Ok(netcdf::open(path)?)
}

pub(crate) fn from_nc(value: netcdf::AttrValue) -> Option<AttrValue> {
    use netcdf::AttrValue as Nc;
    let value = match value {
        Nc::Str(s) => AttrValue::Text(s),
        Nc::Double(d) => AttrValue::Number(d),
        Nc::Float(f) => AttrValue::Number(f as f64),
        Nc::Int(i) => AttrValue::Number(i as f64),
        Nc::Uint(i) => AttrValue::Number(i as f64),
        Nc::Short(i) => AttrValue::Number(i as f64),
        Nc::Ushort(i) => AttrValue::Number(i as f64),
        Nc::Schar(i) => AttrValue::Number(i as f64),
        Nc::Uchar(i) => AttrValue::Number(i as f64),
        Nc::Longlong(i) => AttrValue::Number(i as f64),
        Nc::Ulonglong(i) => AttrValue::Number(i as f64),
        Nc::Doubles(v) => AttrValue::Numbers(v),
        Nc::Floats(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        Nc::Ints(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        Nc::Shorts(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        _ => return None,
    };
    Some(value)
}

pub(crate) fn to_nc(value: &AttrValue) -> netcdf::AttrValue {
    match value {
        AttrValue::Text(s) => netcdf::AttrValue::Str(s.clone()),
        AttrValue::Number(d) => netcdf::AttrValue::Double(*d),
        AttrValue::Numbers(v) => netcdf::AttrValue::Doubles(v.clone()),
    }
}

/// All attributes of a variable that have a representable type.
pub(crate) fn variable_attributes(var: &netcdf::Variable) -> Attributes {
    let mut attrs = Attributes::default();
    for attr in var.attributes() {
        if let Some(value) = attr.value().ok().and_then(from_nc) {
            attrs.set(attr.name(), value);
        }
    }
    attrs
}

pub(crate) fn global_attributes(file: &netcdf::File) -> Attributes {
    let mut attrs = Attributes::default();
    for attr in file.attributes() {
        if let Some(value) = attr.value().ok().and_then(from_nc) {
            attrs.set(attr.name(), value);
        }
    }
    attrs
}

pub(crate) fn dimension_names(var: &netcdf::Variable) -> Vec<String> {
    var.dimensions().iter().map(|d| d.name()).collect()
}

/// Read a whole numeric variable as a flat `f64` vector.
pub(crate) fn read_f64(file: &netcdf::File, name: &str) -> Result<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| Error::missing(format!("variable '{name}'")))?;
    let mut buffer = vec![0.0; var.len()];
    var.values_to(&mut buffer, None, None)?;
    Ok(buffer)
}

/// Like [`read_f64`] but `None` when the variable is absent.
pub(crate) fn read_optional_f64(file: &netcdf::File, name: &str) -> Result<Option<Vec<f64>>> {
    match file.variable(name) {
        Some(_) => read_f64(file, name).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn text_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        netcdf::AttrValue::Str(s) => Some(s),
        _ => None,
    }
}
