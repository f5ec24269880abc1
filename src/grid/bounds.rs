//! FV grid-description files with explicit cell bounds.

use std::path::Path;

use ndarray::Array2;
use tracing::info;

use super::FvGrid;
use crate::error::{Error, Result};
use crate::field::AttrValue;
use crate::nc;
use crate::provenance;

/// `[lower, upper]` edges at each centre ± half the first spacing.
pub fn derive_bounds(centres: &[f64]) -> Result<Array2<f64>> {
    if centres.len() < 2 {
        return Err(Error::shape("bounds need at least two coordinate values"));
    }
    let half = (centres[1] - centres[0]) / 2.0;
    let mut bounds = Array2::zeros((centres.len(), 2));
    for (mut row, c) in bounds.rows_mut().into_iter().zip(centres) {
        row[0] = c - half;
        row[1] = c + half;
    }
    Ok(bounds)
}

/// Attach derived bounds to a grid; latitude edges stop at the poles.
pub fn with_derived_bounds(grid: FvGrid) -> Result<FvGrid> {
    let lon_bounds = derive_bounds(&grid.lon.to_vec())?;
    let lat_bounds = derive_bounds(&grid.lat.to_vec())?.mapv(|v| v.clamp(-90.0, 90.0));
    grid.with_bounds(lon_bounds, lat_bounds)
}

/// Read `lat`/`lon` from `source` and write a grid description with
/// `lat_bnds`/`lon_bnds` to `destination`.
pub fn write_bounds_file(source: &Path, destination: &Path) -> Result<FvGrid> {
    let file = nc::open_existing(source)?;
    let mut grid = FvGrid::new(nc::read_f64(&file, "lon")?, nc::read_f64(&file, "lat")?)?;
    if let Some(var) = file.variable("lon") {
        grid.lon_attributes = nc::variable_attributes(&var);
    }
    if let Some(var) = file.variable("lat") {
        grid.lat_attributes = nc::variable_attributes(&var);
    }
    let grid = with_derived_bounds(grid)?;
    write_grid(&grid, &source.display().to_string(), destination)?;
    info!(source = %source.display(), destination = %destination.display(), "wrote grid bounds");
    Ok(grid)
}

pub fn write_grid(grid: &FvGrid, original: &str, destination: &Path) -> Result<()> {
    let (Some(lon_bnds), Some(lat_bnds)) = (&grid.lon_bounds, &grid.lat_bounds) else {
        return Err(Error::missing("grid has no bounds to write"));
    };
    let mut out = netcdf::create(destination)?;
    out.add_dimension("lat", grid.nlat())?;
    out.add_dimension("lon", grid.nlon())?;
    out.add_dimension("nbnd", 2)?;

    for (name, values, attrs, bnds) in [
        ("lat", grid.lat.to_vec(), &grid.lat_attributes, lat_bnds),
        ("lon", grid.lon.to_vec(), &grid.lon_attributes, lon_bnds),
    ] {
        let n = values.len();
        let mut var = out.add_variable::<f64>(name, &[name])?;
        var.put_values(&values, Some(&[0]), Some(&[n]))?;
        for (key, value) in attrs.iter().filter(|(k, _)| *k != "bounds") {
            var.add_attribute(key, nc::to_nc(value))?;
        }
        let bounds_name = format!("{name}_bnds");
        var.add_attribute("bounds", bounds_name.as_str())?;

        let mut var = out.add_variable::<f64>(&bounds_name, &[name, "nbnd"])?;
        var.put_values(&bnds.iter().copied().collect::<Vec<_>>(), Some(&[0, 0]), Some(&[n, 2]))?;
        if let Some(units) = attrs.get("units").and_then(AttrValue::as_text) {
            var.add_attribute("units", units)?;
        }
    }

    out.add_attribute("created_by", provenance::TOOL_IDENTITY)?;
    out.add_attribute("original_file", original)?;
    out.add_attribute("file_creation_time", provenance::timestamp().as_str())?;
    out.add_attribute("username", provenance::user_and_host().as_str())?;
    Ok(())
}
