//! Spherical cell areas in m².

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayD};

use super::{FvGrid, GridTopology, SeMesh};
use crate::error::{Error, Result};

/// Mean Earth radius in metres
pub const EARTH_RADIUS: f64 = 6.371e6;

pub fn earth_surface_area() -> f64 {
    4.0 * PI * EARTH_RADIUS * EARTH_RADIUS
}

/// South and north edge of every latitude row, in degrees.
///
/// Explicit bounds win. Otherwise each edge sits half way to the
/// neighbouring row; the outermost rows mirror their only neighbour's
/// spacing, and edges are clamped to the poles so that a pole-centred row
/// becomes a half-cell cap.
pub fn latitude_edges(grid: &FvGrid) -> Vec<(f64, f64)> {
    if let Some(bounds) = &grid.lat_bounds {
        return bounds
            .rows()
            .into_iter()
            .map(|b| (b[0].min(b[1]), b[0].max(b[1])))
            .collect();
    }
    let lat = &grid.lat;
    let n = lat.len();
    (0..n)
        .map(|j| {
            let below = if j == 0 { lat[1] - lat[0] } else { lat[j] - lat[j - 1] };
            let above = if j == n - 1 { lat[n - 1] - lat[n - 2] } else { lat[j + 1] - lat[j] };
            let south = (lat[j] - below / 2.0).clamp(-90.0, 90.0);
            let north = (lat[j] + above / 2.0).clamp(-90.0, 90.0);
            (south, north)
        })
        .collect()
}

/// Width of every longitude column, in degrees.
pub fn longitude_widths(grid: &FvGrid) -> Vec<f64> {
    match &grid.lon_bounds {
        Some(bounds) => bounds.rows().into_iter().map(|b| (b[1] - b[0]).abs()).collect(),
        None => vec![grid.lon[1] - grid.lon[0]; grid.nlon()],
    }
}

/// Cell areas of an FV grid, shaped `(lat, lon)`.
pub fn fv_cell_areas(grid: &FvGrid) -> Array2<f64> {
    let edges = latitude_edges(grid);
    let widths = longitude_widths(grid);
    let r2 = EARTH_RADIUS * EARTH_RADIUS;
    Array2::from_shape_fn((grid.nlat(), grid.nlon()), |(j, i)| {
        let (south, north) = edges[j];
        widths[i].to_radians() * r2 * (north.to_radians().sin() - south.to_radians().sin())
    })
}

/// Node areas of an SE mesh, renormalised so they sum to the Earth's surface.
pub fn se_cell_areas(mesh: &SeMesh) -> Result<Array1<f64>> {
    let raw = mesh
        .area
        .as_ref()
        .ok_or_else(|| Error::missing("SE mesh has no node areas (grid_area)"))?;
    if raw.len() != mesh.len() {
        return Err(Error::shape(format!(
            "{} node areas for {} nodes",
            raw.len(),
            mesh.len()
        )));
    }
    let total = raw.sum();
    if total <= 0.0 {
        return Err(Error::shape("SE node areas do not sum to a positive value"));
    }
    Ok(raw.mapv(|a| a / total * earth_surface_area()))
}

/// Cell areas in the storage shape of the topology.
pub fn cell_areas(topology: &GridTopology) -> Result<ArrayD<f64>> {
    match topology {
        GridTopology::Fv(grid) => Ok(fv_cell_areas(grid).into_dyn()),
        GridTopology::Se(mesh) => Ok(se_cell_areas(mesh)?.into_dyn()),
    }
}
