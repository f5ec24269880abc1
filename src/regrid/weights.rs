//! Interpolation operators and the provider that builds them.
//!
//! An operator maps a source slice to a destination slice, both flattened in
//! operator order (FV cells longitude-major, SE nodes in mesh order). It is
//! stored as a compressed sparse column matrix of shape
//! `(destination cells, source cells)`.

use std::path::{Path, PathBuf};

use ordered_float::OrderedFloat;
use tracing::{debug, info};

use crate::config::RegridMethod;
use crate::error::{Error, Result};
use crate::grid::area::{latitude_edges, longitude_widths};
use crate::grid::{FvGrid, GridDescription, GridTopology};
use crate::nc;

/// What to do with destination cells that receive no source contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedAction {
    Error,
    Ignore,
}

/// A sparse linear operator keyed by the grids and method it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct RegridWeights {
    pub source_grid: String,
    pub destination_grid: String,
    pub method: RegridMethod,
    /// Number of source cells (`n_a`)
    pub n_src: usize,
    /// Number of destination cells (`n_b`)
    pub n_dst: usize,
    col_ptr: Vec<isize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl RegridWeights {
    /// Build from zero-based `(destination, source, weight)` triplets.
    pub fn from_triplets(
        source_grid: impl Into<String>,
        destination_grid: impl Into<String>,
        method: RegridMethod,
        n_src: usize,
        n_dst: usize,
        triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self> {
        if let Some((row, col, _)) = triplets.iter().find(|(r, c, _)| *r >= n_dst || *c >= n_src) {
            return Err(Error::shape(format!(
                "weight ({row}, {col}) is outside a {n_dst}x{n_src} operator"
            )));
        }
        let mut rows = Vec::with_capacity(triplets.len());
        let mut cols = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());
        for (row, col, value) in triplets {
            rows.push(row);
            cols.push(col as isize);
            values.push(value);
        }

        let mut matrix = rsparse::data::Sprs::new();
        {
            let trpl = rsparse::data::Trpl {
                m: n_dst,
                n: n_src,
                p: cols,
                i: rows,
                x: values,
            };
            matrix.from_trpl(&trpl);
        }
        Ok(Self {
            source_grid: source_grid.into(),
            destination_grid: destination_grid.into(),
            method,
            n_src,
            n_dst,
            col_ptr: matrix.p,
            row_idx: matrix.i,
            values: matrix.x,
        })
    }

    /// Zero-based `(destination, source, weight)` entries in column order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_src).flat_map(move |col| {
            let (start, end) = (self.col_ptr[col] as usize, self.col_ptr[col + 1] as usize);
            (start..end).map(move |k| (self.row_idx[k], col, self.values[k]))
        })
    }

    pub fn nnz(&self) -> usize {
        self.col_ptr.get(self.n_src).map_or(0, |&n| n as usize)
    }

    /// `dst = W · src`
    pub fn apply(&self, src: &[f64], dst: &mut [f64]) -> Result<()> {
        if src.len() != self.n_src || dst.len() != self.n_dst {
            return Err(Error::shape(format!(
                "operator is {}x{}, slices are {} -> {}",
                self.n_dst,
                self.n_src,
                src.len(),
                dst.len()
            )));
        }
        dst.fill(0.0);
        for (col, value) in src.iter().enumerate() {
            if *value == 0.0 {
                continue;
            }
            let (start, end) = (self.col_ptr[col] as usize, self.col_ptr[col + 1] as usize);
            for k in start..end {
                dst[self.row_idx[k]] += self.values[k] * value;
            }
        }
        Ok(())
    }
}

/// Generates, persists and applies interpolation operators.
pub trait WeightProvider {
    fn generate(
        &self,
        source: &GridDescription,
        destination: &GridDescription,
        method: RegridMethod,
        unmapped: UnmappedAction,
    ) -> Result<RegridWeights>;

    fn load(&self, path: &Path) -> Result<RegridWeights>;

    fn save(&self, weights: &RegridWeights, path: &Path) -> Result<()>;

    fn apply(&self, weights: &RegridWeights, src: &[f64], dst: &mut [f64]) -> Result<()> {
        weights.apply(src, dst)
    }
}

/// Operators built in-process and stored in ESMF-style netCDF weight files.
///
/// Supports the nearest-neighbour methods on any topology, bilinear from FV
/// sources and first-order conservative between FV grids.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseWeightProvider;

fn failure(method: RegridMethod, reason: impl Into<String>) -> Error {
    Error::RegridGenerationFailed {
        method: method.to_string(),
        reason: reason.into(),
    }
}

impl WeightProvider for SparseWeightProvider {
    fn generate(
        &self,
        source: &GridDescription,
        destination: &GridDescription,
        method: RegridMethod,
        unmapped: UnmappedAction,
    ) -> Result<RegridWeights> {
        let src = &source.topology;
        let dst = &destination.topology;
        let (n_src, n_dst) = (src.size(), dst.size());

        let triplets = match (method, src, dst) {
            (RegridMethod::NearestSourceToDest, _, _) => nearest_source_to_dest(src, dst)?,
            (RegridMethod::NearestDestToSource, _, _) => nearest_dest_to_source(src, dst)?,
            (RegridMethod::Bilinear, GridTopology::Fv(grid), _) => bilinear(grid, dst),
            (RegridMethod::Conservative1st, GridTopology::Fv(a), GridTopology::Fv(b)) => {
                conservative_fv(a, b)
            }
            (RegridMethod::Bilinear, GridTopology::Se(_), _) => {
                return Err(failure(method, "bilinear weights need an FV source grid"))
            }
            (RegridMethod::Conservative1st, _, _) => {
                return Err(failure(method, "conservative weights involving SE meshes are not available"))
            }
            (RegridMethod::Patch | RegridMethod::Conservative2nd, _, _) => {
                return Err(failure(method, "method is not available in the sparse weight provider"))
            }
        };

        let mut mapped = vec![false; n_dst];
        triplets.iter().for_each(|(row, _, _)| mapped[*row] = true);
        let unmapped_cells = mapped.iter().filter(|m| !**m).count();
        if unmapped_cells > 0 {
            match unmapped {
                UnmappedAction::Error => {
                    return Err(failure(
                        method,
                        format!("{unmapped_cells} destination cells receive no source contribution"),
                    ))
                }
                UnmappedAction::Ignore => {
                    debug!(unmapped_cells, "ignoring unmapped destination cells")
                }
            }
        }

        let weights = RegridWeights::from_triplets(
            source.identifier.clone(),
            destination.identifier.clone(),
            method,
            n_src,
            n_dst,
            triplets,
        )?;
        info!(%method, n_src, n_dst, nnz = weights.nnz(), "generated regrid weights");
        Ok(weights)
    }

    fn load(&self, path: &Path) -> Result<RegridWeights> {
        if !path.exists() {
            return Err(Error::WeightFileNotFound(PathBuf::from(path)));
        }
        let file = netcdf::open(path)?;
        let dim_len = |name: &str| {
            file.dimension(name)
                .map(|d| d.len())
                .ok_or_else(|| Error::missing(format!("dimension '{name}' in {}", path.display())))
        };
        let n_src = dim_len("n_a")?;
        let n_dst = dim_len("n_b")?;
        let rows = nc::read_f64(&file, "row")?;
        let cols = nc::read_f64(&file, "col")?;
        let values = nc::read_f64(&file, "S")?;
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(Error::shape(format!(
                "{}: row, col and S differ in length",
                path.display()
            )));
        }

        let globals = nc::global_attributes(&file);
        let text = |name: &str| globals.get(name).and_then(|v| v.as_text()).map(str::to_string);
        let method = match text("map_method") {
            Some(name) => method_from_attribute(&name)?,
            None => return Err(Error::missing(format!("map_method in {}", path.display()))),
        };

        // weight files index from one
        let index = |value: f64, what: &str| {
            if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
                Ok(value as usize - 1)
            } else {
                Err(Error::shape(format!(
                    "{}: {what} index {value} is not a one-based index",
                    path.display()
                )))
            }
        };
        let triplets = rows
            .iter()
            .zip(&cols)
            .zip(&values)
            .map(|((r, c), s)| Ok((index(*r, "row")?, index(*c, "col")?, *s)))
            .collect::<Result<Vec<_>>>()?;
        let weights = RegridWeights::from_triplets(
            text("source_grid").unwrap_or_default(),
            text("destination_grid").unwrap_or_default(),
            method,
            n_src,
            n_dst,
            triplets,
        )?;
        info!(path = %path.display(), nnz = weights.nnz(), "loaded regrid weights");
        Ok(weights)
    }

    fn save(&self, weights: &RegridWeights, path: &Path) -> Result<()> {
        let triplets: Vec<(usize, usize, f64)> = weights.triplets().collect();
        let n = triplets.len();

        let mut file = netcdf::create(path)?;
        file.add_dimension("n_s", n)?;
        file.add_dimension("n_a", weights.n_src)?;
        file.add_dimension("n_b", weights.n_dst)?;

        let rows: Vec<i32> = triplets.iter().map(|(r, _, _)| *r as i32 + 1).collect();
        let cols: Vec<i32> = triplets.iter().map(|(_, c, _)| *c as i32 + 1).collect();
        let values: Vec<f64> = triplets.iter().map(|(_, _, s)| *s).collect();
        {
            let mut var = file.add_variable::<i32>("row", &["n_s"])?;
            var.put_values(&rows, Some(&[0]), Some(&[n]))?;
        }
        {
            let mut var = file.add_variable::<i32>("col", &["n_s"])?;
            var.put_values(&cols, Some(&[0]), Some(&[n]))?;
        }
        {
            let mut var = file.add_variable::<f64>("S", &["n_s"])?;
            var.put_values(&values, Some(&[0]), Some(&[n]))?;
        }
        file.add_attribute("map_method", weights.method.name())?;
        file.add_attribute("source_grid", weights.source_grid.as_str())?;
        file.add_attribute("destination_grid", weights.destination_grid.as_str())?;
        info!(path = %path.display(), nnz = n, "saved regrid weights");
        Ok(())
    }
}

/// Accept our own method names and the descriptive ones other tools write.
fn method_from_attribute(text: &str) -> Result<RegridMethod> {
    if let Ok(method) = text.parse() {
        return Ok(method);
    }
    let lower = text.to_lowercase();
    let method = if lower.contains("conserv") && lower.contains("2nd") {
        RegridMethod::Conservative2nd
    } else if lower.contains("conserv") {
        RegridMethod::Conservative1st
    } else if lower.contains("bilinear") {
        RegridMethod::Bilinear
    } else if lower.contains("patch") {
        RegridMethod::Patch
    } else if lower.contains("nearest") {
        RegridMethod::NearestSourceToDest
    } else {
        return Err(Error::UnsupportedMethod(text.to_string()));
    };
    Ok(method)
}

fn unit_sphere(lon: f64, lat: f64) -> [f64; 3] {
    let (lon, lat) = (lon.to_radians(), lat.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

type PointTree = kd_tree::KdTree3<(usize, [f64; 3])>;

fn point_tree(topology: &GridTopology) -> PointTree {
    let points: Vec<(usize, [f64; 3])> = topology
        .operator_points()
        .into_iter()
        .map(|(lon, lat)| unit_sphere(lon, lat))
        .enumerate()
        .collect();
    kd_tree::KdTree3::build_by_key(points, |item, k| OrderedFloat(item.1[k]))
}

fn nearest(tree: &PointTree, lon: f64, lat: f64) -> Result<usize> {
    tree.nearest_by(&unit_sphere(lon, lat), |item, k| item.1[k])
        .map(|found| found.item.0)
        .ok_or_else(|| Error::shape("nearest-neighbour search over an empty grid"))
}

/// Every destination cell takes the value of its nearest source cell.
fn nearest_source_to_dest(src: &GridTopology, dst: &GridTopology) -> Result<Vec<(usize, usize, f64)>> {
    let tree = point_tree(src);
    dst.operator_points()
        .into_iter()
        .enumerate()
        .map(|(row, (lon, lat))| Ok((row, nearest(&tree, lon, lat)?, 1.0)))
        .collect()
}

/// Every source cell goes to its nearest destination cell; a destination
/// cell reached by several sources takes their mean.
fn nearest_dest_to_source(src: &GridTopology, dst: &GridTopology) -> Result<Vec<(usize, usize, f64)>> {
    let tree = point_tree(dst);
    let targets = src
        .operator_points()
        .into_iter()
        .map(|(lon, lat)| nearest(&tree, lon, lat))
        .collect::<Result<Vec<usize>>>()?;
    let mut counts = vec![0usize; dst.size()];
    targets.iter().for_each(|row| counts[*row] += 1);
    Ok(targets
        .into_iter()
        .enumerate()
        .map(|(col, row)| (row, col, 1.0 / counts[row] as f64))
        .collect())
}

fn is_periodic(grid: &FvGrid) -> bool {
    let dlon = grid.lon[1] - grid.lon[0];
    (grid.nlon() as f64 * dlon - 360.0).abs() < 1e-6 * 360.0
}

/// Bilinear interpolation from an FV source to destination cell centres.
fn bilinear(grid: &FvGrid, dst: &GridTopology) -> Vec<(usize, usize, f64)> {
    let (nlon, nlat) = (grid.nlon(), grid.nlat());
    let periodic = is_periodic(grid);
    let lon0 = grid.lon[0];
    let lat = &grid.lat;
    let index = |i: usize, j: usize| i * nlat + j;

    let mut triplets = Vec::new();
    for (row, (x, y)) in dst.operator_points().into_iter().enumerate() {
        if y < lat[0] || y > lat[nlat - 1] {
            continue;
        }
        let j = (0..nlat - 1).find(|&j| y <= lat[j + 1]).unwrap_or(nlat - 2);
        let fy = (y - lat[j]) / (lat[j + 1] - lat[j]);

        let (i0, i1, fx) = if periodic {
            let x = (x - lon0).rem_euclid(360.0) + lon0;
            match (0..nlon - 1).find(|&i| x <= grid.lon[i + 1]) {
                Some(i) => (i, i + 1, (x - grid.lon[i]) / (grid.lon[i + 1] - grid.lon[i])),
                None => {
                    let width = lon0 + 360.0 - grid.lon[nlon - 1];
                    (nlon - 1, 0, (x - grid.lon[nlon - 1]) / width)
                }
            }
        } else {
            if x < lon0 || x > grid.lon[nlon - 1] {
                continue;
            }
            let i = (0..nlon - 1).find(|&i| x <= grid.lon[i + 1]).unwrap_or(nlon - 2);
            (i, i + 1, (x - grid.lon[i]) / (grid.lon[i + 1] - grid.lon[i]))
        };

        for (col, w) in [
            (index(i0, j), (1.0 - fx) * (1.0 - fy)),
            (index(i1, j), fx * (1.0 - fy)),
            (index(i0, j + 1), (1.0 - fx) * fy),
            (index(i1, j + 1), fx * fy),
        ] {
            if w > 0.0 {
                triplets.push((row, col, w));
            }
        }
    }
    triplets
}

fn longitude_edges(grid: &FvGrid) -> Vec<(f64, f64)> {
    match &grid.lon_bounds {
        Some(bounds) => bounds
            .rows()
            .into_iter()
            .map(|b| (b[0].min(b[1]), b[0].max(b[1])))
            .collect(),
        None => grid
            .lon
            .iter()
            .zip(longitude_widths(grid))
            .map(|(c, w)| (c - w / 2.0, c + w / 2.0))
            .collect(),
    }
}

/// Overlap of two longitude intervals on the circle, in degrees.
fn longitude_overlap(a: (f64, f64), b: (f64, f64)) -> f64 {
    [-360.0, 0.0, 360.0]
        .iter()
        .map(|shift| (a.1.min(b.1 + shift) - a.0.max(b.0 + shift)).max(0.0))
        .sum()
}

/// Overlapping index pairs of two sets of intervals with their overlap.
fn overlaps(
    a: &[(f64, f64)],
    b: &[(f64, f64)],
    overlap: impl Fn((f64, f64), (f64, f64)) -> f64,
) -> Vec<(usize, usize, f64)> {
    let mut pairs = Vec::new();
    for (ia, &ea) in a.iter().enumerate() {
        for (ib, &eb) in b.iter().enumerate() {
            let o = overlap(ea, eb);
            if o > 0.0 {
                pairs.push((ia, ib, o));
            }
        }
    }
    pairs
}

/// First-order conservative weights between FV grids: the fraction of each
/// destination cell covered by each source cell.
fn conservative_fv(src: &FvGrid, dst: &FvGrid) -> Vec<(usize, usize, f64)> {
    let sin_band = |(s, n): (f64, f64)| n.to_radians().sin() - s.to_radians().sin();
    let lat_pairs = overlaps(&latitude_edges(dst), &latitude_edges(src), |a, b| {
        let (s, n) = (a.0.max(b.0), a.1.min(b.1));
        if n > s {
            sin_band((s, n))
        } else {
            0.0
        }
    });
    let lon_pairs = overlaps(&longitude_edges(dst), &longitude_edges(src), longitude_overlap);

    let dst_bands: Vec<f64> = latitude_edges(dst).into_iter().map(sin_band).collect();
    let dst_widths: Vec<f64> = longitude_edges(dst).into_iter().map(|(w, e)| e - w).collect();
    let (nlat_src, nlat_dst) = (src.nlat(), dst.nlat());

    let mut triplets = Vec::with_capacity(lat_pairs.len() * lon_pairs.len() / dst.nlon().max(1));
    for &(id, is, lon_overlap) in &lon_pairs {
        for &(jd, js, band_overlap) in &lat_pairs {
            let weight = (lon_overlap / dst_widths[id]) * (band_overlap / dst_bands[jd]);
            if weight > 0.0 {
                triplets.push((id * nlat_dst + jd, is * nlat_src + js, weight));
            }
        }
    }
    debug!(weights = triplets.len(), "computed conservative overlaps");
    triplets
}
