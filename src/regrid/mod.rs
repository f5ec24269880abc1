//! Regridding of gridded fields between FV grids and SE meshes.
//!
//! The driver acquires an interpolation operator (loaded or generated),
//! then applies it to every spatial slice of each requested field. Up to two
//! non-spatial leading dimensions (e.g. `time`, `lev`) are looped over; the
//! spatial dimensions must be trailing.
//!
//! Results are either collected in memory and written at the end
//! ([`Strategy::Buffered`]) or written field by field so that only one
//! destination field is held at a time ([`Strategy::Streaming`]).

pub mod diagnostic;
pub mod output;
pub mod weights;

use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use tracing::{debug, info, warn};

use crate::config::{OutputType, RegridConfig};
use crate::error::{Error, Result};
use crate::field::{self, AttrValue, Attributes, Coordinate, FieldCollection, FieldSource};
use crate::grid::area::{se_cell_areas, EARTH_RADIUS};
use crate::grid::{detect_grid_type, GridDescription, GridTopology};
use crate::provenance;
use crate::time::REFERENCE_UNITS;
use crate::units::{UnitConverter, UnitSpec};

use self::diagnostic::{ConservationCheck, ConservationReport};
use self::output::{NetcdfStore, OutputStore};
use self::weights::{RegridWeights, SparseWeightProvider, UnmappedAction, WeightProvider};

/// Where the interpolation operator comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightSource {
    Load(PathBuf),
    Generate { save_to: Option<PathBuf> },
}

impl WeightSource {
    pub fn from_config(config: &RegridConfig) -> Self {
        match &config.weights {
            Some(path) => WeightSource::Load(path.clone()),
            None => WeightSource::Generate {
                save_to: config.save_weights.as_ref().map(|path| {
                    if config.date_stamp {
                        provenance::dated_today(path)
                    } else {
                        path.clone()
                    }
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Buffered,
    Streaming,
}

/// A field on the destination grid.
#[derive(Debug, Clone)]
pub struct RegriddedField {
    name: String,
    dims: Vec<String>,
    values: ArrayD<f64>,
    coords: Vec<(String, Coordinate)>,
    attributes: Attributes,
}

impl RegriddedField {
    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }
}

impl FieldSource for RegriddedField {
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

/// What a run produced.
#[derive(Debug, Default)]
pub struct RegridOutcome {
    /// In-memory results; empty for streaming and weights-only runs
    pub fields: Vec<RegriddedField>,
    pub reports: Vec<ConservationReport>,
    /// Where generated weights were saved
    pub saved_weights: Option<PathBuf>,
}

/// The loaded operator together with the slice buffers it works on.
///
/// Reused across slices and fields; one context per driver.
pub struct RegridContext {
    weights: RegridWeights,
    src_buf: Vec<f64>,
    dst_buf: Vec<f64>,
}

impl RegridContext {
    pub fn new(weights: RegridWeights) -> Self {
        let src_buf = vec![0.0; weights.n_src];
        let dst_buf = vec![0.0; weights.n_dst];
        Self {
            weights,
            src_buf,
            dst_buf,
        }
    }

    pub fn weights(&self) -> &RegridWeights {
        &self.weights
    }

    /// Regrid one spatial slice given and returned in storage order.
    fn regrid_slice<P: WeightProvider + ?Sized>(
        &mut self,
        provider: &P,
        source: &GridTopology,
        destination: &GridTopology,
        slice: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        to_operator_order(source, slice, &mut self.src_buf);
        provider.apply(&self.weights, &self.src_buf, &mut self.dst_buf)?;
        from_operator_order(destination, &self.dst_buf, out);
        Ok(())
    }
}

/// `(lat, lon)` storage to the operator's `(lon, lat)` order.
fn to_operator_order(topology: &GridTopology, storage: &[f64], operator: &mut [f64]) {
    match topology {
        GridTopology::Fv(grid) => {
            let (nlat, nlon) = (grid.nlat(), grid.nlon());
            for j in 0..nlat {
                for i in 0..nlon {
                    operator[i * nlat + j] = storage[j * nlon + i];
                }
            }
        }
        GridTopology::Se(_) => operator.copy_from_slice(storage),
    }
}

fn from_operator_order(topology: &GridTopology, operator: &[f64], storage: &mut [f64]) {
    match topology {
        GridTopology::Fv(grid) => {
            let (nlat, nlon) = (grid.nlat(), grid.nlon());
            for i in 0..nlon {
                for j in 0..nlat {
                    storage[j * nlon + i] = operator[i * nlat + j];
                }
            }
        }
        GridTopology::Se(_) => storage.copy_from_slice(operator),
    }
}

/// Leading (non-spatial) dimensions of a field on `topology`.
fn leading_dims(name: &str, dims: &[String], topology: &GridTopology) -> Result<Vec<String>> {
    let grid_type = detect_grid_type(name, dims)?;
    if grid_type != topology.grid_type() {
        return Err(Error::shape(format!(
            "'{name}' is on a {grid_type} grid, the source grid is {}",
            topology.grid_type()
        )));
    }
    let spatial = topology.spatial_dims();
    let split = dims.len().saturating_sub(spatial.len());
    if dims.len() < spatial.len() || dims[split..].iter().zip(spatial).any(|(d, s)| d != s) {
        return Err(Error::shape(format!(
            "spatial dimensions {spatial:?} of '{name}' must be trailing, found {dims:?}"
        )));
    }
    let leading = dims[..split].to_vec();
    if leading.len() > 2 {
        return Err(Error::TooManyLeadingDimensions(leading));
    }
    Ok(leading)
}

/// A field that passed validation, with the units the check will need.
struct FieldPlan {
    name: String,
    units: Option<UnitSpec>,
}

pub struct RegridDriver<P: WeightProvider = SparseWeightProvider> {
    provider: P,
    source: GridDescription,
    destination: GridDescription,
    config: RegridConfig,
    context: Option<RegridContext>,
}

impl RegridDriver<SparseWeightProvider> {
    pub fn with_sparse_weights(
        source: GridDescription,
        destination: GridDescription,
        config: RegridConfig,
    ) -> Self {
        Self::new(SparseWeightProvider, source, destination, config)
    }
}

impl<P: WeightProvider> RegridDriver<P> {
    pub fn new(provider: P, source: GridDescription, destination: GridDescription, config: RegridConfig) -> Self {
        Self {
            provider,
            source,
            destination,
            config,
            context: None,
        }
    }

    pub fn context(&self) -> Option<&RegridContext> {
        self.context.as_ref()
    }

    /// Load or generate the operator; returns where generated weights were
    /// saved, if anywhere.
    pub fn acquire_weights(&mut self, source: &WeightSource) -> Result<Option<PathBuf>> {
        let src = &self.source.topology;
        let dst = &self.destination.topology;
        let (weights, saved) = match source {
            WeightSource::Load(path) => {
                let weights = self.provider.load(path)?;
                if weights.n_src != src.size() || weights.n_dst != dst.size() {
                    return Err(Error::shape(format!(
                        "weights in {} map {} -> {} cells, grids have {} -> {}",
                        path.display(),
                        weights.n_src,
                        weights.n_dst,
                        src.size(),
                        dst.size()
                    )));
                }
                (weights, None)
            }
            WeightSource::Generate { save_to } => {
                let weights = self.generate()?;
                if let Some(path) = save_to {
                    self.provider.save(&weights, path)?;
                }
                (weights, save_to.clone())
            }
        };
        self.context = Some(RegridContext::new(weights));
        Ok(saved)
    }

    /// Generate with unmapped cells as errors, then once more ignoring them.
    fn generate(&self) -> Result<RegridWeights> {
        let method = self.config.method;
        match self
            .provider
            .generate(&self.source, &self.destination, method, UnmappedAction::Error)
        {
            Ok(weights) => Ok(weights),
            Err(first) => {
                warn!(%method, error = %first, "weight generation failed, retrying with unmapped cells ignored");
                self.provider
                    .generate(&self.source, &self.destination, method, UnmappedAction::Ignore)
                    .map_err(|e| match e {
                        e @ Error::RegridGenerationFailed { .. } => e,
                        other => Error::RegridGenerationFailed {
                            method: method.to_string(),
                            reason: other.to_string(),
                        },
                    })
            }
        }
    }

    /// Regrid every spatial slice of one field into memory.
    pub fn regrid_field(&mut self, field: &dyn FieldSource) -> Result<RegriddedField> {
        let src = &self.source.topology;
        let dst = &self.destination.topology;
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::missing("regrid weights; acquire them before regridding"))?;

        let name = field.name();
        let leading = leading_dims(name, field.dims(), src)?;
        let values = field.values();
        let nlead = leading.len();
        if values.shape()[nlead..] != src.spatial_shape()[..] {
            return Err(Error::shape(format!(
                "'{name}' has spatial shape {:?}, the source grid has {:?}",
                &values.shape()[nlead..],
                src.spatial_shape()
            )));
        }
        let lead_shape = values.shape()[..nlead].to_vec();
        let (src_size, dst_size) = (src.size(), dst.size());
        let n_slices: usize = lead_shape.iter().product();

        let standard = values.as_standard_layout();
        let flat = standard
            .as_slice()
            .ok_or_else(|| Error::shape(format!("values of '{name}' are not contiguous")))?;
        let mut out = vec![0.0; n_slices * dst_size];
        for (k, (slice, target)) in flat
            .chunks(src_size)
            .zip(out.chunks_mut(dst_size))
            .enumerate()
        {
            debug!(field = name, slice = k, "regridding");
            context.regrid_slice(&self.provider, src, dst, slice, target)?;
        }

        let mut shape = lead_shape;
        shape.extend(dst.spatial_shape());
        let values = ArrayD::from_shape_vec(IxDyn(&shape), out)
            .map_err(|e| Error::shape(e.to_string()))?;
        let mut dims = leading.clone();
        dims.extend(dst.spatial_dims().iter().map(|d| d.to_string()));
        let coords = leading
            .iter()
            .filter_map(|d| field.coordinate(d).map(|c| (d.clone(), c.clone())))
            .collect();

        let mut attributes = field.attributes().clone();
        if let Some(unit) = &self.config.unit {
            attributes.set("units", unit.as_str());
        }
        if let Some(mw) = self.config.molecular_weight {
            attributes.set("molecular_weight", mw);
            attributes.set("molecular_weight_units", "g/mol");
        }

        Ok(RegriddedField {
            name: name.to_string(),
            dims,
            values,
            coords,
            attributes,
        })
    }

    /// Regrid the configured fields of `collection`, writing to `store` when
    /// one is given.
    pub fn run(
        &mut self,
        collection: &dyn FieldCollection,
        store: Option<&mut dyn OutputStore>,
    ) -> Result<RegridOutcome> {
        let started = Instant::now();
        let (plans, outcome) = self.prepare(collection)?;
        if self.config.weights_only {
            return Ok(outcome);
        }
        self.execute(collection, &plans, outcome, store, started)
    }

    /// Like [`run`](Self::run), but writes to a netCDF file that is only
    /// created once every field is validated and the weights are in hand.
    /// A run that fails after that removes the file again.
    pub fn run_to_file(&mut self, collection: &dyn FieldCollection, path: &Path) -> Result<RegridOutcome> {
        let started = Instant::now();
        let (plans, outcome) = self.prepare(collection)?;
        if self.config.weights_only {
            return Ok(outcome);
        }

        let mut store = NetcdfStore::create(path)?;
        let result = self.execute(collection, &plans, outcome, Some(&mut store), started);
        drop(store);
        if result.is_err() {
            match std::fs::remove_file(path) {
                Ok(()) => warn!(path = %path.display(), "removed partial output"),
                Err(error) => warn!(path = %path.display(), %error, "could not remove partial output"),
            }
        }
        result
    }

    /// Validate the fields and acquire the operator.
    fn prepare(&mut self, collection: &dyn FieldCollection) -> Result<(Vec<FieldPlan>, RegridOutcome)> {
        let started = Instant::now();
        let plans = self.plan(collection)?;
        info!(fields = plans.len(), elapsed = ?started.elapsed(), "validated fields");

        let phase = Instant::now();
        let saved_weights = self.acquire_weights(&WeightSource::from_config(&self.config))?;
        info!(elapsed = ?phase.elapsed(), "acquired weights");
        if self.config.weights_only {
            info!("weights only; skipping regridding");
        }
        let outcome = RegridOutcome {
            saved_weights,
            ..Default::default()
        };
        Ok((plans, outcome))
    }

    fn execute(
        &mut self,
        collection: &dyn FieldCollection,
        plans: &[FieldPlan],
        mut outcome: RegridOutcome,
        mut store: Option<&mut dyn OutputStore>,
        started: Instant,
    ) -> Result<RegridOutcome> {
        let strategy = match (self.config.streaming, store.is_some()) {
            (true, true) => Strategy::Streaming,
            (true, false) => {
                warn!("streaming needs an output store; regridding in memory instead");
                Strategy::Buffered
            }
            (false, _) => Strategy::Buffered,
        };

        let phase = Instant::now();
        if let Some(store) = store.as_deref_mut() {
            self.write_header(store, collection)?;
        }
        match strategy {
            Strategy::Streaming => {
                for plan in plans {
                    let source = collection.load(&plan.name)?;
                    let result = self.regrid_field(source.as_ref())?;
                    outcome.reports.extend(self.check(plan, source.as_ref(), &result));
                    if let Some(store) = store.as_deref_mut() {
                        self.write_field(store, &result)?;
                    }
                    debug!(field = %plan.name, "released field");
                }
            }
            Strategy::Buffered => {
                let mut sources = Vec::with_capacity(plans.len());
                for plan in plans {
                    let source = collection.load(&plan.name)?;
                    outcome.fields.push(self.regrid_field(source.as_ref())?);
                    sources.push(source);
                }
                for ((plan, source), result) in plans.iter().zip(&sources).zip(&outcome.fields) {
                    outcome.reports.extend(self.check(plan, source.as_ref(), result));
                }
                if let Some(store) = store.as_deref_mut() {
                    for result in &outcome.fields {
                        self.write_field(store, result)?;
                    }
                }
            }
        }
        if let Some(store) = store.as_deref_mut() {
            self.write_pass_through(store, collection)?;
            info!(output = %store.identifier(), "wrote regridded fields");
        }
        info!(?strategy, elapsed = ?phase.elapsed(), total = ?started.elapsed(), "regridding finished");
        Ok(outcome)
    }

    /// Validate every field before any weights or output are produced.
    fn plan(&self, collection: &dyn FieldCollection) -> Result<Vec<FieldPlan>> {
        let src = &self.source.topology;
        let names = if self.config.fields.is_empty() {
            collection
                .field_names()
                .into_iter()
                .filter(|name| {
                    collection
                        .field_dims(name)
                        .ok()
                        .and_then(|dims| detect_grid_type(name, dims.as_slice()).ok())
                        == Some(src.grid_type())
                })
                .collect()
        } else {
            self.config.fields.clone()
        };

        let mut plans = Vec::with_capacity(names.len());
        for name in names {
            let dims = collection.field_dims(&name)?;
            leading_dims(&name, &dims, src)?;
            let units = if self.config.check_conservation {
                let attributes = collection.field_attributes(&name)?;
                let units = field::unit_spec_from(
                    &name,
                    &attributes,
                    self.config.unit.as_deref(),
                    self.config.molecular_weight,
                )?;
                UnitConverter::new(&units, self.config.ignore_warnings)?;
                Some(units)
            } else {
                None
            };
            plans.push(FieldPlan { name, units });
        }
        Ok(plans)
    }

    /// Compare totals of the first and last slice; failures only warn.
    fn check(
        &self,
        plan: &FieldPlan,
        source: &dyn FieldSource,
        result: &RegriddedField,
    ) -> Vec<ConservationReport> {
        let Some(units) = &plan.units else {
            return Vec::new();
        };
        let src = &self.source.topology;
        let dst = &self.destination.topology;
        let check = ConservationCheck {
            source: src,
            destination: dst,
            quiet: self.config.ignore_warnings,
        };
        let src_values = source.values();
        let src_values = src_values.as_standard_layout();
        let (Some(src_flat), Some(dst_flat)) = (src_values.as_slice(), result.values.as_slice()) else {
            warn!(field = %plan.name, "conservation check skipped for non-contiguous values");
            return Vec::new();
        };
        let n_slices = src_flat.len() / src.size();
        let mut slices = vec![0, n_slices.saturating_sub(1)];
        slices.dedup();

        let mut reports = Vec::new();
        for k in slices {
            let src_slice = &src_flat[k * src.size()..(k + 1) * src.size()];
            let dst_slice = &dst_flat[k * dst.size()..(k + 1) * dst.size()];
            let compared = ArrayViewD::from_shape(IxDyn(&src.spatial_shape()), src_slice)
                .and_then(|s| {
                    ArrayViewD::from_shape(IxDyn(&dst.spatial_shape()), dst_slice).map(|d| (s, d))
                })
                .map_err(|e| Error::shape(e.to_string()))
                .and_then(|(s, d)| check.compare(&plan.name, k, units, s, d));
            match compared {
                Ok(report) => reports.push(report),
                Err(error) => warn!(field = %plan.name, %error, "conservation check failed"),
            }
        }
        reports
    }

    fn write_header(&self, store: &mut dyn OutputStore, collection: &dyn FieldCollection) -> Result<()> {
        match &self.destination.topology {
            GridTopology::Fv(grid) => {
                for (name, values, attributes) in [
                    ("lat", grid.lat.to_vec(), &grid.lat_attributes),
                    ("lon", grid.lon.to_vec(), &grid.lon_attributes),
                ] {
                    store.define_dimension(name, values.len(), false)?;
                    store.define_variable(name, &[name], OutputType::F8, attributes)?;
                    store.write(name, &[0], &[values.len()], &values)?;
                }
            }
            GridTopology::Se(mesh) => {
                let n = mesh.len();
                store.define_dimension("ncol", n, false)?;
                let indices: Vec<f64> = (0..n).map(|i| i as f64).collect();
                let mut side = vec![
                    ("ncol", indices, "1", "node index"),
                    ("lon", mesh.center_lon.to_vec(), "degrees_east", "longitude"),
                    ("lat", mesh.center_lat.to_vec(), "degrees_north", "latitude"),
                ];
                if mesh.area.is_some() {
                    let area = se_cell_areas(mesh)?.mapv(|a| a / (EARTH_RADIUS * EARTH_RADIUS));
                    side.push(("area", area.to_vec(), "radians^2", "area weights"));
                }
                if let Some(rrfac) = &mesh.rrfac {
                    side.push(("rrfac", rrfac.to_vec(), "1", "refinement factor"));
                }
                for (name, values, units, long_name) in side {
                    let mut attributes = Attributes::default();
                    attributes.set("long_name", long_name);
                    attributes.set("units", units);
                    store.define_variable(name, &["ncol"], OutputType::F8, &attributes)?;
                    store.write(name, &[0], &[n], &values)?;
                }
            }
        }

        for (name, value) in collection.global_attributes().iter() {
            store.set_global_attribute(name, value)?;
        }
        let globals = [
            (
                "comment_regridding",
                format!("regridded with the {} method", self.config.method),
            ),
            ("regridded_by", provenance::TOOL_IDENTITY.to_string()),
            ("regridding_time", provenance::timestamp()),
            ("source_grid", self.source.identifier.clone()),
            ("destination_grid", self.destination.identifier.clone()),
            ("regridding_username", provenance::user_and_host()),
        ];
        for (name, value) in globals {
            store.set_global_attribute(name, &AttrValue::Text(value))?;
        }
        Ok(())
    }

    /// Define `dim` (and its coordinate variable) unless the store has it.
    fn ensure_dimension(
        &self,
        store: &mut dyn OutputStore,
        field: &dyn FieldSource,
        dim: &str,
        len: usize,
    ) -> Result<()> {
        let unlimited = dim == "time";
        match store.dimension_len(dim) {
            Some(existing) if existing == len || (unlimited && existing == 0) => return Ok(()),
            Some(existing) => {
                return Err(Error::shape(format!(
                    "'{}' needs {len} values along '{dim}', the output has {existing}",
                    field.name()
                )))
            }
            None => store.define_dimension(dim, len, unlimited)?,
        }

        let time = if unlimited {
            field::time_axis(field).ok().flatten()
        } else {
            None
        };
        let (values, attributes) = match (time, field.coordinate(dim)) {
            (Some(axis), coord) => {
                let mut attributes = coord.map(|c| c.attributes.clone()).unwrap_or_default();
                attributes.set("units", REFERENCE_UNITS);
                attributes.set("calendar", axis.calendar().to_string());
                (axis.day_offset.iter().map(|d| *d as f64).collect(), attributes)
            }
            (None, Some(coord)) => (coord.values.to_vec(), coord.attributes.clone()),
            (None, None) => ((0..len).map(|i| i as f64).collect(), Attributes::default()),
        };
        if !store.has_variable(dim) {
            store.define_variable(dim, &[dim], OutputType::F8, &attributes)?;
            store.write(dim, &[0], &[len], &values)?;
        }
        Ok(())
    }

    fn write_field(&self, store: &mut dyn OutputStore, field: &RegriddedField) -> Result<()> {
        let shape = field.values.shape().to_vec();
        let spatial = self.destination.topology.spatial_dims().len();
        let nlead = shape.len() - spatial;
        for (dim, len) in field.dims[..nlead].iter().zip(&shape) {
            self.ensure_dimension(store, field, dim, *len)?;
        }
        let dims: Vec<&str> = field.dims.iter().map(String::as_str).collect();
        store.define_variable(&field.name, &dims, self.config.output_type, &field.attributes)?;

        let slice_size = self.destination.topology.size();
        let flat = field
            .values
            .as_slice()
            .ok_or_else(|| Error::shape(format!("values of '{}' are not contiguous", field.name)))?;
        let mut count = vec![1; nlead];
        count.extend(&shape[nlead..]);
        let scale = self.config.scale_factor;
        for (k, slice) in flat.chunks(slice_size).enumerate() {
            let mut start = unravel(k, &shape[..nlead]);
            start.extend(std::iter::repeat(0).take(spatial));
            let scaled: Vec<f64> = slice.iter().map(|v| v * scale).collect();
            store.write(&field.name, &start, &count, &scaled)?;
        }
        debug!(field = %field.name, output = %store.identifier(), "wrote field");
        Ok(())
    }

    fn write_pass_through(&self, store: &mut dyn OutputStore, collection: &dyn FieldCollection) -> Result<()> {
        for name in &self.config.pass_through {
            if store.has_variable(name) {
                debug!(field = %name, "already written; not passed through");
                continue;
            }
            let field = collection.load(name)?;
            let values = field.values();
            for (dim, len) in field.dims().iter().zip(values.shape()) {
                self.ensure_dimension(store, field.as_ref(), dim, *len)?;
            }
            let dims: Vec<&str> = field.dims().iter().map(String::as_str).collect();
            store.define_variable(name, &dims, OutputType::F8, field.attributes())?;
            let standard = values.as_standard_layout();
            let flat = standard
                .as_slice()
                .ok_or_else(|| Error::shape(format!("values of '{name}' are not contiguous")))?;
            store.write(name, &vec![0; dims.len()], values.shape(), flat)?;
            debug!(field = %name, "passed through");
        }
        Ok(())
    }
}

/// Row-major multi-index of flat position `k` within `shape`.
fn unravel(mut k: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        index[axis] = k % shape[axis];
        k /= shape[axis];
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{FvGrid, SeMesh};

    #[test]
    fn operator_order_is_a_transpose() {
        let topology = GridTopology::Fv(FvGrid::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).unwrap());
        // storage (lat, lon): row 0 = [0, 1, 2], row 1 = [3, 4, 5]
        let storage = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut operator = [0.0; 6];
        to_operator_order(&topology, &storage, &mut operator);
        assert_eq!(operator, [0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        let mut back = [0.0; 6];
        from_operator_order(&topology, &operator, &mut back);
        assert_eq!(back, storage);
    }

    #[test]
    fn leading_dimensions_are_checked() {
        let topology = GridTopology::Fv(FvGrid::global(30.0, 30.0).unwrap());
        let dims = |d: &[&str]| d.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            leading_dims("x", &dims(&["time", "lev", "lat", "lon"]), &topology).unwrap(),
            vec!["time", "lev"]
        );
        assert!(matches!(
            leading_dims("x", &dims(&["a", "b", "c", "lat", "lon"]), &topology),
            Err(Error::TooManyLeadingDimensions(_))
        ));
        assert!(matches!(
            leading_dims("x", &dims(&["lat", "lon", "time"]), &topology),
            Err(Error::InputShapeMismatch(_))
        ));
        assert!(matches!(
            leading_dims("x", &dims(&["lon", "lat"]), &topology),
            Err(Error::InputShapeMismatch(_))
        ));
        let mesh = GridTopology::Se(SeMesh::new(vec![0.0], vec![0.0]).unwrap());
        assert!(matches!(
            leading_dims("x", &dims(&["time", "lat", "lon"]), &mesh),
            Err(Error::InputShapeMismatch(_))
        ));
    }

    #[test]
    fn unravel_is_row_major() {
        assert_eq!(unravel(5, &[2, 3]), vec![1, 2]);
        assert_eq!(unravel(0, &[]), Vec::<usize>::new());
    }

    #[test]
    fn regridding_needs_weights() {
        let grid = GridDescription::new(GridTopology::Fv(FvGrid::global(30.0, 30.0).unwrap()), "g");
        let mut driver = RegridDriver::with_sparse_weights(grid.clone(), grid, RegridConfig::default());
        let field = field::RawField::new("x", ArrayD::zeros(IxDyn(&[6, 12])), &["lat", "lon"]).unwrap();
        assert!(matches!(driver.regrid_field(&field), Err(Error::MissingData(_))));
    }
}
