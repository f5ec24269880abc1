//! Area-, time- and level-integrated emission totals.

use ndarray::{s, Array2, Array3, ArrayViewD};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::field::{self, FieldSource};
use crate::grid::area::cell_areas;
use crate::grid::region::{select_fv, select_se, IndexSelection, RegionBounds};
use crate::grid::GridTopology;
use crate::time::{CalendarDate, DateRange, TimeAxis, SECONDS_PER_DAY};
use crate::units::{UnitConverter, UnitSpec};
use crate::vertical::{VerticalAxis, VERTICAL_DIMS};

fn default_ndays() -> u32 {
    31
}

/// Options of one aggregation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub region: RegionBounds,
    pub date_range: Option<DateRange>,
    /// Days represented by a field without a time axis
    #[serde(default = "default_ndays")]
    pub ndays: u32,
    /// Sum a time series into a single total
    pub reduce_time: bool,
    /// Suppress unit-default warnings
    pub ignore_warnings: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            region: RegionBounds::default(),
            date_range: None,
            ndays: default_ndays(),
            reduce_time: false,
            ignore_warnings: false,
        }
    }
}

pub fn to_gigagrams(kg: f64) -> f64 {
    kg / 1e6
}

pub fn to_grams(kg: f64) -> f64 {
    kg * 1e3
}

/// Total of one time step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTotal {
    pub date: CalendarDate,
    /// Kilograms; zero for steps outside the requested date range
    pub kg: f64,
    /// Kilograms per vertical level; empty without a vertical axis
    pub per_level: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmissionTotal {
    Scalar { kg: f64, per_level: Vec<f64> },
    Series(Vec<StepTotal>),
}

impl EmissionTotal {
    /// Total over all steps, in kilograms.
    pub fn kg(&self) -> f64 {
        match self {
            EmissionTotal::Scalar { kg, .. } => *kg,
            EmissionTotal::Series(steps) => steps.iter().map(|s| s.kg).sum(),
        }
    }

    pub fn gigagrams(&self) -> f64 {
        to_gigagrams(self.kg())
    }

    pub fn grams(&self) -> f64 {
        to_grams(self.kg())
    }
}

/// Integrates flux fields on a fixed topology.
pub struct EmissionAggregator<'a> {
    topology: &'a GridTopology,
    config: AggregationConfig,
}

impl<'a> EmissionAggregator<'a> {
    pub fn new(topology: &'a GridTopology, config: AggregationConfig) -> Self {
        Self { topology, config }
    }

    /// Aggregate a field using its own unit attributes (or the overrides)
    /// and its `time` coordinate, if any.
    pub fn aggregate_field(
        &self,
        field: &dyn FieldSource,
        unit: Option<&str>,
        molecular_weight: Option<f64>,
        vertical: Option<&VerticalAxis>,
    ) -> Result<EmissionTotal> {
        let units = field::unit_spec(field, unit, molecular_weight)?;
        let time = field::time_axis(field)?;
        let dims: Vec<&str> = field.dims().iter().map(String::as_str).collect();
        self.aggregate(field.values(), &dims, &units, time.as_ref(), vertical)
    }

    /// Aggregate raw values laid out along `dims`.
    pub fn aggregate(
        &self,
        values: ArrayViewD<'_, f64>,
        dims: &[&str],
        units: &UnitSpec,
        time: Option<&TimeAxis>,
        vertical: Option<&VerticalAxis>,
    ) -> Result<EmissionTotal> {
        let converter = UnitConverter::new(units, self.config.ignore_warnings)?;
        let layout = Layout::locate(values.shape(), dims, self.topology, time, vertical)?;

        let permuted = values.permuted_axes(layout.order.clone());
        let data: Array3<f64> = permuted
            .as_standard_layout()
            .into_owned()
            .into_shape((layout.nt, layout.nz, layout.ncell))
            .map_err(|e| Error::shape(e.to_string()))?;

        let weights = self.cell_weights(converter.factor)?;
        let thickness = match vertical {
            Some(axis) => axis.thickness(),
            None => vec![1.0],
        };

        // kg/s per step and level; masked (NaN) cells contribute nothing
        let rates = Array2::from_shape_fn((layout.nt, layout.nz), |(t, z)| {
            data.slice(s![t, z, ..])
                .iter()
                .zip(&weights)
                .filter(|(v, _)| !v.is_nan())
                .map(|(v, w)| v * w)
                .sum::<f64>()
                * thickness[z]
        });

        let Some(time) = time else {
            let seconds = f64::from(self.config.ndays) * SECONDS_PER_DAY;
            let per_level: Vec<f64> = (0..layout.nz).map(|z| rates[[0, z]] * seconds).collect();
            return Ok(EmissionTotal::Scalar {
                kg: per_level.iter().sum(),
                per_level: if vertical.is_some() { per_level } else { Vec::new() },
            });
        };

        let seconds = time.seconds_per_step()?;
        let selected = time.select(self.config.date_range.as_ref())?;
        let mut in_range = vec![false; layout.nt];
        for &t in &selected {
            if let Some(flag) = in_range.get_mut(t) {
                *flag = true;
            }
        }
        let steps: Vec<StepTotal> = (0..layout.nt)
            .map(|t| {
                let duration = if in_range[t] { seconds[t] } else { 0.0 };
                let per_level: Vec<f64> =
                    (0..layout.nz).map(|z| rates[[t, z]] * duration).collect();
                StepTotal {
                    date: time.dates[t],
                    kg: per_level.iter().sum(),
                    per_level: if vertical.is_some() { per_level } else { Vec::new() },
                }
            })
            .collect();
        debug!(steps = steps.len(), selected = selected.len(), "aggregated time series");

        if self.config.reduce_time {
            let per_level = match vertical {
                Some(_) => (0..layout.nz)
                    .map(|z| steps.iter().map(|s| s.per_level[z]).sum())
                    .collect(),
                None => Vec::new(),
            };
            Ok(EmissionTotal::Scalar {
                kg: steps.iter().map(|s| s.kg).sum(),
                per_level,
            })
        } else {
            Ok(EmissionTotal::Series(steps))
        }
    }

    /// Conversion factor × cell area, zero outside the region.
    fn cell_weights(&self, factor: f64) -> Result<Vec<f64>> {
        let areas = cell_areas(self.topology)?;
        let mut weights: Vec<f64> = areas.iter().map(|a| a * factor).collect();
        let region = &self.config.region;
        let inside = match self.topology {
            GridTopology::Fv(grid) => {
                let selection = select_fv(grid, region);
                if selection.lon == IndexSelection::All && selection.lat == IndexSelection::All {
                    return Ok(weights);
                }
                selection.mask(grid.nlat(), grid.nlon())
            }
            GridTopology::Se(mesh) => match select_se(mesh, region) {
                IndexSelection::All => return Ok(weights),
                selection => {
                    let mut mask = vec![false; mesh.len()];
                    selection.indices(mesh.len()).into_iter().for_each(|i| mask[i] = true);
                    mask
                }
            },
        };
        weights
            .iter_mut()
            .zip(inside)
            .filter(|(_, inside)| !inside)
            .for_each(|(w, _)| *w = 0.0);
        Ok(weights)
    }
}

/// Where the time, vertical and spatial axes of a field sit.
struct Layout {
    /// Axis permutation to `(time, vertical, spatial...)`
    order: Vec<usize>,
    nt: usize,
    nz: usize,
    ncell: usize,
}

impl Layout {
    fn locate(
        shape: &[usize],
        dims: &[&str],
        topology: &GridTopology,
        time: Option<&TimeAxis>,
        vertical: Option<&VerticalAxis>,
    ) -> Result<Self> {
        if shape.len() != dims.len() {
            return Err(Error::shape(format!(
                "{} axes but {} dimension names",
                shape.len(),
                dims.len()
            )));
        }
        let position = |name: &str| dims.iter().position(|d| *d == name);

        let mut time_axis = None;
        let mut vertical_axis = None;
        for (axis, dim) in dims.iter().enumerate() {
            if *dim == "time" {
                if time_axis.replace(axis).is_some() {
                    return Err(Error::shape("more than one time dimension"));
                }
            } else if VERTICAL_DIMS.contains(dim) {
                if let Some(first) = vertical_axis.replace(axis) {
                    return Err(Error::shape(format!(
                        "more than one vertical dimension: '{}' and '{dim}'",
                        dims[first]
                    )));
                }
            } else if !topology.spatial_dims().contains(dim) {
                return Err(Error::shape(format!("unexpected dimension '{dim}'")));
            }
        }

        let mut order = Vec::with_capacity(dims.len() + 2);
        let nt = match (time_axis, time) {
            (Some(axis), Some(time)) if shape[axis] == time.len() => {
                order.push(axis);
                time.len()
            }
            (Some(axis), Some(time)) => {
                return Err(Error::shape(format!(
                    "time dimension has {} steps, time axis has {}",
                    shape[axis],
                    time.len()
                )))
            }
            (Some(_), None) => return Err(Error::missing("time axis for a field with a time dimension")),
            (None, Some(_)) => return Err(Error::shape("time axis given for a field without time")),
            (None, None) => 1,
        };
        let nz = match (vertical_axis, vertical) {
            (Some(axis), Some(levels)) if shape[axis] == levels.len() => {
                order.push(axis);
                levels.len()
            }
            (Some(axis), Some(levels)) => {
                return Err(Error::shape(format!(
                    "vertical dimension has {} levels, vertical axis has {}",
                    shape[axis],
                    levels.len()
                )))
            }
            (Some(_), None) => {
                return Err(Error::missing("vertical axis for a field with levels"))
            }
            (None, Some(_)) => {
                return Err(Error::shape("vertical axis given for a field without levels"))
            }
            (None, None) => 1,
        };

        for (dim, expected) in topology.spatial_dims().iter().zip(topology.spatial_shape()) {
            let axis = position(dim)
                .ok_or_else(|| Error::shape(format!("missing spatial dimension '{dim}'")))?;
            if shape[axis] != expected {
                return Err(Error::shape(format!(
                    "dimension '{dim}' has {} values, grid has {expected}",
                    shape[axis]
                )));
            }
            order.push(axis);
        }

        // an absent time or vertical axis still counts as one step or level
        Ok(Self {
            order,
            nt,
            nz,
            ncell: topology.size(),
        })
    }
}
