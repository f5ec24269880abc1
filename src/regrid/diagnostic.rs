//! Mass-conservation check of regridded slices.

use ndarray::ArrayViewD;
use tracing::info;

use crate::emission::{AggregationConfig, EmissionAggregator};
use crate::error::Result;
use crate::grid::GridTopology;
use crate::units::UnitSpec;

/// Source and destination totals of one slice, in grams.
#[derive(Debug, Clone, PartialEq)]
pub struct ConservationReport {
    pub field: String,
    /// Flat index along the leading dimensions
    pub slice: usize,
    pub source_grams: f64,
    pub destination_grams: f64,
}

impl ConservationReport {
    pub fn relative_difference(&self) -> f64 {
        if self.source_grams == 0.0 {
            return if self.destination_grams == 0.0 { 0.0 } else { f64::INFINITY };
        }
        (self.destination_grams - self.source_grams).abs() / self.source_grams.abs()
    }
}

pub(crate) struct ConservationCheck<'a> {
    pub source: &'a GridTopology,
    pub destination: &'a GridTopology,
    pub quiet: bool,
}

impl ConservationCheck<'_> {
    /// Total one spatial slice on both grids, with the default day count.
    pub fn compare(
        &self,
        field: &str,
        slice: usize,
        units: &UnitSpec,
        source: ArrayViewD<'_, f64>,
        destination: ArrayViewD<'_, f64>,
    ) -> Result<ConservationReport> {
        let config = AggregationConfig {
            ignore_warnings: self.quiet,
            ..Default::default()
        };
        let total = |topology: &GridTopology, values: ArrayViewD<'_, f64>| {
            let dims = topology.spatial_dims();
            EmissionAggregator::new(topology, config.clone())
                .aggregate(values, dims, units, None, None)
                .map(|t| t.grams())
        };
        let report = ConservationReport {
            field: field.to_string(),
            slice,
            source_grams: total(self.source, source)?,
            destination_grams: total(self.destination, destination)?,
        };
        info!(
            field,
            slice,
            before = report.source_grams,
            after = report.destination_grams,
            relative = report.relative_difference(),
            "conservation check (g)"
        );
        Ok(report)
    }
}
