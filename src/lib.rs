//! Emission totals and mass-conservative regridding of gridded flux fields.
//!
//! Fields live either on a regular latitude-longitude grid (FV) or on an
//! unstructured mesh (SE). [`emission::EmissionAggregator`] integrates a
//! field over area, time and vertical levels; [`regrid::RegridDriver`] moves
//! fields between grids with a sparse interpolation operator.

pub mod config;
pub mod emission;
pub mod error;
pub mod field;
pub mod grid;
mod nc;
pub mod provenance;
pub mod regrid;
pub mod time;
pub mod units;
pub mod vertical;

pub use config::{OutputType, RegridConfig, RegridMethod, RunFile};
pub use emission::{AggregationConfig, EmissionAggregator, EmissionTotal};
pub use error::{Error, Result};
pub use field::{Dataset, FieldCollection, FieldSet, FieldSource, LabeledField, RawField};
pub use grid::{GridDescription, GridTopology, GridType};
pub use regrid::{RegridDriver, Strategy, WeightSource};
