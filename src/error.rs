//! Error types shared by the aggregation and regridding code.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Array shapes, dimension lists or coordinate lengths disagree
    #[error("input shape mismatch: {0}")]
    InputShapeMismatch(String),

    #[error("unsupported grid type: {0} (FV needs 'lat' and 'lon' dimensions, SE needs 'ncol')")]
    UnsupportedGridType(String),

    #[error("ambiguous grid type: {0} carries both FV ('lat'/'lon') and SE ('ncol') dimensions")]
    AmbiguousGridType(String),

    #[error("unsupported time representation: {0}")]
    UnsupportedTimeType(String),

    #[error("unsupported unit '{0}'")]
    UnsupportedUnit(String),

    #[error("molecular weight is required to convert '{0}' to kg/m2/s")]
    MissingMolecularWeight(String),

    #[error("grid description file could not be read: {}", .0.display())]
    MissingGridFile(PathBuf),

    #[error("too many leading dimensions: {0:?} (at most 2 non-spatial dimensions are supported)")]
    TooManyLeadingDimensions(Vec<String>),

    #[error("weight generation failed for method {method}: {reason}")]
    RegridGenerationFailed { method: String, reason: String },

    #[error("weight file not found: {}", .0.display())]
    WeightFileNotFound(PathBuf),

    #[error("unsupported regrid method '{0}'")]
    UnsupportedMethod(String),

    /// A required variable, dimension or attribute is absent from a store
    #[error("missing required data: {0}")]
    MissingData(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("netCDF error: {0}")]
    NetCdf(#[from] netcdf::error::Error),

    #[error("could not parse run file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::InputShapeMismatch(msg.into())
    }

    pub(crate) fn missing(msg: impl Into<String>) -> Self {
        Error::MissingData(msg.into())
    }
}
