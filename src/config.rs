//! Run configuration loaded from TOML.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::emission::AggregationConfig;
use crate::error::{Error, Result};

/// Interpolation method of a regrid operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegridMethod {
    Bilinear,
    Patch,
    NearestSourceToDest,
    NearestDestToSource,
    #[default]
    Conservative1st,
    Conservative2nd,
}

impl RegridMethod {
    pub fn name(self) -> &'static str {
        match self {
            RegridMethod::Bilinear => "bilinear",
            RegridMethod::Patch => "patch",
            RegridMethod::NearestSourceToDest => "nearest_source_to_dest",
            RegridMethod::NearestDestToSource => "nearest_dest_to_source",
            RegridMethod::Conservative1st => "conservative_1st",
            RegridMethod::Conservative2nd => "conservative_2nd",
        }
    }
}

impl FromStr for RegridMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bilinear" => Ok(RegridMethod::Bilinear),
            "patch" => Ok(RegridMethod::Patch),
            "nearest_source_to_dest" | "nearest_stod" => Ok(RegridMethod::NearestSourceToDest),
            "nearest_dest_to_source" | "nearest_dtos" => Ok(RegridMethod::NearestDestToSource),
            "conservative_1st" | "conserve" => Ok(RegridMethod::Conservative1st),
            "conservative_2nd" | "conserve_2nd" => Ok(RegridMethod::Conservative2nd),
            _ => Err(Error::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for RegridMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<'de> Deserialize<'de> for RegridMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Storage type of regridded field variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    F4,
    F8,
}

impl FromStr for OutputType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "f4" | "float" => Ok(OutputType::F4),
            "f8" | "double" => Ok(OutputType::F8),
            _ => Err(Error::Config(format!("output type '{s}' is not f4 or f8"))),
        }
    }
}

/// Options of a regrid run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegridConfig {
    pub method: RegridMethod,
    /// Fields to regrid; every field with the source grid signature when empty
    pub fields: Vec<String>,
    /// Extra variables copied unchanged to the output
    pub pass_through: Vec<String>,
    /// Load weights from this file instead of generating them
    pub weights: Option<PathBuf>,
    /// Save generated weights to this file
    pub save_weights: Option<PathBuf>,
    /// Stop after generating and saving weights
    pub weights_only: bool,
    pub output: Option<PathBuf>,
    pub streaming: bool,
    /// Report source and destination totals of every field
    pub check_conservation: bool,
    pub unit: Option<String>,
    pub molecular_weight: Option<f64>,
    pub scale_factor: f64,
    pub output_type: OutputType,
    /// Append `_cYYYYMMDD` to written file names
    pub date_stamp: bool,
    pub ignore_warnings: bool,
}

impl Default for RegridConfig {
    fn default() -> Self {
        Self {
            method: RegridMethod::default(),
            fields: Vec::new(),
            pass_through: Vec::new(),
            weights: None,
            save_weights: None,
            weights_only: false,
            output: None,
            streaming: false,
            check_conservation: false,
            unit: None,
            molecular_weight: None,
            scale_factor: 1.0,
            output_type: OutputType::default(),
            date_stamp: true,
            ignore_warnings: false,
        }
    }
}

/// Top-level layout of a run file; both sections are optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunFile {
    pub aggregation: AggregationConfig,
    pub regrid: RegridConfig,
}

impl RunFile {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}
