//! Vertical layers of three-dimensional emission fields.

use tracing::warn;

use crate::error::{Error, Result};
use crate::field::{AttrValue, Coordinate};

/// Dimension names recognised as vertical.
pub const VERTICAL_DIMS: &[&str] = &["altitude", "level", "lev"];

#[derive(Debug, Clone, PartialEq)]
pub struct VerticalAxis {
    pub midpoints: Vec<f64>,
    /// `midpoints.len() + 1` layer edges, in the axis unit
    pub interfaces: Vec<f64>,
    to_metres: f64,
}

fn metres_per_unit(unit: Option<&str>, quiet: bool) -> Result<f64> {
    let Some(unit) = unit else {
        if !quiet {
            warn!("unit of vertical coordinate is not available, assuming km");
        }
        return Ok(1e3);
    };
    match unit.trim().to_lowercase().as_str() {
        "km" | "kilometers" | "kilometres" => Ok(1e3),
        "m" | "meters" | "metres" => Ok(1.0),
        "cm" | "centimeters" | "centimetres" => Ok(1e-2),
        _ => Err(Error::UnsupportedUnit(unit.to_string())),
    }
}

impl VerticalAxis {
    /// Layers from their midpoints; interfaces are derived half way between
    /// midpoints when not supplied.
    pub fn new(
        midpoints: Vec<f64>,
        interfaces: Option<Vec<f64>>,
        unit: Option<&str>,
        quiet: bool,
    ) -> Result<Self> {
        let to_metres = metres_per_unit(unit, quiet)?;
        let interfaces = match interfaces {
            Some(interfaces) if interfaces.len() == midpoints.len() + 1 => interfaces,
            Some(interfaces) => {
                return Err(Error::shape(format!(
                    "{} vertical interfaces for {} levels",
                    interfaces.len(),
                    midpoints.len()
                )))
            }
            None => derive_interfaces(&midpoints)?,
        };
        Ok(Self {
            midpoints,
            interfaces,
            to_metres,
        })
    }

    pub fn from_coordinate(
        coord: &Coordinate,
        interfaces: Option<Vec<f64>>,
        quiet: bool,
    ) -> Result<Self> {
        let unit = coord.attributes.get("units").and_then(AttrValue::as_text);
        Self::new(coord.values.to_vec(), interfaces, unit, quiet)
    }

    pub fn len(&self) -> usize {
        self.midpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.midpoints.is_empty()
    }

    /// Layer thickness in metres.
    pub fn thickness(&self) -> Vec<f64> {
        self.interfaces
            .windows(2)
            .map(|w| (w[1] - w[0]).abs() * self.to_metres)
            .collect()
    }
}

fn derive_interfaces(midpoints: &[f64]) -> Result<Vec<f64>> {
    let n = midpoints.len();
    if n < 2 {
        return Err(Error::shape(
            "a single vertical level needs explicit interfaces",
        ));
    }
    let mut interfaces = Vec::with_capacity(n + 1);
    interfaces.push(midpoints[0] - (midpoints[1] - midpoints[0]) / 2.0);
    interfaces.extend(midpoints.windows(2).map(|w| (w[0] + w[1]) / 2.0));
    interfaces.push(midpoints[n - 1] + (midpoints[n - 1] - midpoints[n - 2]) / 2.0);
    Ok(interfaces)
}
