//! Flux unit normalisation to kg/m2/s.

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Avogadro's number (molecules per mole)
pub const AVOGADRO: f64 = 6.022e23;

/// Flux units the converter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxUnit {
    MoleculesPerCm2PerSecond,
    MoleculesPerCm3PerSecond,
    MoleculesPerM2PerSecond,
    KgPerM2PerSecond,
}

impl FluxUnit {
    pub fn parse(unit: &str) -> Result<Self> {
        match unit.trim().to_lowercase().as_str() {
            "molecules/cm2/s" | "molecules cm-2 s-1" | "molecules/cm^2/s" => {
                Ok(FluxUnit::MoleculesPerCm2PerSecond)
            }
            "molecules/cm3/s" | "molecules cm-3 s-1" => Ok(FluxUnit::MoleculesPerCm3PerSecond),
            "molecules/m2/s" | "molecules m-2 s-1" => Ok(FluxUnit::MoleculesPerM2PerSecond),
            "kg/m2/s" | "kg m-2 s-1" => Ok(FluxUnit::KgPerM2PerSecond),
            _ => Err(Error::UnsupportedUnit(unit.to_string())),
        }
    }

    fn needs_molecular_weight(self) -> bool {
        self != FluxUnit::KgPerM2PerSecond
    }

    /// Factor turning one unit of `self` into kg/m2/s for a species of
    /// molecular weight `mw` in g/mol.
    fn factor(self, mw: f64) -> f64 {
        let kg_per_molecule = (mw / 1e3) / AVOGADRO;
        match self {
            FluxUnit::MoleculesPerCm2PerSecond => kg_per_molecule * 1e4,
            FluxUnit::MoleculesPerCm3PerSecond => kg_per_molecule * 1e6,
            FluxUnit::MoleculesPerM2PerSecond => kg_per_molecule,
            FluxUnit::KgPerM2PerSecond => 1.0,
        }
    }
}

/// Molecular weight as it was found, before unit normalisation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MolecularWeight {
    pub value: f64,
    /// `None` when the source did not say; grams per mole is assumed
    #[serde(default)]
    pub units: Option<String>,
}

impl MolecularWeight {
    pub fn grams_per_mole(value: f64) -> Self {
        Self {
            value,
            units: Some("g/mol".to_string()),
        }
    }

    /// Parse a molecular weight stored as text, e.g. `"28.0"` or `"28.f"`.
    pub fn parse(text: &str, units: Option<String>) -> Result<Self> {
        // Fortran real literals such as "28.f"
        let trimmed = text.trim();
        let cleaned = trimmed
            .strip_suffix(".f")
            .or_else(|| trimmed.strip_suffix('f'))
            .unwrap_or(trimmed);
        let value = cleaned
            .parse::<f64>()
            .map_err(|_| Error::Config(format!("molecular weight '{text}' is not a number")))?;
        Ok(Self { value, units })
    }

    /// Value in g/mol.
    pub fn in_grams_per_mole(&self, quiet: bool) -> Result<f64> {
        let Some(units) = &self.units else {
            if !quiet {
                warn!("unit of molecular weight is not available, assuming g/mol");
            }
            return Ok(self.value);
        };
        match units.trim().to_lowercase().replace(' ', "").as_str() {
            "g/mol" | "g/mole" | "gmol-1" | "g.mol-1" => Ok(self.value),
            "kg/mol" | "kg/mole" | "kgmol-1" => Ok(self.value * 1e3),
            _ => Err(Error::UnsupportedUnit(units.clone())),
        }
    }
}

/// Unit description of a flux field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UnitSpec {
    pub unit: String,
    #[serde(default)]
    pub molecular_weight: Option<MolecularWeight>,
}

impl UnitSpec {
    pub fn new(unit: impl Into<String>, molecular_weight: Option<f64>) -> Self {
        Self {
            unit: unit.into(),
            molecular_weight: molecular_weight.map(MolecularWeight::grams_per_mole),
        }
    }
}

/// Conversion of a flux field to kg/m2/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConverter {
    pub unit: FluxUnit,
    pub factor: f64,
}

impl UnitConverter {
    pub fn new(spec: &UnitSpec, quiet: bool) -> Result<Self> {
        let unit = FluxUnit::parse(&spec.unit)?;
        let factor = if unit.needs_molecular_weight() {
            let mw = spec
                .molecular_weight
                .as_ref()
                .ok_or_else(|| Error::MissingMolecularWeight(spec.unit.clone()))?
                .in_grams_per_mole(quiet)?;
            unit.factor(mw)
        } else {
            1.0
        };
        Ok(Self { unit, factor })
    }

    pub fn convert(&self, value: f64) -> f64 {
        value * self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kg_flux_is_unchanged() {
        let conv = UnitConverter::new(&UnitSpec::new("KG/M2/S", None), true).unwrap();
        assert_eq!(conv.factor, 1.0);
        assert_eq!(conv.convert(3.5), 3.5);
    }

    #[test]
    fn molecule_fluxes_scale_with_molecular_weight() {
        let conv = UnitConverter::new(&UnitSpec::new("molecules/cm2/s", Some(28.0)), true).unwrap();
        assert_relative_eq!(conv.factor, 0.028 / AVOGADRO * 1e4, max_relative = 1e-12);

        let conv = UnitConverter::new(&UnitSpec::new("molecules cm-3 s-1", Some(28.0)), true).unwrap();
        assert_relative_eq!(conv.factor, 0.028 / AVOGADRO * 1e6, max_relative = 1e-12);

        let conv = UnitConverter::new(&UnitSpec::new("molecules/m2/s", Some(28.0)), true).unwrap();
        assert_relative_eq!(conv.factor, 0.028 / AVOGADRO, max_relative = 1e-12);
    }

    #[test]
    fn kg_per_mole_weights_are_normalised() {
        let spec = UnitSpec {
            unit: "molecules/m2/s".to_string(),
            molecular_weight: Some(MolecularWeight {
                value: 0.028,
                units: Some("kg/mol".to_string()),
            }),
        };
        let conv = UnitConverter::new(&spec, true).unwrap();
        assert_relative_eq!(conv.factor, 0.028 / AVOGADRO, max_relative = 1e-12);
    }

    #[test]
    fn unknown_units_and_missing_weights_fail() {
        assert!(matches!(
            UnitConverter::new(&UnitSpec::new("ppbv", Some(28.0)), true),
            Err(Error::UnsupportedUnit(_))
        ));
        assert!(matches!(
            UnitConverter::new(&UnitSpec::new("molecules/cm2/s", None), true),
            Err(Error::MissingMolecularWeight(_))
        ));
    }

    #[test]
    fn textual_molecular_weights_parse() {
        assert_eq!(MolecularWeight::parse("28.f", None).unwrap().value, 28.0);
        assert_eq!(MolecularWeight::parse(" 44.01 ", None).unwrap().value, 44.01);
        assert_eq!(MolecularWeight::parse("28.0f", None).unwrap().value, 28.0);
        assert!(MolecularWeight::parse("co", None).is_err());
        assert!(MolecularWeight::parse("2f8", None).is_err());
        assert!(MolecularWeight::parse("f28", None).is_err());
    }
}
