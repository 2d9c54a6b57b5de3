//! Physical units attached to domain axes and field parameters.
//!
//! The catalog is deliberately small: every unit maps onto an SI base through a
//! scale and an offset, and two units are convertible when they measure the same
//! quantity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EkmanError, Result};

/// What a unit measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Angle,
    Length,
    Pressure,
    Temperature,
    Speed,
    Ratio,
    Frequency,
    Unknown,
}

/// A unit of measure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Unit {
    Degree,
    Radian,
    Meter,
    Kilometer,
    GeopotentialMeter,
    Hectopascal,
    Pascal,
    Kelvin,
    Celsius,
    MeterPerSecond,
    Knot,
    Percent,
    KgPerKg,
    GramPerKg,
    PerSecond,
    Dimensionless,
    /// Anything outside the catalog, kept verbatim
    Other(String),
}

impl Unit {
    pub fn quantity(&self) -> Quantity {
        match self {
            Unit::Degree | Unit::Radian => Quantity::Angle,
            Unit::Meter | Unit::Kilometer | Unit::GeopotentialMeter => Quantity::Length,
            Unit::Hectopascal | Unit::Pascal => Quantity::Pressure,
            Unit::Kelvin | Unit::Celsius => Quantity::Temperature,
            Unit::MeterPerSecond | Unit::Knot => Quantity::Speed,
            Unit::Percent | Unit::KgPerKg | Unit::GramPerKg | Unit::Dimensionless => {
                Quantity::Ratio
            }
            Unit::PerSecond => Quantity::Frequency,
            Unit::Other(_) => Quantity::Unknown,
        }
    }

    /// (scale, offset) such that `si = value * scale + offset`
    fn to_si(&self) -> (f64, f64) {
        match self {
            Unit::Degree => (std::f64::consts::PI / 180.0, 0.0),
            Unit::Kilometer => (1000.0, 0.0),
            Unit::Hectopascal => (100.0, 0.0),
            Unit::Celsius => (1.0, 273.15),
            Unit::Knot => (1852.0 / 3600.0, 0.0),
            Unit::Percent => (0.01, 0.0),
            Unit::GramPerKg => (0.001, 0.0),
            _ => (1.0, 0.0),
        }
    }

    pub fn can_convert(&self, other: &Unit) -> bool {
        if self == other {
            return true;
        }
        let q = self.quantity();
        q != Quantity::Unknown && q == other.quantity()
    }

    /// Convert a single value from `self` into `to`
    pub fn convert(&self, value: f64, to: &Unit) -> Result<f64> {
        if self == to {
            return Ok(value);
        }
        if !self.can_convert(to) {
            return Err(EkmanError::UnitMismatch {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        let (s_from, o_from) = self.to_si();
        let (s_to, o_to) = to.to_si();
        Ok((value * s_from + o_from - o_to) / s_to)
    }

    /// Convert a slice in place
    pub fn convert_slice(&self, values: &mut [f64], to: &Unit) -> Result<()> {
        if self == to {
            return Ok(());
        }
        for v in values.iter_mut() {
            *v = self.convert(*v, to)?;
        }
        Ok(())
    }

    /// Unit of a derivative of a quantity in `self` with respect to `denom`
    pub fn per(&self, denom: &Unit) -> Unit {
        match (self.quantity(), denom.quantity()) {
            (Quantity::Speed, Quantity::Length) => Unit::PerSecond,
            (Quantity::Length, Quantity::Length) => Unit::Dimensionless,
            _ => Unit::Other(format!("{}/{}", self, denom)),
        }
    }

    /// Canonical unit used when comparing values of this quantity
    pub fn canonical(&self) -> Unit {
        match self.quantity() {
            Quantity::Angle => Unit::Degree,
            Quantity::Length => Unit::Meter,
            Quantity::Pressure => Unit::Hectopascal,
            Quantity::Temperature => Unit::Kelvin,
            Quantity::Speed => Unit::MeterPerSecond,
            Quantity::Ratio => Unit::Dimensionless,
            Quantity::Frequency => Unit::PerSecond,
            Quantity::Unknown => self.clone(),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Degree => "degree",
            Unit::Radian => "rad",
            Unit::Meter => "m",
            Unit::Kilometer => "km",
            Unit::GeopotentialMeter => "gpm",
            Unit::Hectopascal => "hPa",
            Unit::Pascal => "Pa",
            Unit::Kelvin => "K",
            Unit::Celsius => "degC",
            Unit::MeterPerSecond => "m/s",
            Unit::Knot => "kt",
            Unit::Percent => "%",
            Unit::KgPerKg => "kg/kg",
            Unit::GramPerKg => "g/kg",
            Unit::PerSecond => "s-1",
            Unit::Dimensionless => "1",
            Unit::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

impl From<&str> for Unit {
    fn from(s: &str) -> Self {
        match s.trim() {
            "degree" | "degrees" | "deg" | "degrees_north" | "degrees_east" | "degree_north"
            | "degree_east" | "degrees_N" | "degrees_E" => Unit::Degree,
            "rad" | "radian" | "radians" => Unit::Radian,
            "m" | "meter" | "meters" | "metre" | "metres" => Unit::Meter,
            "km" | "kilometer" | "kilometers" => Unit::Kilometer,
            "gpm" | "geopotential_meter" => Unit::GeopotentialMeter,
            "hPa" | "hpa" | "mb" | "mbar" | "millibar" => Unit::Hectopascal,
            "Pa" | "pascal" => Unit::Pascal,
            "K" | "kelvin" => Unit::Kelvin,
            "degC" | "celsius" | "C" => Unit::Celsius,
            "m/s" | "m s-1" | "m.s-1" => Unit::MeterPerSecond,
            "kt" | "knot" | "knots" => Unit::Knot,
            "%" | "percent" => Unit::Percent,
            "kg/kg" | "kg kg-1" => Unit::KgPerKg,
            "g/kg" | "g kg-1" => Unit::GramPerKg,
            "s-1" | "1/s" | "/s" => Unit::PerSecond,
            "1" | "" | "dimensionless" => Unit::Dimensionless,
            other => Unit::Other(other.to_string()),
        }
    }
}

impl From<String> for Unit {
    fn from(s: String) -> Self {
        Unit::from(s.as_str())
    }
}

impl From<Unit> for String {
    fn from(u: Unit) -> Self {
        u.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(Unit::from("degrees_north"), Unit::Degree);
        assert_eq!(Unit::from("mb"), Unit::Hectopascal);
        assert_eq!(Unit::from("furlong"), Unit::Other("furlong".to_string()));
        assert_eq!(Unit::Hectopascal.to_string(), "hPa");
    }

    #[test]
    fn test_convert() {
        assert!((Unit::Celsius.convert(0.0, &Unit::Kelvin).unwrap() - 273.15).abs() < 1e-9);
        assert!((Unit::Hectopascal.convert(850.0, &Unit::Pascal).unwrap() - 85000.0).abs() < 1e-9);
        assert!((Unit::Kilometer.convert(1.5, &Unit::Meter).unwrap() - 1500.0).abs() < 1e-9);
        assert!((Unit::Percent.convert(50.0, &Unit::Dimensionless).unwrap() - 0.5).abs() < 1e-12);
        assert!(Unit::Kelvin.convert(1.0, &Unit::Meter).is_err());
    }

    #[test]
    fn test_per() {
        assert_eq!(Unit::MeterPerSecond.per(&Unit::Meter), Unit::PerSecond);
        assert_eq!(Unit::Kelvin.per(&Unit::Hectopascal), Unit::Other("K/hPa".to_string()));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Unit::MeterPerSecond).unwrap();
        assert_eq!(json, "\"m/s\"");
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Unit::MeterPerSecond);
    }
}
