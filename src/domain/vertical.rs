//! Vertical coordinates and vertical transforms.
//!
//! A [`VerticalCoordinate`] is a closed-form, position-independent mapping
//! between a native vertical value and altitude. A [`VerticalTransform`] may
//! depend on horizontal position and time (terrain-following and hybrid
//! coordinates); data sources use it to build empirical coordinate systems.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EkmanError, Result};
use crate::units::{Quantity, Unit};

/// Sea-level pressure of the ICAO standard atmosphere (hPa)
pub const STANDARD_SEA_LEVEL_PRESSURE: f64 = 1013.25;
const STANDARD_SEA_LEVEL_TEMPERATURE: f64 = 288.15;
const TROPOSPHERE_LAPSE_RATE: f64 = 0.0065;
const TROPOPAUSE_ALTITUDE: f64 = 11_000.0;
const TROPOPAUSE_TEMPERATURE: f64 = 216.65;
const DRY_AIR_GAS_CONSTANT: f64 = 287.053;
const STANDARD_GRAVITY: f64 = 9.80665;
const MEAN_EARTH_RADIUS: f64 = 6_371_000.0;

fn tropopause_pressure() -> f64 {
    STANDARD_SEA_LEVEL_PRESSURE
        * (TROPOPAUSE_TEMPERATURE / STANDARD_SEA_LEVEL_TEMPERATURE)
            .powf(STANDARD_GRAVITY / (DRY_AIR_GAS_CONSTANT * TROPOSPHERE_LAPSE_RATE))
}

/// Standard-atmosphere altitude (m) of a pressure in hPa
pub fn pressure_to_altitude(p_hpa: f64) -> f64 {
    if p_hpa.is_nan() || p_hpa <= 0.0 {
        return f64::NAN;
    }
    let p11 = tropopause_pressure();
    if p_hpa >= p11 {
        let exponent = DRY_AIR_GAS_CONSTANT * TROPOSPHERE_LAPSE_RATE / STANDARD_GRAVITY;
        STANDARD_SEA_LEVEL_TEMPERATURE / TROPOSPHERE_LAPSE_RATE
            * (1.0 - (p_hpa / STANDARD_SEA_LEVEL_PRESSURE).powf(exponent))
    } else {
        TROPOPAUSE_ALTITUDE
            + DRY_AIR_GAS_CONSTANT * TROPOPAUSE_TEMPERATURE / STANDARD_GRAVITY * (p11 / p_hpa).ln()
    }
}

/// Standard-atmosphere pressure (hPa) at an altitude in metres
pub fn altitude_to_pressure(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    if z <= TROPOPAUSE_ALTITUDE {
        let exponent = STANDARD_GRAVITY / (DRY_AIR_GAS_CONSTANT * TROPOSPHERE_LAPSE_RATE);
        STANDARD_SEA_LEVEL_PRESSURE
            * (1.0 - TROPOSPHERE_LAPSE_RATE * z / STANDARD_SEA_LEVEL_TEMPERATURE).powf(exponent)
    } else {
        tropopause_pressure()
            * (-(z - TROPOPAUSE_ALTITUDE) * STANDARD_GRAVITY
                / (DRY_AIR_GAS_CONSTANT * TROPOPAUSE_TEMPERATURE))
                .exp()
    }
}

/// Closed-form vertical mapping used inside a coordinate system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalCoordinate {
    /// The native vertical value is already the reference value
    Identity,
    /// Native pressure to altitude through the standard atmosphere
    StandardAtmosphere,
}

impl VerticalCoordinate {
    /// Native value (in `unit`) to reference; returns the reference value and its unit
    pub fn to_reference(&self, value: f64, unit: &Unit) -> Result<(f64, Unit)> {
        match self {
            VerticalCoordinate::Identity => Ok((value, unit.clone())),
            VerticalCoordinate::StandardAtmosphere => {
                let p = unit.convert(value, &Unit::Hectopascal)?;
                Ok((pressure_to_altitude(p), Unit::Meter))
            }
        }
    }

    /// Reference value (in `ref_unit`) to native `unit`
    pub fn from_reference(&self, value: f64, ref_unit: &Unit, unit: &Unit) -> Result<f64> {
        match self {
            VerticalCoordinate::Identity => ref_unit.convert(value, unit),
            VerticalCoordinate::StandardAtmosphere => {
                let z = ref_unit.convert(value, &Unit::Meter)?;
                Unit::Hectopascal.convert(altitude_to_pressure(z), unit)
            }
        }
    }
}

/// Position- and time-dependent vertical transform supplied by a data source
pub trait VerticalTransform: Send + Sync + fmt::Debug {
    /// Short name, used in cache keys and log output
    fn name(&self) -> &str;

    /// Whether the result changes from one time step to the next
    fn is_time_dependent(&self) -> bool;

    /// Altitude (m) of every sample.
    ///
    /// `native` holds the native vertical value of each sample, `horizontal`
    /// the flat horizontal index of the same sample.
    fn altitudes(
        &self,
        native: &[f64],
        horizontal: &[usize],
        time_index: Option<usize>,
    ) -> Result<Vec<f64>>;
}

/// Pressure levels converted with the standard atmosphere
#[derive(Debug, Clone)]
pub struct PressureLevels {
    pub unit: Unit,
}

impl VerticalTransform for PressureLevels {
    fn name(&self) -> &str {
        "pressure_levels"
    }

    fn is_time_dependent(&self) -> bool {
        false
    }

    fn altitudes(&self, native: &[f64], _horizontal: &[usize], _t: Option<usize>) -> Result<Vec<f64>> {
        if self.unit.quantity() != Quantity::Pressure {
            return Err(EkmanError::UnitMismatch {
                from: self.unit.to_string(),
                to: Unit::Hectopascal.to_string(),
            });
        }
        native
            .iter()
            .map(|&p| Ok(pressure_to_altitude(self.unit.convert(p, &Unit::Hectopascal)?)))
            .collect()
    }
}

/// Geopotential height to geometric altitude
#[derive(Debug, Clone)]
pub struct GeopotentialHeight;

impl VerticalTransform for GeopotentialHeight {
    fn name(&self) -> &str {
        "geopotential_height"
    }

    fn is_time_dependent(&self) -> bool {
        false
    }

    fn altitudes(&self, native: &[f64], _horizontal: &[usize], _t: Option<usize>) -> Result<Vec<f64>> {
        Ok(native
            .iter()
            .map(|&h| MEAN_EARTH_RADIUS * h / (MEAN_EARTH_RADIUS - h))
            .collect())
    }
}

/// Terrain-following ocean coordinate, `z = eta + (eta + depth) * sigma`
#[derive(Debug, Clone)]
pub struct OceanSigma {
    /// Free-surface elevation per time step, each row indexed by horizontal point
    pub eta: Vec<Vec<f64>>,
    /// Water depth (positive down) per horizontal point
    pub depth: Vec<f64>,
}

impl VerticalTransform for OceanSigma {
    fn name(&self) -> &str {
        "ocean_sigma"
    }

    fn is_time_dependent(&self) -> bool {
        self.eta.len() > 1
    }

    fn altitudes(
        &self,
        native: &[f64],
        horizontal: &[usize],
        time_index: Option<usize>,
    ) -> Result<Vec<f64>> {
        let eta = time_row(&self.eta, time_index, "eta")?;
        native
            .iter()
            .zip(horizontal)
            .map(|(&sigma, &h)| {
                let depth = *self.depth.get(h).ok_or_else(|| {
                    EkmanError::invalid_param("depth", format!("no depth for point {}", h))
                })?;
                let e = eta.get(h).copied().unwrap_or(0.0);
                Ok(e + (e + depth) * sigma)
            })
            .collect()
    }
}

/// Hybrid sigma-pressure coordinate, `p = a * p0 + b * ps`, native values are level indices
#[derive(Debug, Clone)]
pub struct HybridSigmaPressure {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    /// Reference pressure (hPa)
    pub p0: f64,
    /// Surface pressure (hPa) per time step, each row indexed by horizontal point
    pub surface_pressure: Vec<Vec<f64>>,
}

impl VerticalTransform for HybridSigmaPressure {
    fn name(&self) -> &str {
        "hybrid_sigma_pressure"
    }

    fn is_time_dependent(&self) -> bool {
        self.surface_pressure.len() > 1
    }

    fn altitudes(
        &self,
        native: &[f64],
        horizontal: &[usize],
        time_index: Option<usize>,
    ) -> Result<Vec<f64>> {
        let ps = time_row(&self.surface_pressure, time_index, "surface_pressure")?;
        native
            .iter()
            .zip(horizontal)
            .map(|(&level, &h)| {
                let k = level.round();
                if k < 0.0 || k as usize >= self.a.len() || k as usize >= self.b.len() {
                    return Ok(f64::NAN);
                }
                let k = k as usize;
                let surface = ps.get(h).copied().unwrap_or(f64::NAN);
                Ok(pressure_to_altitude(self.a[k] * self.p0 + self.b[k] * surface))
            })
            .collect()
    }
}

fn time_row<'a>(rows: &'a [Vec<f64>], time_index: Option<usize>, what: &str) -> Result<&'a [f64]> {
    let t = if rows.len() > 1 { time_index.unwrap_or(0) } else { 0 };
    rows.get(t).map(|r| r.as_slice()).ok_or_else(|| {
        EkmanError::invalid_param(what, format!("no values for time index {}", t))
    })
}
