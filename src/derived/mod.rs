//! Derived physical quantities.
//!
//! Everything here is a composition of finite differences, the grid algebra
//! and the resampling engine. Functions work step by step over time and
//! ensemble sequences and name their result parameters after the quantity
//! they produce.

mod finite_diff;
mod grids;
mod kinematics;
mod layers;
mod thermo;

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{domains_equal, SampleDomain, SamplingMode};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField};
use crate::resample::resample_flat;
use crate::units::{Quantity, Unit};

pub use finite_diff::{ddx, ddy, partial};
pub use grids::{coriolis_grid, latitude_grid, longitude_grid, pressure_grid};
pub use kinematics::{
    absolute_vorticity, advection, divergence, flow_vectors, flow_vectors_3d, flux_divergence,
    geostrophic_wind, relative_vorticity, relative_vorticity_from_true_wind, true_flow_vectors,
    vector_direction, vector_magnitude, wind_speed,
};
pub use layers::{layer_average, layer_difference, thickness};
pub use thermo::{
    dewpoint, equivalent_potential_temperature, isentropic_potential_vorticity, mixing_ratio,
    potential_temperature, potential_vorticity, relative_humidity, saturation_vapor_pressure,
};

/// Mean Earth radius (m)
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Twice the Earth's angular velocity (s⁻¹)
pub const EARTH_TWO_OMEGA: f64 = 1.4584e-4;

/// Standard gravity (m s⁻²)
pub const GRAVITY: f64 = 9.80665;

/// Length of a degree of latitude used for lat/lon finite differences (km)
pub const KM_PER_DEGREE: f64 = 111.0;

/// Earth constants and guards used by the horizontal differential operators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarthModel {
    pub radius_m: f64,
    pub km_per_degree: f64,
    /// Latitude (degrees) whose cosine bounds the longitudinal metric near the poles
    pub min_cos_latitude_deg: f64,
}

impl Default for EarthModel {
    fn default() -> Self {
        Self {
            radius_m: EARTH_RADIUS,
            km_per_degree: KM_PER_DEGREE,
            min_cos_latitude_deg: 89.0,
        }
    }
}

impl EarthModel {
    /// Cosine of a latitude (degrees), floored at the pole guard
    pub fn cos_latitude(&self, lat_deg: f64) -> f64 {
        lat_deg
            .to_radians()
            .cos()
            .max(self.min_cos_latitude_deg.to_radians().cos())
    }

    pub fn metres_per_degree(&self) -> f64 {
        self.km_per_degree * 1000.0
    }
}

/// A grid on `domain`: rebound when the domains are equal, resampled otherwise
pub(crate) fn onto(grid: &FlatGrid, domain: &Arc<SampleDomain>) -> Result<FlatGrid> {
    if domains_equal(grid.domain(), domain) {
        grid.with_domain(domain.clone())
    } else {
        resample_flat(grid, domain, SamplingMode::WeightedAverage)
    }
}

/// Append the components of `b` (taken onto `a`'s domain) after those of `a`
pub(crate) fn stack(a: &FlatGrid, b: &FlatGrid) -> Result<FlatGrid> {
    let b = onto(b, a.domain())?;
    let na = a.params().len();
    let mut values = Array2::<f32>::zeros((na + b.params().len(), a.len()));
    values.slice_mut(s![..na, ..]).assign(a.values());
    values.slice_mut(s![na.., ..]).assign(b.values());
    let mut params = a.params().to_vec();
    params.extend(b.params().iter().cloned());
    FlatGrid::new(a.domain().clone(), params, values)
}

/// Convert every parameter into `unit`; parameters in unknown units are left alone
pub(crate) fn in_unit(field: &GridField, unit: &Unit) -> Result<GridField> {
    field.map_flat(|g| {
        let mut values = g.values().clone();
        let mut params = g.params().to_vec();
        for (c, p) in params.iter_mut().enumerate() {
            if p.unit == *unit || p.unit.quantity() == Quantity::Unknown {
                continue;
            }
            if !p.unit.can_convert(unit) {
                return Err(EkmanError::UnitMismatch {
                    from: p.unit.to_string(),
                    to: unit.to_string(),
                });
            }
            let offset = p.unit.convert(0.0, unit)?;
            let scale = p.unit.convert(1.0, unit)? - offset;
            values
                .row_mut(c)
                .mapv_inplace(|v| (v as f64 * scale + offset) as f32);
            p.unit = unit.clone();
        }
        FlatGrid::new(g.domain().clone(), params, values)
    })
}

/// Unit of a rate of change of a quantity measured in `unit`
pub(crate) fn per_second(unit: &Unit) -> Unit {
    match unit {
        Unit::Dimensionless => Unit::PerSecond,
        Unit::Meter => Unit::MeterPerSecond,
        other => Unit::Other(format!("{}/s", other)),
    }
}
