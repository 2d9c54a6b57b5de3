//! Vorticity, divergence, advection and wind vectors.

use ndarray::Array2;
use std::sync::Arc;
use tracing::debug;

use super::finite_diff::Spherical;
use super::grids::coriolis_grid;
use super::{ddx, ddy, in_unit, onto, per_second, stack, EarthModel, GRAVITY};
use crate::algebra::{add, multiply, subtract};
use crate::domain::{domains_equal, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::units::{Quantity, Unit};

/// `∂v/∂x − ∂u/∂y` on the grid's own axes, named `relvorticity`
pub fn relative_vorticity(u: &GridField, v: &GridField, earth: &EarthModel) -> Result<GridField> {
    let dvdx = ddx(v, earth)?;
    let dudy = ddy(u, earth)?;
    subtract(&dvdx, &dudy)?.renamed("relvorticity")
}

/// Relative vorticity plus the Coriolis parameter, named `absvorticity`
pub fn absolute_vorticity(u: &GridField, v: &GridField, earth: &EarthModel) -> Result<GridField> {
    let relative = relative_vorticity(u, v, earth)?;
    let coriolis = coriolis_grid(&relative)?;
    add(&relative, &coriolis)?.renamed("absvorticity")
}

/// Relative vorticity of earth-relative (east, north) wind components.
///
/// Derivatives are taken against latitude and longitude on a sphere of the
/// model's radius: `ζ = (∂v/∂λ)/(R cosφ) − (∂u/∂φ)/R + u·tanφ/R`, with the
/// pole guard applied to `cosφ`.
pub fn relative_vorticity_from_true_wind(
    u: &GridField,
    v: &GridField,
    earth: &EarthModel,
) -> Result<GridField> {
    let mut last: Option<(Arc<SampleDomain>, Arc<Spherical>)> = None;
    u.zip_flat(v, |ug, vg| {
        let vg = onto(vg, ug.domain())?;
        let cached = last
            .as_ref()
            .filter(|(source, _)| domains_equal(source, ug.domain()))
            .map(|(_, sphere)| sphere.clone());
        let sphere = match cached {
            Some(sphere) => sphere,
            None => {
                let sphere = Arc::new(Spherical::new(ug.domain())?);
                last = Some((ug.domain().clone(), sphere.clone()));
                sphere
            }
        };
        if sphere.len() != ug.len() {
            return Err(EkmanError::incompatible(
                "relative_vorticity_from_true_wind",
                format!("{} winds over {} points", ug.len(), sphere.len()),
            ));
        }
        let us = speed_column(ug)?;
        let vs = speed_column(&vg)?;
        let du = sphere.gradient(&us);
        let dv = sphere.gradient(&vs);
        let r = earth.radius_m;
        let values = (0..us.len())
            .map(|e| {
                let phi = sphere.latitude(e);
                let cos = earth.cos_latitude(phi.to_degrees());
                let z = dv[[1, e]] / (r * cos) - du[[0, e]] / r + us[e] * phi.sin() / (cos * r);
                if z.is_finite() {
                    z as f32
                } else {
                    f32::NAN
                }
            })
            .collect();
        FlatGrid::scalar(
            ug.domain().clone(),
            Param::new("relvorticity", Unit::PerSecond),
            values,
        )
    })
}

/// First component in m/s when it is a speed
fn speed_column(g: &FlatGrid) -> Result<Vec<f64>> {
    let mut column: Vec<f64> = g.component(0).iter().map(|v| *v as f64).collect();
    let unit = &g.params()[0].unit;
    if unit.quantity() == Quantity::Speed {
        unit.convert_slice(&mut column, &Unit::MeterPerSecond)?;
    }
    Ok(column)
}

/// Horizontal divergence `∂u/∂x + ∂v/∂y`, named `divergence`
pub fn divergence(u: &GridField, v: &GridField, earth: &EarthModel) -> Result<GridField> {
    let dudx = ddx(u, earth)?;
    let dvdy = ddy(v, earth)?;
    add(&dudx, &dvdy)?.renamed("divergence")
}

/// Horizontal advection of a scalar, returned as `−(u·∂a/∂x + v·∂a/∂y)`
pub fn advection(a: &GridField, u: &GridField, v: &GridField, earth: &EarthModel) -> Result<GridField> {
    let u = in_unit(u, &Unit::MeterPerSecond)?;
    let v = in_unit(v, &Unit::MeterPerSecond)?;
    let along_x = multiply(&ddx(a, earth)?, &u)?;
    let along_y = multiply(&ddy(a, earth)?, &v)?;
    let sum = add(&along_x, &along_y)?;
    let negated = sum.map_flat(|g| Ok(g.map(|x| -x)))?;
    rate_of(a, &negated, "advection")
}

/// Flux divergence `a·divergence(u, v) − advection(a, u, v)`
pub fn flux_divergence(a: &GridField, u: &GridField, v: &GridField, earth: &EarthModel) -> Result<GridField> {
    let u = in_unit(u, &Unit::MeterPerSecond)?;
    let v = in_unit(v, &Unit::MeterPerSecond)?;
    let div = divergence(&u, &v, earth)?;
    let scaled = multiply(a, &div)?;
    let adv = advection(a, &u, &v, earth)?;
    let flux = subtract(&scaled, &adv)?;
    rate_of(a, &flux, "flux_divergence")
}

/// Name a rate after the scalar it was computed from
fn rate_of(a: &GridField, rate: &GridField, suffix: &str) -> Result<GridField> {
    let base = match a.params().and_then(|p| p.first()) {
        Some(p) => p.clone(),
        None => return Ok(rate.clone()),
    };
    let name = format!("{}_{}", base.name, suffix);
    let unit = per_second(&base.unit);
    rate.map_flat(|g| Ok(g.renamed(&name).with_unit(unit.clone())))
}

/// Geostrophic wind from geopotential height (or geopotential).
///
/// `ug = −(g/f)·∂Z/∂y`, `vg = (g/f)·∂Z/∂x`; a geopotential (not a length)
/// is used without the factor `g`. Points where the Coriolis parameter
/// vanishes come out missing.
pub fn geostrophic_wind(z: &GridField, earth: &EarthModel) -> Result<GridField> {
    let scale = match z.params().and_then(|p| p.first()) {
        Some(p) if p.unit.quantity() == Quantity::Length => {
            // heights enter the gradient in metres
            GRAVITY * (p.unit.convert(1.0, &Unit::Meter)? - p.unit.convert(0.0, &Unit::Meter)?)
        }
        _ => 1.0,
    };
    let gradient = ddx(z, earth)?.zip_flat(&ddy(z, earth)?, stack)?;
    let coriolis = coriolis_grid(z)?;
    debug!(scale, "computing geostrophic wind");
    gradient.zip_flat(&coriolis, |grad, f| {
        let f = onto(f, grad.domain())?;
        let n = grad.len();
        let mut out = Array2::<f32>::from_elem((2, n), f32::NAN);
        for e in 0..n {
            let (dzdx, dzdy, fe) = (
                grad.values()[[0, e]] as f64,
                grad.values()[[1, e]] as f64,
                f.values()[[0, e]] as f64,
            );
            let ug = -scale * dzdy / fe;
            let vg = scale * dzdx / fe;
            if ug.is_finite() && vg.is_finite() {
                out[[0, e]] = ug as f32;
                out[[1, e]] = vg as f32;
            }
        }
        FlatGrid::new(
            grad.domain().clone(),
            vec![
                Param::new("ugeo", Unit::MeterPerSecond),
                Param::new("vgeo", Unit::MeterPerSecond),
            ],
            out,
        )
    })
}

/// Combine u and v into one vector field in u's velocity unit
pub fn flow_vectors(u: &GridField, v: &GridField) -> Result<GridField> {
    combine_components(&[u, v])
}

/// Combine u, v and w into one vector field in u's velocity unit
pub fn flow_vectors_3d(u: &GridField, v: &GridField, w: &GridField) -> Result<GridField> {
    combine_components(&[u, v, w])
}

fn combine_components(parts: &[&GridField]) -> Result<GridField> {
    let unit = parts[0]
        .params()
        .and_then(|p| p.first())
        .map(|p| p.unit.clone())
        .ok_or_else(|| EkmanError::DataNotFound {
            message: "every step of the first vector component is missing".to_string(),
        })?;
    if unit.quantity() != Quantity::Speed {
        return Err(EkmanError::invalid_param(
            "flow_vectors",
            format!("first component is in {}, not a velocity", unit),
        ));
    }
    let mut vector = parts[0].map_flat(|g| g.select(0))?;
    for part in &parts[1..] {
        let converted = in_unit(part, &unit)?;
        vector = vector.zip_flat(&converted, |a, b| stack(a, &b.select(0)?))?;
    }
    Ok(vector)
}

/// Rotate grid-relative vector components into earth-relative (east, north) ones
pub fn true_flow_vectors(u: &GridField, v: &GridField) -> Result<GridField> {
    let vector = flow_vectors(u, v)?;
    let mut last: Option<(Arc<SampleDomain>, Arc<Vec<f64>>)> = None;
    vector.map_flat(|g| {
        let cached = last
            .as_ref()
            .filter(|(source, _)| domains_equal(source, g.domain()))
            .map(|(_, angles)| angles.clone());
        let angles = match cached {
            Some(angles) => angles,
            None => {
                let angles = Arc::new(Spherical::new(g.domain())?.x_axis_angle());
                last = Some((g.domain().clone(), angles.clone()));
                angles
            }
        };
        let mut values = g.values().clone();
        for (e, theta) in angles.iter().enumerate().take(g.len()) {
            let (gu, gv) = (values[[0, e]] as f64, values[[1, e]] as f64);
            let (sin, cos) = theta.sin_cos();
            values[[0, e]] = (gu * cos - gv * sin) as f32;
            values[[1, e]] = (gu * sin + gv * cos) as f32;
        }
        g.with_values(values)
    })
}

fn require_vector(field: &GridField, operation: &str) -> Result<()> {
    match field.params() {
        Some(p) if p.len() >= 2 => Ok(()),
        Some(p) => Err(EkmanError::invalid_param(
            operation,
            format!("not a vector grid ({} component)", p.len()),
        )),
        None => Ok(()),
    }
}

/// Magnitude `sqrt(u² + v²)` of the first two components, in u's unit
pub fn vector_magnitude(vector: &GridField) -> Result<GridField> {
    magnitude(vector, "vector_mag")
}

/// Wind speed from separate u and v grids, named `WindSpeed`
pub fn wind_speed(u: &GridField, v: &GridField) -> Result<GridField> {
    magnitude(&flow_vectors(u, v)?, "WindSpeed")
}

fn magnitude(vector: &GridField, name: &str) -> Result<GridField> {
    require_vector(vector, "vector_magnitude")?;
    vector.map_flat(|g| {
        let values = g
            .component(0)
            .iter()
            .zip(g.component(1).iter())
            .map(|(u, v)| (u * u + v * v).sqrt())
            .collect();
        FlatGrid::scalar(
            g.domain().clone(),
            Param::new(name, g.params()[0].unit.clone()),
            values,
        )
    })
}

/// Meteorological direction (degrees, where the flow comes from) of a vector grid.
///
/// Calm points have direction 0.
pub fn vector_direction(vector: &GridField) -> Result<GridField> {
    require_vector(vector, "vector_direction")?;
    vector.map_flat(|g| {
        let values = g
            .component(0)
            .iter()
            .zip(g.component(1).iter())
            .map(|(&u, &v)| {
                if u.is_nan() || v.is_nan() {
                    f32::NAN
                } else if u == 0.0 && v == 0.0 {
                    0.0
                } else {
                    let dir = (-u).atan2(-v).to_degrees();
                    if dir < 0.0 {
                        dir + 360.0
                    } else {
                        dir
                    }
                }
            })
            .collect();
        FlatGrid::scalar(
            g.domain().clone(),
            Param::new("direction", Unit::Degree),
            values,
        )
    })
}
