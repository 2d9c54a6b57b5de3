//! Grids computed from a field's domain rather than from its values.
//!
//! Each is built once per distinct domain and reused for every step that
//! shares it.

use std::sync::Arc;

use super::EARTH_TWO_OMEGA;
use crate::domain::vertical::altitude_to_pressure;
use crate::domain::{domains_equal, AxisKind, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::resolver::{get_lat_lon, reference_samples};
use crate::units::Unit;

/// Coriolis parameter `2Ω·sin(latitude)` at every sample
pub fn coriolis_grid(field: &GridField) -> Result<GridField> {
    domain_grid(field, |domain| {
        let (lats, _) = get_lat_lon(domain)?;
        let values = lats
            .iter()
            .map(|lat| (EARTH_TWO_OMEGA * lat.to_radians().sin()) as f32)
            .collect();
        Ok((Param::new("CORIOLIS", Unit::PerSecond), values))
    })
}

/// Latitude (degrees) of every sample
pub fn latitude_grid(field: &GridField) -> Result<GridField> {
    domain_grid(field, |domain| {
        let (lats, _) = get_lat_lon(domain)?;
        Ok((
            Param::new("latitude", Unit::Degree),
            lats.iter().map(|v| *v as f32).collect(),
        ))
    })
}

/// Longitude (degrees) of every sample
pub fn longitude_grid(field: &GridField) -> Result<GridField> {
    domain_grid(field, |domain| {
        let (_, lons) = get_lat_lon(domain)?;
        Ok((
            Param::new("longitude", Unit::Degree),
            lons.iter().map(|v| *v as f32).collect(),
        ))
    })
}

/// Pressure (hPa) of every sample, from the native vertical coordinate or its reference.
///
/// Altitudes are converted through the standard atmosphere.
pub fn pressure_grid(field: &GridField) -> Result<GridField> {
    domain_grid(field, |domain| {
        let values = domain_pressure(domain)?.iter().map(|v| *v as f32).collect();
        Ok((Param::new("pressure", Unit::Hectopascal), values))
    })
}

fn domain_pressure(domain: &SampleDomain) -> Result<Vec<f64>> {
    let unresolvable = || EkmanError::UnresolvableLevel {
        operation: "pressure_grid".to_string(),
        message: format!("no pressure or altitude vertical coordinate ({})", domain.describe()),
    };
    let v = domain.vertical_axis().ok_or_else(unresolvable)?;
    let native = &domain.axes()[v];
    let (axis, row) = if matches!(native.kind, AxisKind::Pressure | AxisKind::Altitude) {
        (native.clone(), domain.samples().row(v).to_vec())
    } else {
        let (axes, reference) = reference_samples(domain)?;
        let rv = axes
            .iter()
            .position(|a| matches!(a.kind, AxisKind::Pressure | AxisKind::Altitude))
            .ok_or_else(unresolvable)?;
        (axes[rv].clone(), reference.row(rv).to_vec())
    };
    let mut values = row;
    if axis.kind == AxisKind::Pressure {
        axis.unit.convert_slice(&mut values, &Unit::Hectopascal)?;
    } else {
        axis.unit.convert_slice(&mut values, &Unit::Meter)?;
        values.iter_mut().for_each(|z| *z = altitude_to_pressure(*z));
    }
    Ok(values)
}

fn domain_grid<F>(field: &GridField, mut build: F) -> Result<GridField>
where
    F: FnMut(&SampleDomain) -> Result<(Param, Vec<f32>)>,
{
    let mut last: Option<(Arc<SampleDomain>, FlatGrid)> = None;
    field.map_flat(|g| {
        if let Some((domain, grid)) = &last {
            if domains_equal(domain, g.domain()) {
                return grid.with_domain(g.domain().clone());
            }
        }
        let (param, values) = build(g.domain())?;
        let grid = FlatGrid::scalar(g.domain().clone(), param, values)?;
        last = Some((g.domain().clone(), grid.clone()));
        Ok(grid)
    })
}
