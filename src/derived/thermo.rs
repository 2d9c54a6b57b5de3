//! Moisture and potential-temperature quantities.
//!
//! When no pressure grid is supplied it is taken from the temperature's own
//! vertical coordinate, built once per distinct domain. A time-varying
//! auxiliary grid is aligned to the primary field's times first; a
//! time-varying auxiliary against a single grid contributes its first step.

use tracing::debug;

use super::grids::pressure_grid;
use super::{absolute_vorticity, partial, stack, EarthModel, GRAVITY};
use crate::algebra::multiply;
use crate::domain::AxisKind;
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::resample::resample_to_times;
use crate::units::{Quantity, Unit};

/// Water vapour to dry air molecular weight ratio
const EPSILON: f64 = 0.622;
/// Rd / cp for dry air
const KAPPA: f64 = 0.2857;
/// Latent heat of vaporization (J kg⁻¹)
const LATENT_HEAT: f64 = 2.501e6;
/// Specific heat of dry air at constant pressure (J kg⁻¹ K⁻¹)
const CP_DRY: f64 = 1004.0;

/// Saturation vapour pressure (hPa) over water at a temperature (K), Bolton (1980)
fn es_hpa(t_kelvin: f64) -> f64 {
    let tc = t_kelvin - 273.15;
    6.112 * (17.67 * tc / (tc + 243.5)).exp()
}

/// Temperature (K) at which the saturation vapour pressure equals `e` (hPa)
fn temperature_at_es(e_hpa: f64) -> f64 {
    let x = (e_hpa / 6.112).ln();
    243.5 * x / (17.67 - x) + 273.15
}

/// Saturation mixing ratio (kg/kg)
fn ws(t_kelvin: f64, p_hpa: f64) -> f64 {
    let es = es_hpa(t_kelvin);
    EPSILON * es / (p_hpa - es)
}

/// Saturation vapour pressure (hPa) of a temperature grid
pub fn saturation_vapor_pressure(temperature: &GridField) -> Result<GridField> {
    evaluate(
        temperature,
        &[Unit::Kelvin],
        Param::new("saturation_vapor_pressure", Unit::Hectopascal),
        |x| es_hpa(x[0]),
    )
}

/// Dewpoint (K) from temperature and relative humidity
pub fn dewpoint(temperature: &GridField, rh: &GridField) -> Result<GridField> {
    let inputs = combine(temperature, rh)?;
    evaluate(
        &inputs,
        &[Unit::Kelvin, Unit::Percent],
        Param::new("dewpoint", Unit::Kelvin),
        |x| temperature_at_es(es_hpa(x[0]) * x[1] / 100.0),
    )
}

/// Mixing ratio (g/kg): saturation mixing ratio times RH/100
pub fn mixing_ratio(temperature: &GridField, rh: &GridField, pressure: Option<&GridField>) -> Result<GridField> {
    let inputs = combine(&with_pressure(temperature, pressure)?, rh)?;
    evaluate(
        &inputs,
        &[Unit::Kelvin, Unit::Hectopascal, Unit::Percent],
        Param::new("mixing_ratio", Unit::GramPerKg),
        |x| 1000.0 * ws(x[0], x[1]) * x[2] / 100.0,
    )
}

/// Relative humidity (%) from temperature and mixing ratio
pub fn relative_humidity(
    temperature: &GridField,
    mixing_ratio: &GridField,
    pressure: Option<&GridField>,
) -> Result<GridField> {
    let inputs = combine(&with_pressure(temperature, pressure)?, mixing_ratio)?;
    evaluate(
        &inputs,
        &[Unit::Kelvin, Unit::Hectopascal, Unit::KgPerKg],
        Param::new("relative_humidity", Unit::Percent),
        |x| 100.0 * x[2] / ws(x[0], x[1]),
    )
}

/// Potential temperature `T·(1000/p)^κ` (K)
pub fn potential_temperature(temperature: &GridField, pressure: Option<&GridField>) -> Result<GridField> {
    evaluate(
        &with_pressure(temperature, pressure)?,
        &[Unit::Kelvin, Unit::Hectopascal],
        Param::new("potential_temperature", Unit::Kelvin),
        |x| x[0] * (1000.0 / x[1]).powf(KAPPA),
    )
}

/// Equivalent potential temperature `θ·exp(L·w / (cp·T))` (K), with the
/// mixing ratio computed from temperature and relative humidity
pub fn equivalent_potential_temperature(
    temperature: &GridField,
    rh: &GridField,
    pressure: Option<&GridField>,
) -> Result<GridField> {
    let with_p = with_pressure(temperature, pressure)?;
    let inputs = combine(&with_p, rh)?;
    evaluate(
        &inputs,
        &[Unit::Kelvin, Unit::Hectopascal, Unit::Percent],
        Param::new("equivalent_potential_temperature", Unit::Kelvin),
        |x| {
            let (t, p, rh) = (x[0], x[1], x[2]);
            let w = ws(t, p) * rh / 100.0;
            t * (1000.0 / p).powf(KAPPA) * (LATENT_HEAT * w / (CP_DRY * t)).exp()
        },
    )
}

/// Isentropic potential vorticity `g·(∂θ/∂p)·ζa` from temperature on pressure levels.
///
/// With `conventional_sign` the result is negated (`−g·(∂θ/∂p)·ζa`).
pub fn isentropic_potential_vorticity(
    temperature: &GridField,
    absolute_vorticity: &GridField,
    pressure: Option<&GridField>,
    earth: &EarthModel,
    conventional_sign: bool,
) -> Result<GridField> {
    let theta = potential_temperature(temperature, pressure)?;
    ipv_from_theta(&theta, absolute_vorticity, earth, conventional_sign)
}

/// Potential vorticity from potential temperature and the wind that gives
/// its absolute vorticity
pub fn potential_vorticity(
    theta: &GridField,
    u: &GridField,
    v: &GridField,
    earth: &EarthModel,
    conventional_sign: bool,
) -> Result<GridField> {
    let absvort = absolute_vorticity(u, v, earth)?;
    ipv_from_theta(theta, &absvort, earth, conventional_sign)
}

fn ipv_from_theta(
    theta: &GridField,
    absvort: &GridField,
    earth: &EarthModel,
    conventional_sign: bool,
) -> Result<GridField> {
    let domain = match theta.spatial_domain() {
        Some(d) => d.clone(),
        None => return Ok(theta.clone()),
    };
    let vertical = domain
        .vertical_axis()
        .filter(|&v| domain.axes()[v].kind == AxisKind::Pressure)
        .ok_or_else(|| EkmanError::UnresolvableLevel {
            operation: "isentropic_potential_vorticity".to_string(),
            message: format!("needs a pressure vertical coordinate ({})", domain.describe()),
        })?;
    let dthdp = partial(theta, vertical, earth)?;
    let product = multiply(&dthdp, absvort)?;
    let sign = if conventional_sign { -1.0 } else { 1.0 };
    let factor = (sign * GRAVITY) as f32;
    debug!(conventional_sign, "computing isentropic potential vorticity");
    product.map_flat(|g| {
        Ok(g.map(|v| v * factor)
            .renamed("ipv")
            .with_unit(Unit::Other("K m2 kg-1 s-1".to_string())))
    })
}

/// Temperature stacked with a pressure grid
fn with_pressure(temperature: &GridField, pressure: Option<&GridField>) -> Result<GridField> {
    match pressure {
        Some(p) => combine(temperature, p),
        None => {
            let p = pressure_grid(temperature)?;
            temperature.zip_flat(&p, stack)
        }
    }
}

/// Stack the first component of an auxiliary grid onto every step of `primary`
fn combine(primary: &GridField, auxiliary: &GridField) -> Result<GridField> {
    let aligned = match (primary.times(), auxiliary) {
        (Some(times), GridField::TimeSequence(_)) => resample_to_times(auxiliary, times)?,
        (None, GridField::TimeSequence(seq)) => {
            seq.steps.iter().flatten().next().cloned().ok_or_else(|| EkmanError::DataNotFound {
                message: format!("every step of '{}' is missing", seq.name),
            })?
        }
        _ => auxiliary.clone(),
    };
    primary.zip_flat(&aligned, |a, b| stack(a, &b.select(0)?))
}

/// Apply a point function to the leading components of every step, each
/// converted into the matching unit (components in unknown units are used as is)
fn evaluate<F>(inputs: &GridField, units: &[Unit], param: Param, f: F) -> Result<GridField>
where
    F: Fn(&[f64]) -> f64,
{
    inputs.map_flat(|g| {
        if g.params().len() < units.len() {
            return Err(EkmanError::invalid_param(
                &param.name,
                format!("needs {} inputs, got {}", units.len(), g.params().len()),
            ));
        }
        let mut columns = Vec::with_capacity(units.len());
        for (c, unit) in units.iter().enumerate() {
            let mut column: Vec<f64> = g.component(c).iter().map(|v| *v as f64).collect();
            let from = &g.params()[c].unit;
            if from.quantity() != Quantity::Unknown {
                from.convert_slice(&mut column, unit)?;
            }
            columns.push(column);
        }
        let mut args = vec![0.0; units.len()];
        let values = (0..g.len())
            .map(|e| {
                for (a, column) in args.iter_mut().zip(&columns) {
                    *a = column[e];
                }
                let v = f(&args);
                if v.is_finite() {
                    v as f32
                } else {
                    f32::NAN
                }
            })
            .collect();
        FlatGrid::scalar(g.domain().clone(), param.clone(), values)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis, SampleDomain};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn column(name: &str, unit: Unit, values: Vec<f32>) -> GridField {
        let d = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
                vec![
                    LinearAxis::new(0.0, 1.0, 1),
                    LinearAxis::new(0.0, 1.0, 1),
                    LinearAxis::new(1000.0, -250.0, 3),
                ],
            )
            .unwrap(),
        );
        FlatGrid::scalar(d, Param::new(name, unit), values)
            .unwrap()
            .into()
    }

    #[test]
    fn test_potential_temperature_uses_domain_pressure() {
        let t = column("t", Unit::Kelvin, vec![300.0, 280.0, 260.0]);
        let theta = potential_temperature(&t, None).unwrap();
        let values = theta.first_flat().unwrap().values().row(0).to_vec();
        assert!((values[0] - 300.0).abs() < 1e-3);
        assert!((values[2] as f64 - 260.0 * 2f64.powf(KAPPA)).abs() < 1e-3);
    }

    #[test]
    fn test_saturated_dewpoint_equals_temperature() {
        let t = column("t", Unit::Celsius, vec![20.0, 10.0, 0.0]);
        let rh = column("rh", Unit::Percent, vec![100.0, 50.0, 100.0]);
        let td = dewpoint(&t, &rh).unwrap();
        let values = td.first_flat().unwrap().values().row(0).to_vec();
        assert!((values[0] - 293.15).abs() < 1e-3);
        assert!(values[1] < 283.15);
        assert!((values[2] - 273.15).abs() < 1e-3);
    }

    #[test]
    fn test_mixing_ratio_and_relative_humidity_invert() {
        let t = column("t", Unit::Kelvin, vec![295.0, 285.0, 270.0]);
        let rh = column("rh", Unit::Percent, vec![80.0, 60.0, 40.0]);
        let w = mixing_ratio(&t, &rh, None).unwrap();
        let back = relative_humidity(&t, &w, None).unwrap();
        let values = back.first_flat().unwrap().values().row(0).to_vec();
        for (v, expected) in values.iter().zip([80.0, 60.0, 40.0]) {
            assert!((v - expected).abs() < 1e-2);
        }
        let theta_e = equivalent_potential_temperature(&t, &rh, None).unwrap();
        let theta = potential_temperature(&t, None).unwrap();
        let (a, b) = (theta_e.first_flat().unwrap(), theta.first_flat().unwrap());
        assert!(a.values()[[0, 0]] > b.values()[[0, 0]]);
    }

    #[test]
    fn test_time_varying_pressure_is_aligned() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let t = column("t", Unit::Kelvin, vec![300.0, 300.0, 300.0]);
        let temps = GridField::time_sequence(vec![t0, t1], vec![Some(t.clone()), Some(t)]).unwrap();
        let p0 = column("p", Unit::Hectopascal, vec![1000.0, 1000.0, 1000.0]);
        let p1 = column("p", Unit::Hectopascal, vec![500.0, 500.0, 500.0]);
        let pressures = GridField::time_sequence(vec![t0, t1], vec![Some(p0), Some(p1)]).unwrap();
        let theta = potential_temperature(&temps, Some(&pressures)).unwrap();
        let flats = theta.flats();
        assert!((flats[0].values()[[0, 0]] - 300.0).abs() < 1e-3);
        assert!(flats[1].values()[[0, 0]] > 360.0);
    }

    #[test]
    fn test_ipv_needs_pressure_levels_and_honours_sign() {
        let t = column("t", Unit::Kelvin, vec![300.0, 290.0, 280.0]);
        let absvort = column("absvorticity", Unit::PerSecond, vec![1e-4, 1e-4, 1e-4]);
        let earth = EarthModel::default();
        let plain = isentropic_potential_vorticity(&t, &absvort, None, &earth, false).unwrap();
        let signed = isentropic_potential_vorticity(&t, &absvort, None, &earth, true).unwrap();
        let (a, b) = (plain.first_flat().unwrap(), signed.first_flat().unwrap());
        assert_eq!(a.param().name, "ipv");
        // theta rises with height, so it falls with pressure
        assert!(a.values()[[0, 1]] < 0.0);
        assert_eq!(a.values()[[0, 1]], -b.values()[[0, 1]]);
    }
}
