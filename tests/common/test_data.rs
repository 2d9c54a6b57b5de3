//! Test data generation utilities.
//!
//! Synthetic domains and fields whose values follow a known formula of the
//! sample coordinates, so tests can check results analytically.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use ekman::{Axis, FlatGrid, GridField, LinearAxis, Param, SampleDomain, Unit};

/// Regular longitude/latitude grid (degrees)
pub fn lon_lat_domain(lon: (f64, f64, usize), lat: (f64, f64, usize)) -> Arc<SampleDomain> {
    Arc::new(
        SampleDomain::linear(
            vec![Axis::longitude(), Axis::latitude()],
            vec![
                LinearAxis::new(lon.0, lon.1, lon.2),
                LinearAxis::new(lat.0, lat.1, lat.2),
            ],
        )
        .unwrap(),
    )
}

/// Longitude/latitude/pressure volume, pressure in hPa
pub fn pressure_volume(lon: (f64, f64, usize), lat: (f64, f64, usize), p: (f64, f64, usize)) -> Arc<SampleDomain> {
    Arc::new(
        SampleDomain::linear(
            vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
            vec![
                LinearAxis::new(lon.0, lon.1, lon.2),
                LinearAxis::new(lat.0, lat.1, lat.2),
                LinearAxis::new(p.0, p.1, p.2),
            ],
        )
        .unwrap(),
    )
}

/// Scalar grid whose value at each sample is `f(coordinates)`
pub fn grid_from<F>(domain: &Arc<SampleDomain>, name: &str, unit: Unit, f: F) -> FlatGrid
where
    F: Fn(&[f64]) -> f64,
{
    let values = (0..domain.len())
        .map(|e| f(&domain.sample(e)) as f32)
        .collect();
    FlatGrid::scalar(domain.clone(), Param::new(name, unit), values).unwrap()
}

/// Same as [`grid_from`], as a field
pub fn field_from<F>(domain: &Arc<SampleDomain>, name: &str, unit: Unit, f: F) -> GridField
where
    F: Fn(&[f64]) -> f64,
{
    grid_from(domain, name, unit, f).into()
}

/// Hourly valid times starting at 2024-01-01T00Z
pub fn hourly_times(n: usize) -> Vec<DateTime<Utc>> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n).map(|k| start + Duration::hours(k as i64)).collect()
}

/// Time sequence of the given grids at hourly times
pub fn hourly_series(grids: Vec<FlatGrid>) -> GridField {
    let times = hourly_times(grids.len());
    let steps = grids.into_iter().map(|g| Some(g.into())).collect();
    GridField::time_sequence(times, steps).unwrap()
}
