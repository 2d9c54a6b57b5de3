//! Resampling and slicing.
//!
//! Every operation returns a new field; sources are never mutated. Missing
//! steps stay missing and points outside the source domain come out NaN.

mod slice;
mod subset;

pub(crate) use slice::horizontal_domain;
pub use slice::{
    make_2d_grid_from_slice, profile_at_point, sample_at_point, slice_along_line, slice_at_level,
    LatLonPoint,
};
pub use subset::subset;

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{apply_stencil, domains_equal, stencil, AxisKind, SampleDomain, SamplingMode};
use crate::error::{EkmanError, Result};
use crate::field::{align_times, FlatGrid, GridField, Sequence};
use crate::resolver::{self, is_single_point_domain};

/// Values of `field` at the sample points of `target`, step by step
pub fn resample(field: &GridField, target: &Arc<SampleDomain>, mode: SamplingMode) -> Result<GridField> {
    field.map_flat(|g| resample_flat(g, target, mode))
}

/// Resample one flat grid onto `target`
pub fn resample_flat(grid: &FlatGrid, target: &Arc<SampleDomain>, mode: SamplingMode) -> Result<FlatGrid> {
    let source = grid.domain();
    if domains_equal(source, target) {
        return grid.with_domain(target.clone());
    }
    if source.dimension() != target.dimension()
        && source.manifold_dimension() != target.manifold_dimension()
    {
        return Err(EkmanError::incompatible(
            "resample",
            format!(
                "target {} and source {} dimensions are incompatible",
                target.describe(),
                source.describe()
            ),
        ));
    }
    if is_single_point_domain(source) {
        return resample_single_point(grid, target);
    }

    let samples = target.samples();
    let mut points = resolver::convert_points(target, samples.view(), source)?;
    if let Some(lon) = source.find_axis(AxisKind::Longitude) {
        let (lo, hi) = source.low_high();
        for v in points.row_mut(lon).iter_mut() {
            *v = resolver::normalize_into(*v, lo[lon], hi[lon]);
        }
    }
    let values = interpolate(grid, source, points.view(), mode);
    debug!(
        source = %source.describe(),
        target = %target.describe(),
        ?mode,
        "resampled grid"
    );
    FlatGrid::new(target.clone(), grid.params().to_vec(), values)
}

/// Interpolate every component of `grid` at points given in the source's native coordinates
pub(crate) fn interpolate(
    grid: &FlatGrid,
    source: &SampleDomain,
    points: ArrayView2<f64>,
    mode: SamplingMode,
) -> Array2<f32> {
    let frac = source.fractional_indices(points);
    let n = points.ncols();
    let values = grid.values();
    let mut out = Array2::<f32>::from_elem((values.nrows(), n), f32::NAN);
    let mut st = Vec::with_capacity(8);
    let mut f = vec![0.0; frac.nrows()];
    for p in 0..n {
        for (m, v) in f.iter_mut().enumerate() {
            *v = frac[[m, p]];
        }
        if !stencil(source.lengths(), &f, mode, &mut st) {
            continue;
        }
        for c in 0..values.nrows() {
            let row = values.row(c);
            out[[c, p]] = match row.as_slice() {
                Some(slice) => apply_stencil(slice, &st),
                None => apply_stencil(&row.to_vec(), &st),
            };
        }
    }
    out
}

/// A single horizontal point (a profile) resampled onto `target`.
///
/// A one-point target picks the nearest source level; anything larger
/// returns the source unchanged.
fn resample_single_point(grid: &FlatGrid, target: &Arc<SampleDomain>) -> Result<FlatGrid> {
    let source = grid.domain();
    let vertical = match source.vertical_axis() {
        Some(v) if source.len() > 1 => v,
        _ => return Ok(grid.clone()),
    };
    if target.len() != 1 {
        return Ok(grid.clone());
    }
    let wanted = resolver::convert_points(target, target.samples().view(), source)?;
    let level = wanted[[vertical, 0]];
    let samples = source.samples();
    let nearest = samples
        .row(vertical)
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|(_, a), (_, b)| {
            (**a - level)
                .abs()
                .partial_cmp(&(**b - level).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(e, _)| e)
        .ok_or_else(|| {
            EkmanError::UnresolvableLevel {
                operation: "resample".to_string(),
                message: format!("no finite levels in {}", source.describe()),
            }
        })?;
    let values = grid.values().column(nearest).to_owned().insert_axis(ndarray::Axis(1));
    FlatGrid::new(target.clone(), grid.params().to_vec(), values)
}

/// Resample a field onto the spatial domain of another field
pub fn resample_like(field: &GridField, like: &GridField, mode: SamplingMode) -> Result<GridField> {
    match like.spatial_domain() {
        Some(domain) => resample(field, domain, mode),
        None => Ok(field.clone()),
    }
}

/// Align a field's time steps to `times`; a flat field is repeated for every time.
///
/// Each requested time takes the exact or nearest step inside the field's
/// time range, and is missing outside it.
pub fn resample_to_times(field: &GridField, times: &[DateTime<Utc>]) -> Result<GridField> {
    match field {
        GridField::TimeSequence(seq) => {
            let aligned = align_times(times, &seq.keys);
            let steps = aligned
                .iter()
                .map(|idx| idx.and_then(|j| seq.steps.get(j).cloned().flatten()))
                .collect();
            Ok(GridField::TimeSequence(Sequence {
                name: seq.name.clone(),
                keys: times.to_vec(),
                steps,
            }))
        }
        other => GridField::time_sequence(times.to_vec(), vec![Some(other.clone()); times.len()]),
    }
}

/// Minimum and maximum over every finite value of every step
pub fn field_min_max(field: &GridField) -> (f32, f32) {
    field
        .flats()
        .iter()
        .map(|g| g.min_max())
        .fold((f32::NAN, f32::NAN), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
}

/// True when no step holds a finite value
pub fn is_all_missing(field: &GridField) -> bool {
    field.flats().iter().all(|g| g.is_all_missing())
}

/// True when some step is missing or holds a non-finite value
pub fn is_any_missing(field: &GridField) -> bool {
    let missing_step = match field {
        GridField::Flat(_) => false,
        GridField::TimeSequence(s) => s.steps.iter().any(|st| st.is_none()),
        GridField::IndexSequence(s) => s.steps.iter().any(|st| st.is_none()),
    };
    missing_step || field.flats().iter().any(|g| g.is_any_missing())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis};
    use crate::field::Param;
    use crate::units::Unit;

    fn lon_lat(first: f64, step: f64, n: usize) -> Arc<SampleDomain> {
        Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude()],
                vec![LinearAxis::new(first, step, n), LinearAxis::new(0.0, 1.0, 3)],
            )
            .unwrap(),
        )
    }

    fn ramp(domain: &Arc<SampleDomain>) -> FlatGrid {
        let values = (0..domain.len())
            .map(|e| domain.sample(e)[0] as f32)
            .collect();
        FlatGrid::scalar(domain.clone(), Param::new("x", Unit::Dimensionless), values).unwrap()
    }

    #[test]
    fn test_weighted_average_is_linear_on_a_ramp() {
        let src = lon_lat(0.0, 1.0, 5);
        let dst = lon_lat(0.5, 1.0, 4);
        let out = resample_flat(&ramp(&src), &dst, SamplingMode::WeightedAverage).unwrap();
        for e in 0..dst.len() {
            assert!((out.values()[[0, e]] - dst.sample(e)[0] as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn test_resample_to_times_takes_nearest_step_in_range() {
        use chrono::{Duration, TimeZone};
        let d = lon_lat(0.0, 1.0, 2);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let step = |v: f32| {
            let g = FlatGrid::scalar(d.clone(), Param::new("t", Unit::Kelvin), vec![v; d.len()]).unwrap();
            Some(GridField::from(g))
        };
        let series =
            GridField::time_sequence(vec![t0, t0 + Duration::hours(2)], vec![step(1.0), step(3.0)]).unwrap();
        let wanted = vec![
            t0 + Duration::minutes(30),
            t0 + Duration::minutes(90),
            t0 + Duration::hours(3),
        ];
        let out = resample_to_times(&series, &wanted).unwrap();
        assert_eq!(out.times().unwrap(), wanted.as_slice());
        assert_eq!(out.step_count(), 3);
        let flats = out.flats();
        assert_eq!(flats.len(), 2);
        assert_eq!(flats[0].values()[[0, 0]], 1.0);
        assert_eq!(flats[1].values()[[0, 0]], 3.0);

        // a single grid is repeated for every time
        let flat = step(5.0).unwrap();
        let out = resample_to_times(&flat, &wanted).unwrap();
        assert_eq!(out.flats().len(), 3);
    }

    #[test]
    fn test_outside_points_are_missing() {
        let src = lon_lat(0.0, 1.0, 5);
        let dst = lon_lat(3.0, 1.0, 3);
        let out = resample_flat(&ramp(&src), &dst, SamplingMode::NearestNeighbor).unwrap();
        assert_eq!(out.values()[[0, 0]], 3.0);
        assert!(out.values()[[0, 2]].is_nan());
    }

    #[test]
    fn test_single_point_source_picks_nearest_level() {
        let src = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
                vec![
                    LinearAxis::new(10.0, 1.0, 1),
                    LinearAxis::new(20.0, 1.0, 1),
                    LinearAxis::new(1000.0, -100.0, 5),
                ],
            )
            .unwrap(),
        );
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let grid = FlatGrid::scalar(src, Param::new("t", Unit::Kelvin), values).unwrap();
        let target = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
                vec![
                    LinearAxis::new(10.0, 1.0, 1),
                    LinearAxis::new(20.0, 1.0, 1),
                    LinearAxis::new(790.0, 1.0, 1),
                ],
            )
            .unwrap(),
        );
        let out = resample_flat(&grid, &target, SamplingMode::WeightedAverage).unwrap();
        assert_eq!(out.values()[[0, 0]], 3.0);
    }
}
