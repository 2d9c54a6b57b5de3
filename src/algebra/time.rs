//! Reductions and filters along the time axis.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use super::binary::{binary, BinaryOp};
use super::reduce::{fold_arrays, Reduction};
use crate::domain::{domains_equal, SamplingMode};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Sequence};
use crate::resample::resample_flat;

/// Fold every time step into one field.
///
/// Steps `start, start + stride, ...` contribute; missing steps and missing
/// samples are skipped, and the average divides by the number of present
/// values at each point. With `make_times` the result is repeated on every
/// input time. A field that is not a time sequence comes back unchanged.
pub fn apply_function_over_time(
    field: &GridField,
    function: Reduction,
    start: usize,
    stride: usize,
    make_times: bool,
) -> Result<GridField> {
    let seq = match field {
        GridField::TimeSequence(seq) => seq,
        other => return Ok(other.clone()),
    };
    if stride == 0 {
        return Err(EkmanError::invalid_param("stride", "stride must be at least 1"));
    }
    let steps: Vec<&GridField> = seq
        .steps
        .iter()
        .skip(start)
        .step_by(stride)
        .flatten()
        .collect();
    let reduced = fold_fields(&steps, function)?.ok_or_else(|| EkmanError::DataNotFound {
        message: format!("every step of '{}' is missing", seq.name),
    })?;
    debug!(
        function = %function,
        steps = steps.len(),
        make_times,
        "reduced over time"
    );
    if make_times {
        GridField::time_sequence(seq.keys.clone(), vec![Some(reduced); seq.keys.len()])
    } else {
        Ok(reduced)
    }
}

pub fn average_over_time(field: &GridField, make_times: bool) -> Result<GridField> {
    apply_function_over_time(field, Reduction::Average, 0, 1, make_times)
}

pub fn sum_over_time(field: &GridField, make_times: bool) -> Result<GridField> {
    apply_function_over_time(field, Reduction::Sum, 0, 1, make_times)
}

pub fn min_over_time(field: &GridField, make_times: bool) -> Result<GridField> {
    apply_function_over_time(field, Reduction::Min, 0, 1, make_times)
}

pub fn max_over_time(field: &GridField, make_times: bool) -> Result<GridField> {
    apply_function_over_time(field, Reduction::Max, 0, 1, make_times)
}

pub fn standard_deviation_over_time(field: &GridField, make_times: bool) -> Result<GridField> {
    apply_function_over_time(field, Reduction::StdDev, 0, 1, make_times)
}

/// Fold fields of the same structure point by point.
///
/// Flat grids are taken onto the first grid's domain. Index sequences fold
/// member by member.
pub(crate) fn fold_fields(fields: &[&GridField], function: Reduction) -> Result<Option<GridField>> {
    let first = match fields.first() {
        Some(f) => *f,
        None => return Ok(None),
    };
    match first {
        GridField::Flat(base) => {
            let mut arrays = Vec::with_capacity(fields.len());
            for f in fields {
                let g = f.as_flat().ok_or_else(|| {
                    EkmanError::incompatible(
                        "fold",
                        "steps mix flat grids and sequences".to_string(),
                    )
                })?;
                arrays.push(onto(g, base)?.values().clone());
            }
            match fold_arrays(arrays.iter(), function) {
                Some(values) => Ok(Some(base.with_values(values)?.into())),
                None => Ok(None),
            }
        }
        GridField::IndexSequence(members) => {
            let mut steps = Vec::with_capacity(members.keys.len());
            for j in 0..members.keys.len() {
                let column: Vec<&GridField> = fields
                    .iter()
                    .filter_map(|f| match f {
                        GridField::IndexSequence(s) => s.steps.get(j).and_then(|s| s.as_ref()),
                        _ => None,
                    })
                    .collect();
                steps.push(fold_fields(&column, function)?);
            }
            Ok(Some(GridField::IndexSequence(Sequence {
                name: members.name.clone(),
                keys: members.keys.clone(),
                steps,
            })))
        }
        GridField::TimeSequence(_) => Err(EkmanError::incompatible(
            "fold",
            "nested time sequences are not supported".to_string(),
        )),
    }
}

/// `grid` expressed on `base`'s domain
fn onto(grid: &FlatGrid, base: &FlatGrid) -> Result<FlatGrid> {
    if domains_equal(grid.domain(), base.domain()) {
        Ok(grid.clone())
    } else if grid.len() == base.len() {
        grid.with_domain(base.domain().clone())
    } else {
        resample_flat(grid, base.domain(), SamplingMode::WeightedAverage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFunc {
    Sum,
    Difference,
}

impl FromStr for StepFunc {
    type Err = EkmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(StepFunc::Sum),
            "difference" => Ok(StepFunc::Difference),
            other => Err(EkmanError::invalid_param(
                "function",
                format!("unknown time step function '{}'", other),
            )),
        }
    }
}

/// `D(t) = D(t) op D(t + offset)` for every step.
///
/// Steps whose partner falls outside the series are filled with missing
/// values. An offset of zero combines every step with the first step.
pub fn time_step_func(field: &GridField, offset: isize, func: StepFunc) -> Result<GridField> {
    let seq = match field {
        GridField::TimeSequence(seq) => seq,
        other => return Ok(other.clone()),
    };
    let op = match func {
        StepFunc::Sum => BinaryOp::Add,
        StepFunc::Difference => BinaryOp::Subtract,
    };
    let n = seq.steps.len() as isize;
    let base = seq.steps.first().and_then(|s| s.as_ref());
    let mut steps = Vec::with_capacity(seq.steps.len());
    for (t, step) in seq.steps.iter().enumerate() {
        let current = match step {
            Some(s) => s,
            None => {
                steps.push(None);
                continue;
            }
        };
        let partner_index = t as isize + offset;
        let partner = if offset == 0 {
            base
        } else if (0..n).contains(&partner_index) {
            seq.steps[partner_index as usize].as_ref()
        } else {
            None
        };
        let combined = match partner {
            Some(p) => binary(current, p, op)?,
            None => current.map_flat(|g| Ok(g.map(|_| f32::NAN)))?,
        };
        steps.push(Some(combined));
    }
    Ok(GridField::TimeSequence(Sequence {
        name: seq.name.clone(),
        keys: seq.keys.clone(),
        steps,
    }))
}

pub fn time_step_difference(field: &GridField, offset: isize) -> Result<GridField> {
    time_step_func(field, offset, StepFunc::Difference)
}

pub fn time_step_sum(field: &GridField, offset: isize) -> Result<GridField> {
    time_step_func(field, offset, StepFunc::Sum)
}

/// Every step minus the first step
pub fn difference_from_base_time(field: &GridField) -> Result<GridField> {
    time_step_func(field, 0, StepFunc::Difference)
}

/// Every step plus the first step
pub fn sum_from_base_time(field: &GridField) -> Result<GridField> {
    time_step_func(field, 0, StepFunc::Sum)
}

/// How a running average treats windows that run past either end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOption {
    /// Wrap around to the other end of the series
    Cyclic,
    /// Positions outside the series are missing
    Missing,
    /// Reflect about the end points
    Symmetric,
}

impl FromStr for EdgeOption {
    type Err = EkmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cyclic" | "-1" => Ok(EdgeOption::Cyclic),
            "missing" | "0" => Ok(EdgeOption::Missing),
            "symmetric" | "1" => Ok(EdgeOption::Symmetric),
            other => Err(EkmanError::invalid_param(
                "edge",
                format!("unknown edge option '{}'", other),
            )),
        }
    }
}

/// Unweighted running mean over `nave` steps
pub fn time_running_average(
    field: &GridField,
    nave: usize,
    edge: EdgeOption,
    skip_missing: bool,
) -> Result<GridField> {
    running_average(field, &vec![1.0; nave], edge, skip_missing)
}

/// Weighted running mean; the window length is the number of weights
pub fn time_weighted_running_average(
    field: &GridField,
    weights: &[f32],
    edge: EdgeOption,
    skip_missing: bool,
) -> Result<GridField> {
    running_average(field, weights, edge, skip_missing)
}

/// Window of output step `n`: for odd windows centred on `n`, for even
/// windows `n - nave/2 + 1 ..= n + nave/2`. Each point is the weighted mean
/// of its present contributors; without `skip_missing` any missing
/// contributor makes the point missing.
fn running_average(
    field: &GridField,
    weights: &[f32],
    edge: EdgeOption,
    skip_missing: bool,
) -> Result<GridField> {
    let nave = weights.len();
    if nave == 0 {
        return Err(EkmanError::invalid_param("nave", "window must hold at least one step"));
    }
    let seq = match field {
        GridField::TimeSequence(seq) if nave > 1 => seq,
        other => return Ok(other.clone()),
    };
    let npts = seq.steps.len();
    if nave > npts {
        return Err(EkmanError::invalid_param(
            "nave",
            format!("window of {} steps is longer than the {} times", nave, npts),
        ));
    }
    let flats: Vec<Option<&FlatGrid>> = seq
        .steps
        .iter()
        .map(|s| match s {
            None => Ok(None),
            Some(GridField::Flat(g)) => Ok(Some(g)),
            Some(_) => Err(EkmanError::incompatible(
                "time_running_average",
                "running averages need flat grids at every time".to_string(),
            )),
        })
        .collect::<Result<_>>()?;

    let half = nave / 2;
    let even = usize::from(nave % 2 == 0);
    let time_of = |j: usize| -> Option<usize> {
        // j indexes the padded series, which has `half` extra slots each side
        if j >= half && j - half < npts {
            return Some(j - half);
        }
        match edge {
            EdgeOption::Missing => None,
            EdgeOption::Cyclic if j < half => Some(j + npts - half),
            EdgeOption::Cyclic => Some(j - half - npts),
            EdgeOption::Symmetric if j < half => Some(half - j),
            EdgeOption::Symmetric => (2 * (npts - 1) + half).checked_sub(j),
        }
    };

    let mut steps = Vec::with_capacity(npts);
    for (n, step) in flats.iter().enumerate() {
        let target = match step {
            Some(g) => *g,
            None => {
                steps.push(None);
                continue;
            }
        };
        let start = n + even;
        let mut sum = Array2::<f64>::zeros(target.values().raw_dim());
        let mut wsum = Array2::<f64>::zeros(target.values().raw_dim());
        let mut any_missing = Array2::from_elem(target.values().raw_dim(), false);
        for (w, j) in weights.iter().zip(start..start + nave) {
            let contributor = time_of(j).and_then(|t| flats.get(t).copied().flatten());
            let values = match contributor {
                Some(g) => onto(g, target)?.values().clone(),
                None => {
                    any_missing.fill(true);
                    continue;
                }
            };
            for ((s, ws), (v, miss)) in sum
                .iter_mut()
                .zip(wsum.iter_mut())
                .zip(values.iter().zip(any_missing.iter_mut()))
            {
                if v.is_finite() {
                    *s += *v as f64 * *w as f64;
                    *ws += *w as f64;
                } else {
                    *miss = true;
                }
            }
        }
        let mut out = Array2::<f32>::zeros(target.values().raw_dim());
        for (((o, s), ws), miss) in out
            .iter_mut()
            .zip(sum.iter())
            .zip(wsum.iter())
            .zip(any_missing.iter())
        {
            *o = if (*miss && !skip_missing) || *ws == 0.0 {
                f32::NAN
            } else {
                (*s / *ws) as f32
            };
        }
        steps.push(Some(GridField::Flat(target.with_values(out)?)));
    }
    Ok(GridField::TimeSequence(Sequence {
        name: seq.name.clone(),
        keys: seq.keys.clone(),
        steps,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis, SampleDomain};
    use crate::field::Param;
    use crate::units::Unit;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn series(values: &[[f32; 2]]) -> GridField {
        let d = Arc::new(
            SampleDomain::linear(vec![Axis::longitude()], vec![LinearAxis::new(0.0, 1.0, 2)])
                .unwrap(),
        );
        let times: Vec<DateTime<Utc>> = (0..values.len())
            .map(|h| Utc.with_ymd_and_hms(2024, 3, 1, h as u32, 0, 0).unwrap())
            .collect();
        let steps = values
            .iter()
            .map(|v| {
                Some(
                    FlatGrid::scalar(d.clone(), Param::new("t", Unit::Kelvin), v.to_vec())
                        .unwrap()
                        .into(),
                )
            })
            .collect();
        GridField::time_sequence(times, steps).unwrap()
    }

    fn values(f: &GridField) -> Vec<Vec<f32>> {
        f.flats().iter().map(|g| g.values().row(0).to_vec()).collect()
    }

    #[test]
    fn test_average_counts_present_values_only() {
        let f = series(&[[1.0, 2.0], [f32::NAN, 4.0], [3.0, 6.0]]);
        let avg = average_over_time(&f, false).unwrap();
        assert_eq!(values(&avg), vec![vec![2.0, 4.0]]);
        let repeated = average_over_time(&f, true).unwrap();
        assert_eq!(repeated.step_count(), 3);
    }

    #[test]
    fn test_non_sequence_is_returned() {
        let f = series(&[[1.0, 2.0]]);
        let flat = f.first_flat().unwrap().clone().into();
        assert_eq!(sum_over_time(&flat, false).unwrap(), flat);
    }

    #[test]
    fn test_time_step_difference() {
        let f = series(&[[1.0, 1.0], [3.0, 4.0], [6.0, 9.0]]);
        let d = time_step_difference(&f, -1).unwrap();
        let v = values(&d);
        assert!(v[0].iter().all(|x| x.is_nan()));
        assert_eq!(v[1], vec![2.0, 3.0]);
        assert_eq!(v[2], vec![3.0, 5.0]);
        let base = difference_from_base_time(&f).unwrap();
        assert_eq!(values(&base)[2], vec![5.0, 8.0]);
    }

    #[test]
    fn test_running_average_edges() {
        let f = series(&[[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]]);
        let missing = time_running_average(&f, 3, EdgeOption::Missing, false).unwrap();
        let v = values(&missing);
        assert!(v[0][0].is_nan());
        assert_eq!(v[1][0], 2.0);
        assert_eq!(v[2][0], 3.0);
        assert!(v[3][0].is_nan());

        let cyclic = time_running_average(&f, 3, EdgeOption::Cyclic, false).unwrap();
        assert!((values(&cyclic)[0][0] - 7.0 / 3.0).abs() < 1e-6);

        let symmetric = time_running_average(&f, 3, EdgeOption::Symmetric, false).unwrap();
        assert!((values(&symmetric)[3][0] - 10.0 / 3.0).abs() < 1e-6);

        assert!(time_running_average(&f, 5, EdgeOption::Missing, true).is_err());
    }
}
