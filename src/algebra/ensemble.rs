//! Reductions across ensemble members.

use ndarray::Array2;
use tracing::debug;

use super::reduce::Reduction;
use super::time::fold_fields;
use crate::error::{EkmanError, Result};
use crate::field::{GridField, Sequence};

/// Fold the members of every ensemble into one grid.
///
/// Time sequences are handled step by step; a field without an ensemble
/// comes back unchanged.
pub fn apply_function_over_members(field: &GridField, function: Reduction) -> Result<GridField> {
    over_members(field, &mut |members| {
        let refs: Vec<&GridField> = members.steps.iter().flatten().collect();
        fold_fields(&refs, function)
    })
}

pub fn average_over_members(field: &GridField) -> Result<GridField> {
    apply_function_over_members(field, Reduction::Average)
}

pub fn ensemble_standard_deviation(field: &GridField) -> Result<GridField> {
    apply_function_over_members(field, Reduction::StdDev)
}

pub fn ensemble_lowest(field: &GridField) -> Result<GridField> {
    apply_function_over_members(field, Reduction::Min)
}

pub fn ensemble_highest(field: &GridField) -> Result<GridField> {
    apply_function_over_members(field, Reduction::Max)
}

pub fn ensemble_range(field: &GridField) -> Result<GridField> {
    apply_function_over_members(field, Reduction::Range)
}

/// Point-wise percentile `p` (0 < p <= 100) of the present member values
pub fn ensemble_percentile(field: &GridField, p: f64) -> Result<GridField> {
    if !(p > 0.0 && p <= 100.0) {
        return Err(EkmanError::invalid_param(
            "percentile",
            format!("{} is outside (0, 100]", p),
        ));
    }
    over_members(field, &mut |members| {
        let grids: Vec<_> = members
            .steps
            .iter()
            .flatten()
            .filter_map(|m| m.as_flat())
            .collect();
        let base = match grids.first() {
            Some(g) => *g,
            None => return Ok(None),
        };
        if grids.iter().any(|g| g.values().raw_dim() != base.values().raw_dim()) {
            return Err(EkmanError::incompatible(
                "ensemble_percentile",
                "members have different shapes".to_string(),
            ));
        }
        let mut out = Array2::<f32>::zeros(base.values().raw_dim());
        let mut column = Vec::with_capacity(grids.len());
        for (idx, o) in out.indexed_iter_mut() {
            column.clear();
            column.extend(grids.iter().map(|g| g.values()[idx]).filter(|v| v.is_finite()));
            *o = percentile(&mut column, p)?;
        }
        Ok(Some(base.with_values(out)?.into()))
    })
}

/// Percentile by linear interpolation between order statistics at rank
/// `p (n + 1) / 100`, clamped to the extremes. Sorts `values` in place.
pub fn percentile(values: &mut [f32], p: f64) -> Result<f32> {
    if !(p > 0.0 && p <= 100.0) {
        return Err(EkmanError::invalid_param(
            "percentile",
            format!("{} is outside (0, 100]", p),
        ));
    }
    match values.len() {
        0 => return Ok(f32::NAN),
        1 => return Ok(values[0]),
        _ => {}
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len() as f64;
    let pos = p * (n + 1.0) / 100.0;
    if pos < 1.0 {
        return Ok(values[0]);
    }
    if pos >= n {
        return Ok(values[values.len() - 1]);
    }
    let k = pos.floor() as usize;
    let frac = (pos - pos.floor()) as f32;
    let (lower, upper) = (values[k - 1], values[k]);
    Ok(lower + frac * (upper - lower))
}

type MemberFn<'a> = dyn FnMut(&Sequence<i64>) -> Result<Option<GridField>> + 'a;

fn over_members(field: &GridField, f: &mut MemberFn<'_>) -> Result<GridField> {
    match field {
        GridField::Flat(_) => Ok(field.clone()),
        GridField::IndexSequence(members) => {
            debug!(members = members.keys.len(), "reducing ensemble");
            f(members)?.ok_or_else(|| EkmanError::DataNotFound {
                message: format!("every member of '{}' is missing", members.name),
            })
        }
        GridField::TimeSequence(seq) => {
            let mut steps = Vec::with_capacity(seq.steps.len());
            for step in &seq.steps {
                steps.push(match step {
                    Some(GridField::IndexSequence(members)) => f(members)?,
                    Some(other) => Some(over_members(other, f)?),
                    None => None,
                });
            }
            Ok(GridField::TimeSequence(Sequence {
                name: seq.name.clone(),
                keys: seq.keys.clone(),
                steps,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis, SampleDomain};
    use crate::field::{FlatGrid, Param};
    use crate::units::Unit;
    use std::sync::Arc;

    fn ensemble(members: &[[f32; 2]]) -> GridField {
        let d = Arc::new(
            SampleDomain::linear(vec![Axis::longitude()], vec![LinearAxis::new(0.0, 1.0, 2)])
                .unwrap(),
        );
        let steps = members
            .iter()
            .map(|v| {
                Some(
                    FlatGrid::scalar(d.clone(), Param::new("t", Unit::Kelvin), v.to_vec())
                        .unwrap()
                        .into(),
                )
            })
            .collect();
        GridField::index_sequence("ensemble", (0..members.len() as i64).collect(), steps).unwrap()
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&mut v, 50.0).unwrap(), 2.5);
        assert_eq!(percentile(&mut v, 10.0).unwrap(), 1.0);
        assert_eq!(percentile(&mut v, 100.0).unwrap(), 4.0);
        assert!(percentile(&mut v, 0.0).is_err());
        assert!(percentile(&mut [], 50.0).unwrap().is_nan());
    }

    #[test]
    fn test_member_reductions() {
        let f = ensemble(&[[1.0, 10.0], [3.0, f32::NAN], [5.0, 20.0]]);
        let avg = average_over_members(&f).unwrap();
        assert_eq!(avg.first_flat().unwrap().values().row(0).to_vec(), vec![3.0, 15.0]);
        let range = ensemble_range(&f).unwrap();
        assert_eq!(range.first_flat().unwrap().values().row(0).to_vec(), vec![4.0, 10.0]);
        let median = ensemble_percentile(&f, 50.0).unwrap();
        assert_eq!(median.first_flat().unwrap().values().row(0).to_vec(), vec![3.0, 15.0]);
    }

    #[test]
    fn test_field_without_members_is_unchanged() {
        let f = ensemble(&[[1.0, 2.0]]);
        let flat = f.first_flat().unwrap().clone().into();
        assert_eq!(ensemble_highest(&flat).unwrap(), flat);
    }
}
