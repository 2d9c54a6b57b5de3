//! Differences and averages between two vertical levels of a volume.

use crate::algebra::{add, subtract};
use crate::domain::SamplingMode;
use crate::error::Result;
use crate::field::GridField;
use crate::resample::{make_2d_grid_from_slice, slice_at_level};
use crate::units::Unit;

/// Value at `level1` minus value at `level2`, as a 2D grid.
///
/// Parameters are renamed `<name>_LDF_<level1>-<level2>`, levels truncated
/// to integers.
pub fn layer_difference(field: &GridField, level1: f64, level2: f64, unit: &Unit) -> Result<GridField> {
    let upper = level_grid(field, level1, unit)?;
    let lower = level_grid(field, level2, unit)?;
    let diff = subtract(&upper, &lower)?;
    relabel(field, &diff, &format!("LDF_{}-{}", level_label(level1), level_label(level2)))
}

/// Mean of the values at two levels, as a 2D grid.
///
/// Parameters are renamed `<name>_LAV_<level1>-<level2>`.
pub fn layer_average(field: &GridField, level1: f64, level2: f64, unit: &Unit) -> Result<GridField> {
    let upper = level_grid(field, level1, unit)?;
    let lower = level_grid(field, level2, unit)?;
    let mean = add(&upper, &lower)?.map_flat(|g| Ok(g.map(|v| 0.5 * v)))?;
    relabel(field, &mean, &format!("LAV_{}-{}", level_label(level1), level_label(level2)))
}

/// 500 hPa minus 1000 hPa layer difference of a (height) volume
pub fn thickness(field: &GridField) -> Result<GridField> {
    layer_difference(field, 500.0, 1000.0, &Unit::Hectopascal)
}

fn level_grid(field: &GridField, level: f64, unit: &Unit) -> Result<GridField> {
    let slice = slice_at_level(field, level, unit, SamplingMode::WeightedAverage)?;
    make_2d_grid_from_slice(&slice)
}

/// Level as it appears in a parameter name, truncated toward zero
fn level_label(level: f64) -> i64 {
    level as i64
}

fn relabel(source: &GridField, result: &GridField, suffix: &str) -> Result<GridField> {
    let name = match source.params().and_then(|p| p.first()) {
        Some(p) => format!("{}_{}", p.name, suffix),
        None => return Ok(result.clone()),
    };
    result.renamed(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis, SampleDomain};
    use crate::field::{FlatGrid, Param};
    use std::sync::Arc;

    fn heights() -> GridField {
        let d = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
                vec![
                    LinearAxis::new(0.0, 1.0, 3),
                    LinearAxis::new(0.0, 1.0, 2),
                    LinearAxis::new(1000.0, -250.0, 3),
                ],
            )
            .unwrap(),
        );
        let values = (0..d.len())
            .map(|e| {
                let s = d.sample(e);
                (8.0 * (1000.0 - s[2]) + s[0]) as f32
            })
            .collect();
        FlatGrid::scalar(d, Param::new("z", Unit::GeopotentialMeter), values)
            .unwrap()
            .into()
    }

    #[test]
    fn test_thickness_and_its_name() {
        let t = thickness(&heights()).unwrap();
        let g = t.first_flat().unwrap();
        assert_eq!(g.param().name, "z_LDF_500-1000");
        assert_eq!(g.domain().dimension(), 2);
        for v in g.values().iter() {
            assert!((*v - 4000.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layer_difference_is_antisymmetric() {
        let f = heights();
        let ab = layer_difference(&f, 750.0, 500.0, &Unit::Hectopascal).unwrap();
        let ba = layer_difference(&f, 500.0, 750.0, &Unit::Hectopascal).unwrap();
        let (ab, ba) = (ab.first_flat().unwrap(), ba.first_flat().unwrap());
        for (x, y) in ab.values().iter().zip(ba.values().iter()) {
            assert_eq!(*x, -*y);
        }
    }

    #[test]
    fn test_layer_average() {
        let avg = layer_average(&heights(), 1000.0, 500.0, &Unit::Hectopascal).unwrap();
        let g = avg.first_flat().unwrap();
        assert_eq!(g.param().name, "z_LAV_1000-500");
        assert!((g.values()[[0, 0]] - 2000.0).abs() < 1e-3);
        assert!((g.values()[[0, 1]] - 2001.0).abs() < 1e-3);
    }

    #[test]
    fn test_fractional_levels_are_truncated_in_names() {
        let f = heights();
        let diff = layer_difference(&f, 850.5, 500.0, &Unit::Hectopascal).unwrap();
        assert_eq!(diff.first_flat().unwrap().param().name, "z_LDF_850-500");
        let avg = layer_average(&f, 999.9, 750.25, &Unit::Hectopascal).unwrap();
        assert_eq!(avg.first_flat().unwrap().param().name, "z_LAV_999-750");
    }
}
