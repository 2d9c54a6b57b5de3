//! Point-wise arithmetic between two fields.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{domains_equal, SampleDomain, SamplingMode};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::resample::{make_2d_grid_from_slice, resample_flat};
use crate::resolver::{can_swap_lat_lon, is_3d, is_lat_lon_order, is_volume, swap_lat_lon};
use crate::units::{Quantity, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Atan2,
}

impl BinaryOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Atan2 => a.atan2(b),
        }
    }

    fn result_unit(self, a: &Unit, b: &Unit) -> Unit {
        match self {
            BinaryOp::Add | BinaryOp::Subtract => a.clone(),
            BinaryOp::Atan2 => Unit::Radian,
            BinaryOp::Multiply | BinaryOp::Divide => match (a, b) {
                (_, Unit::Dimensionless) => a.clone(),
                (Unit::Dimensionless, _) if self == BinaryOp::Multiply => b.clone(),
                _ if self == BinaryOp::Divide && a.can_convert(b) => Unit::Dimensionless,
                _ => {
                    let sym = if self == BinaryOp::Multiply { "*" } else { "/" };
                    Unit::Other(format!("{}{}{}", a, sym, b))
                }
            },
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Atan2 => "atan2",
        };
        f.write_str(s)
    }
}

impl FromStr for BinaryOp {
    type Err = EkmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "+" => Ok(BinaryOp::Add),
            "subtract" | "sub" | "-" => Ok(BinaryOp::Subtract),
            "multiply" | "mul" | "*" => Ok(BinaryOp::Multiply),
            "divide" | "div" | "/" => Ok(BinaryOp::Divide),
            "atan2" => Ok(BinaryOp::Atan2),
            other => Err(EkmanError::invalid_param(
                "op",
                format!("unknown binary operation '{}'", other),
            )),
        }
    }
}

pub fn add(a: &GridField, b: &GridField) -> Result<GridField> {
    binary(a, b, BinaryOp::Add)
}

pub fn subtract(a: &GridField, b: &GridField) -> Result<GridField> {
    binary(a, b, BinaryOp::Subtract)
}

pub fn multiply(a: &GridField, b: &GridField) -> Result<GridField> {
    binary(a, b, BinaryOp::Multiply)
}

pub fn divide(a: &GridField, b: &GridField) -> Result<GridField> {
    binary(a, b, BinaryOp::Divide)
}

pub fn atan2(a: &GridField, b: &GridField) -> Result<GridField> {
    binary(a, b, BinaryOp::Atan2)
}

/// Combine two fields point by point.
///
/// 2D slices of 3D domains are collapsed to true 2D grids when the other
/// operand is not a volume. Operands with differing lat/lon order are brought
/// into agreement by swapping whichever one allows it. The second operand is
/// then taken onto the first's domain: nearest neighbour when the domains are
/// structurally equal, weighted average otherwise. Time steps pair by time.
pub fn binary(a: &GridField, b: &GridField, op: BinaryOp) -> Result<GridField> {
    let (mut a, mut b) = (a.clone(), b.clone());
    let (da, db) = match (a.spatial_domain(), b.spatial_domain()) {
        (Some(x), Some(y)) => (x.clone(), y.clone()),
        _ => return Ok(a),
    };

    let slice_a = is_3d(&da) && !is_volume(&da);
    let slice_b = is_3d(&db) && !is_volume(&db);
    if slice_a && slice_b {
        if !domains_equal(&da, &db) {
            a = make_2d_grid_from_slice(&a)?;
            b = make_2d_grid_from_slice(&b)?;
        }
    } else if slice_a && !is_3d(&db) {
        a = make_2d_grid_from_slice(&a)?;
    } else if !is_3d(&da) && slice_b {
        b = make_2d_grid_from_slice(&b)?;
    }

    if let (Some(da), Some(db)) = (a.spatial_domain(), b.spatial_domain()) {
        if is_lat_lon_order(da) != is_lat_lon_order(db) {
            if can_swap_lat_lon(da) {
                a = swap_lat_lon(&a)?;
            } else if can_swap_lat_lon(db) {
                b = swap_lat_lon(&b)?;
            } else {
                return Err(EkmanError::incompatible(
                    &op.to_string(),
                    format!(
                        "lat/lon order differs and neither {} nor {} can be swapped",
                        da.describe(),
                        db.describe()
                    ),
                ));
            }
        }
    }

    a.zip_flat(&b, |x, y| combine(x, y, op))
}

fn combine(a: &FlatGrid, b: &FlatGrid, op: BinaryOp) -> Result<FlatGrid> {
    let b = if domains_equal(a.domain(), b.domain()) {
        b.clone()
    } else {
        debug!(
            op = %op,
            from = %b.domain().describe(),
            to = %a.domain().describe(),
            "resampling second operand"
        );
        resample_flat(b, a.domain(), SamplingMode::WeightedAverage)?
    };
    let b = if domains_equal(a.domain(), b.domain()) {
        b
    } else {
        // a single-point operand keeps its own domain; bind it by position
        bind_by_position(&b, a.domain())?
    };

    let (na, nb) = (a.params().len(), b.params().len());
    if nb != 1 && nb != na {
        return Err(EkmanError::incompatible(
            &op.to_string(),
            format!("{} components against {}", na, nb),
        ));
    }

    let mut out = Array2::<f32>::zeros(a.values().raw_dim());
    let mut params = Vec::with_capacity(na);
    for c in 0..na {
        let pa = &a.params()[c];
        let pb = &b.params()[if nb == 1 { 0 } else { c }];
        let (scale, offset) = operand_conversion(op, &pb.unit, &pa.unit)?;
        let row_b = b.component(if nb == 1 { 0 } else { c });
        for (e, (x, y)) in a.component(c).iter().zip(row_b.iter()).enumerate() {
            out[[c, e]] = op.apply(*x, *y * scale + offset);
        }
        params.push(Param {
            name: pa.name.clone(),
            unit: op.result_unit(&pa.unit, &pb.unit),
        });
    }
    FlatGrid::new(a.domain().clone(), params, out)
}

/// Linear conversion of the second operand's values into the first's unit
/// for sums and differences
fn operand_conversion(op: BinaryOp, from: &Unit, to: &Unit) -> Result<(f32, f32)> {
    if !matches!(op, BinaryOp::Add | BinaryOp::Subtract) || from == to {
        return Ok((1.0, 0.0));
    }
    if from.quantity() == Quantity::Unknown || to.quantity() == Quantity::Unknown {
        return Ok((1.0, 0.0));
    }
    let offset = from.convert(0.0, to)?;
    let scale = from.convert(1.0, to)? - offset;
    Ok((scale as f32, offset as f32))
}

/// Broadcast a grid whose sample count matches or is one onto `domain`
fn bind_by_position(grid: &FlatGrid, domain: &Arc<SampleDomain>) -> Result<FlatGrid> {
    let n = domain.len();
    let values = grid.values();
    if values.ncols() == n {
        return grid.with_domain(domain.clone());
    }
    if values.ncols() == 1 {
        let mut out = Array2::<f32>::zeros((values.nrows(), n));
        for c in 0..values.nrows() {
            out.row_mut(c).fill(values[[c, 0]]);
        }
        return FlatGrid::new(domain.clone(), grid.params().to_vec(), out);
    }
    Err(EkmanError::incompatible(
        "binary",
        format!(
            "cannot bind {} samples onto {}",
            values.ncols(),
            domain.describe()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis};

    fn grid(first: f64, step: f64, n: usize, f: impl Fn(f64) -> f32) -> GridField {
        let d = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude()],
                vec![LinearAxis::new(first, step, n), LinearAxis::new(0.0, 1.0, 2)],
            )
            .unwrap(),
        );
        let values = (0..d.len()).map(|e| f(d.sample(e)[0])).collect();
        FlatGrid::scalar(d, Param::new("t", Unit::Kelvin), values)
            .unwrap()
            .into()
    }

    #[test]
    fn test_add_on_equal_domains() {
        let a = grid(0.0, 1.0, 4, |x| x as f32);
        let b = grid(0.0, 1.0, 4, |_| 1.0);
        let sum = add(&a, &b).unwrap();
        let values: Vec<f32> = sum.first_flat().unwrap().values().row(0).to_vec();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_subtract_resamples_second_operand() {
        let a = grid(0.0, 1.0, 4, |x| x as f32);
        let b = grid(0.5, 1.0, 4, |x| x as f32);
        let diff = subtract(&a, &b).unwrap();
        let g = diff.first_flat().unwrap();
        assert_eq!(g.domain(), a.spatial_domain().unwrap());
        // b is linear, so resampled b equals x wherever it is defined
        assert!(g.values()[[0, 0]].is_nan());
        assert!(g.values()[[0, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_celsius_operand_is_converted() {
        let a = grid(0.0, 1.0, 2, |_| 300.0);
        let b = grid(0.0, 1.0, 2, |_| 10.0)
            .map_flat(|g| Ok(g.with_unit(Unit::Celsius)))
            .unwrap();
        let diff = subtract(&a, &b).unwrap();
        let v = diff.first_flat().unwrap().values()[[0, 0]];
        assert!((v - (300.0 - 283.15)).abs() < 1e-3);
    }

    #[test]
    fn test_op_parsing() {
        assert_eq!("atan2".parse::<BinaryOp>().unwrap(), BinaryOp::Atan2);
        assert!("pow".parse::<BinaryOp>().is_err());
    }
}
