//! Folds over the vertical axis and along horizontal grid axes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::{domains_equal, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::resample::horizontal_domain;

/// Point-wise fold applied across grids, levels or an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Average,
    Sum,
    Min,
    Max,
    /// Population standard deviation
    StdDev,
    /// Highest minus lowest
    Range,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reduction::Average => "average",
            Reduction::Sum => "sum",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::StdDev => "standardDeviation",
            Reduction::Range => "range",
        };
        f.write_str(s)
    }
}

impl FromStr for Reduction {
    type Err = EkmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(Reduction::Average),
            "sum" => Ok(Reduction::Sum),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "stddev" | "standarddeviation" => Ok(Reduction::StdDev),
            "range" => Ok(Reduction::Range),
            other => Err(EkmanError::invalid_param(
                "function",
                format!("unknown reduction '{}'", other),
            )),
        }
    }
}

/// Running fold state for one point; missing values are skipped
#[derive(Debug, Clone, Copy)]
pub(crate) struct Accumulator {
    count: u32,
    sum: f64,
    sum_sq: f64,
    min: f32,
    max: f32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    pub(crate) fn push(&mut self, v: f32) {
        if !v.is_finite() {
            return;
        }
        let x = v as f64;
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    pub(crate) fn finish(&self, reduction: Reduction) -> f32 {
        if self.count == 0 {
            return f32::NAN;
        }
        let n = self.count as f64;
        match reduction {
            Reduction::Average => (self.sum / n) as f32,
            Reduction::Sum => self.sum as f32,
            Reduction::Min => self.min,
            Reduction::Max => self.max,
            Reduction::StdDev => {
                let mean = self.sum / n;
                (self.sum_sq / n - mean * mean).max(0.0).sqrt() as f32
            }
            Reduction::Range => self.max - self.min,
        }
    }
}

/// Fold a set of same-shaped value arrays point by point
pub(crate) fn fold_arrays<'a, I>(arrays: I, reduction: Reduction) -> Option<Array2<f32>>
where
    I: IntoIterator<Item = &'a Array2<f32>>,
{
    let mut acc: Option<Array2<Accumulator>> = None;
    for values in arrays {
        let acc = acc.get_or_insert_with(|| Array2::from_elem(values.raw_dim(), Accumulator::default()));
        for (a, v) in acc.iter_mut().zip(values.iter()) {
            a.push(*v);
        }
    }
    acc.map(|acc| acc.mapv(|a| a.finish(reduction)))
}

fn suffixed(params: &[Param], suffix: &str) -> Vec<Param> {
    params
        .iter()
        .map(|p| Param {
            name: format!("{}_{}", p.name, suffix),
            unit: p.unit.clone(),
        })
        .collect()
}

fn grid_shape(domain: &SampleDomain, operation: &str) -> Result<(usize, usize, usize)> {
    let lengths = domain.lengths();
    if lengths.len() < 2 {
        return Err(EkmanError::manifold(
            operation,
            format!("need a 2D or 3D grid ({})", domain.describe()),
        ));
    }
    let nz = if lengths.len() == 2 || domain.manifold_dimension() == 2 {
        1
    } else {
        lengths[2]
    };
    Ok((lengths[0], lengths[1], nz))
}

/// Fold every vertical column to a single value, giving a 2D grid.
///
/// Parameters are renamed `<name>_<function>`.
pub fn apply_function_over_levels(field: &GridField, function: Reduction) -> Result<GridField> {
    let mut last: Option<(Arc<SampleDomain>, Arc<SampleDomain>)> = None;
    field.map_flat(|g| {
        let (nx, ny, nz) = grid_shape(g.domain(), "apply_function_over_levels")?;
        let cached = last
            .as_ref()
            .filter(|(source, _)| domains_equal(source, g.domain()))
            .map(|(_, flat)| flat.clone());
        let domain = match cached {
            Some(flat) => flat,
            None => {
                let flat = Arc::new(horizontal_domain(g.domain())?);
                last = Some((g.domain().clone(), flat.clone()));
                flat
            }
        };
        let values = g.values();
        let layer = nx * ny;
        let mut out = Array2::<f32>::zeros((values.nrows(), layer));
        for c in 0..values.nrows() {
            for e in 0..layer {
                let mut acc = Accumulator::default();
                for k in 0..nz {
                    acc.push(values[[c, k * layer + e]]);
                }
                out[[c, e]] = acc.finish(function);
            }
        }
        FlatGrid::new(domain, suffixed(g.params(), &function.to_string()), out)
    })
}

/// Replace every present value on a level with that level's fold
pub fn apply_function_to_levels(field: &GridField, function: Reduction) -> Result<GridField> {
    field.map_flat(|g| {
        let (nx, ny, nz) = grid_shape(g.domain(), "apply_function_to_levels")?;
        let layer = nx * ny;
        let mut values = g.values().clone();
        for mut row in values.rows_mut() {
            for k in 0..nz {
                let level = row.slice_mut(ndarray::s![k * layer..(k + 1) * layer]);
                let mut acc = Accumulator::default();
                level.iter().for_each(|v| acc.push(*v));
                let result = acc.finish(function);
                for v in level.into_iter() {
                    if v.is_finite() {
                        *v = result;
                    }
                }
            }
        }
        FlatGrid::new(
            g.domain().clone(),
            suffixed(g.params(), &function.to_string()),
            values,
        )
    })
}

/// Horizontal grid axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridAxis {
    X,
    Y,
}

impl FromStr for GridAxis {
    type Err = EkmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "X" | "x" => Ok(GridAxis::X),
            "Y" | "y" => Ok(GridAxis::Y),
            other => Err(EkmanError::invalid_param("axis", format!("unknown axis '{}'", other))),
        }
    }
}

/// Replace every present value with the fold of its row (X) or column (Y)
/// on the same level.
///
/// Parameters are renamed `<name>_<axis><function>`.
pub fn apply_function_to_axis(field: &GridField, function: Reduction, axis: GridAxis) -> Result<GridField> {
    field.map_flat(|g| {
        let (nx, ny, nz) = grid_shape(g.domain(), "apply_function_to_axis")?;
        let (outer, inner) = match axis {
            GridAxis::X => (ny, nx),
            GridAxis::Y => (nx, ny),
        };
        let index = |k: usize, j: usize, i: usize| match axis {
            GridAxis::X => k * nx * ny + j * nx + i,
            GridAxis::Y => k * nx * ny + i * nx + j,
        };
        let mut values = g.values().clone();
        for c in 0..values.nrows() {
            for k in 0..nz {
                for j in 0..outer {
                    let mut acc = Accumulator::default();
                    for i in 0..inner {
                        acc.push(values[[c, index(k, j, i)]]);
                    }
                    let result = acc.finish(function);
                    for i in 0..inner {
                        let v = &mut values[[c, index(k, j, i)]];
                        if v.is_finite() {
                            *v = result;
                        }
                    }
                }
            }
        }
        let label = match axis {
            GridAxis::X => "X",
            GridAxis::Y => "Y",
        };
        FlatGrid::new(
            g.domain().clone(),
            suffixed(g.params(), &format!("{}{}", label, function)),
            values,
        )
    })
}
