//! Sample domains: the finite point sets grid fields are defined over.
//!
//! A domain is an ordered set of 1, 2 or 3 component coordinate tuples. Its
//! manifold dimension (the number of index axes) may be smaller than its
//! coordinate dimension, e.g. a curved 2D slice embedded in 3D space.
//! Samples are ordered with the first index varying fastest:
//! `elem = i + (j + k * ny) * nx`.
//!
//! Domains are immutable once built and shared behind `Arc`.

pub mod cache;
pub mod coord;
mod locate;
pub mod projection;
pub mod vertical;

use ndarray::Array2;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{EkmanError, Result};
use crate::units::{Quantity, Unit};

pub use coord::{CoordinateSystem, RadarGeometry, Unwrapped};
pub(crate) use locate::solve;
pub use locate::{apply_stencil, stencil, SamplingMode};
pub use projection::MapProjection;
pub use vertical::{VerticalCoordinate, VerticalTransform};

/// Physical meaning of a domain coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Latitude,
    Longitude,
    Altitude,
    Pressure,
    X,
    Y,
    /// Generic vertical index (sigma, hybrid level, model level)
    Level,
}

impl AxisKind {
    pub fn is_vertical(&self) -> bool {
        matches!(self, AxisKind::Altitude | AxisKind::Pressure | AxisKind::Level)
    }

    pub fn is_horizontal(&self) -> bool {
        !self.is_vertical()
    }
}

/// A named, unit-tagged coordinate of a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub kind: AxisKind,
    pub unit: Unit,
}

impl Axis {
    pub fn new(name: &str, kind: AxisKind, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            kind,
            unit,
        }
    }

    pub fn latitude() -> Self {
        Self::new("lat", AxisKind::Latitude, Unit::Degree)
    }

    pub fn longitude() -> Self {
        Self::new("lon", AxisKind::Longitude, Unit::Degree)
    }

    pub fn altitude() -> Self {
        Self::new("altitude", AxisKind::Altitude, Unit::Meter)
    }

    pub fn pressure() -> Self {
        Self::new("pressure", AxisKind::Pressure, Unit::Hectopascal)
    }

    pub fn x(unit: Unit) -> Self {
        Self::new("x", AxisKind::X, unit)
    }

    pub fn y(unit: Unit) -> Self {
        Self::new("y", AxisKind::Y, unit)
    }

    pub fn level(name: &str, unit: Unit) -> Self {
        Self::new(name, AxisKind::Level, unit)
    }

    /// Whether a value on `other` can be expressed on this axis
    pub fn matches(&self, other: &Axis) -> bool {
        self.kind == other.kind && self.unit.can_convert(&other.unit)
    }
}

/// Closed-form description of an evenly spaced axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearAxis {
    pub first: f64,
    pub step: f64,
    pub count: usize,
}

impl LinearAxis {
    pub fn new(first: f64, step: f64, count: usize) -> Self {
        Self { first, step, count }
    }

    /// Evenly spaced axis through `first` and `last`
    pub fn spanning(first: f64, last: f64, count: usize) -> Self {
        let step = if count > 1 {
            (last - first) / (count - 1) as f64
        } else {
            0.0
        };
        Self { first, step, count }
    }

    pub fn value(&self, i: usize) -> f64 {
        self.first + self.step * i as f64
    }

    pub fn last(&self) -> f64 {
        self.value(self.count.saturating_sub(1))
    }

    pub fn values(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.value(i)).collect()
    }
}

/// How sample coordinates are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One evenly spaced axis per coordinate; manifold equals dimension
    Linear(Vec<LinearAxis>),
    /// Explicit coordinates, shape (dimension, sample count)
    Gridded(Array2<f64>),
}

/// An ordered, finite set of coordinate tuples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDomain {
    axes: Vec<Axis>,
    lengths: Vec<usize>,
    layout: Layout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coord_system: Option<Arc<CoordinateSystem>>,
    #[serde(skip)]
    rectilinear: OnceCell<Option<Vec<Vec<f64>>>>,
}

impl SampleDomain {
    /// Build a regular domain from one linear axis per coordinate
    pub fn linear(axes: Vec<Axis>, linear: Vec<LinearAxis>) -> Result<Self> {
        let lengths = linear.iter().map(|l| l.count).collect();
        let domain = Self {
            axes,
            lengths,
            layout: Layout::Linear(linear),
            coord_system: None,
            rectilinear: OnceCell::new(),
        };
        domain.validate()?;
        Ok(domain)
    }

    /// Build a domain from explicit coordinates of shape (dimension, count)
    pub fn gridded(axes: Vec<Axis>, lengths: Vec<usize>, samples: Array2<f64>) -> Result<Self> {
        let domain = Self {
            axes,
            lengths,
            layout: Layout::Gridded(samples),
            coord_system: None,
            rectilinear: OnceCell::new(),
        };
        domain.validate()?;
        Ok(domain)
    }

    pub fn with_coord_system(self, cs: CoordinateSystem) -> Self {
        self.with_shared_coord_system(Some(Arc::new(cs)))
    }

    pub fn with_shared_coord_system(mut self, cs: Option<Arc<CoordinateSystem>>) -> Self {
        self.coord_system = cs;
        self
    }

    /// Check the structural invariants; deserialized domains must pass this before use
    pub fn validate(&self) -> Result<()> {
        let dim = self.axes.len();
        if !(1..=3).contains(&dim) {
            return Err(EkmanError::manifold(
                "domain",
                format!("coordinate dimension must be 1, 2 or 3, got {}", dim),
            ));
        }
        let manifold = self.lengths.len();
        if manifold == 0 || manifold > dim {
            return Err(EkmanError::manifold(
                "domain",
                format!("manifold dimension {} invalid for dimension {}", manifold, dim),
            ));
        }
        if self.lengths.iter().any(|&n| n == 0) {
            return Err(EkmanError::manifold("domain", "empty axis"));
        }
        match &self.layout {
            Layout::Linear(linear) => {
                if linear.len() != dim {
                    return Err(EkmanError::manifold(
                        "domain",
                        "a linear domain needs one linear axis per coordinate",
                    ));
                }
                for (i, l) in linear.iter().enumerate() {
                    if l.count > 1 && (l.step == 0.0 || !l.step.is_finite() || !l.first.is_finite())
                    {
                        return Err(EkmanError::invalid_param(
                            &self.axes[i].name,
                            format!("invalid linear axis step {}", l.step),
                        ));
                    }
                }
            }
            Layout::Gridded(samples) => {
                let expected = self.lengths.iter().product::<usize>();
                if samples.nrows() != dim || samples.ncols() != expected {
                    return Err(EkmanError::manifold(
                        "domain",
                        format!(
                            "sample array is {}x{}, expected {}x{}",
                            samples.nrows(),
                            samples.ncols(),
                            dim,
                            expected
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Coordinate dimension
    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    /// Topological dimension of the point arrangement
    pub fn manifold_dimension(&self) -> usize {
        self.lengths.len()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn len(&self) -> usize {
        self.lengths.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn coord_system(&self) -> Option<&Arc<CoordinateSystem>> {
        self.coord_system.as_ref()
    }

    pub fn is_linear(&self) -> bool {
        matches!(self.layout, Layout::Linear(_))
    }

    pub fn linear_axes(&self) -> Option<&[LinearAxis]> {
        match &self.layout {
            Layout::Linear(l) => Some(l),
            Layout::Gridded(_) => None,
        }
    }

    /// Index of the first axis of the given kind
    pub fn find_axis(&self, kind: AxisKind) -> Option<usize> {
        self.axes.iter().position(|a| a.kind == kind)
    }

    /// Index of the vertical coordinate, if any
    pub fn vertical_axis(&self) -> Option<usize> {
        self.axes.iter().position(|a| a.kind.is_vertical())
    }

    /// Number of samples in one horizontal layer
    pub fn horizontal_len(&self) -> usize {
        self.lengths.iter().take(2).product()
    }

    /// Flat sample index of a multi-index
    pub fn flat_index(&self, index: &[usize]) -> usize {
        let mut flat = 0;
        for (m, &i) in index.iter().enumerate().rev() {
            flat = flat * self.lengths[m] + i;
        }
        flat
    }

    /// Multi-index of a flat sample index
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        self.lengths
            .iter()
            .map(|&n| {
                let i = flat % n;
                flat /= n;
                i
            })
            .collect()
    }

    /// All sample coordinates, shape (dimension, count)
    pub fn samples(&self) -> Cow<'_, Array2<f64>> {
        match &self.layout {
            Layout::Gridded(s) => Cow::Borrowed(s),
            Layout::Linear(linear) => {
                let n = self.len();
                let mut out = Array2::<f64>::zeros((linear.len(), n));
                for e in 0..n {
                    let idx = self.unravel(e);
                    for (c, l) in linear.iter().enumerate() {
                        out[[c, e]] = l.value(idx[c]);
                    }
                }
                Cow::Owned(out)
            }
        }
    }

    /// Coordinates of one sample
    pub fn sample(&self, e: usize) -> Vec<f64> {
        match &self.layout {
            Layout::Gridded(s) => s.column(e).to_vec(),
            Layout::Linear(linear) => {
                let idx = self.unravel(e);
                linear.iter().zip(idx).map(|(l, i)| l.value(i)).collect()
            }
        }
    }

    /// Per-coordinate minimum and maximum, ignoring non-finite samples
    pub fn low_high(&self) -> (Vec<f64>, Vec<f64>) {
        if let Layout::Linear(linear) = &self.layout {
            return linear
                .iter()
                .map(|l| (l.first.min(l.last()), l.first.max(l.last())))
                .unzip();
        }
        let samples = self.samples();
        samples
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .filter(|v| v.is_finite())
                    .fold((f64::NAN, f64::NAN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
            })
            .unzip()
    }

    /// Swap the first two coordinates together with the first two index axes.
    ///
    /// Returns the new domain and `perm`, where `perm[new] = old` sample index.
    pub fn swap_first_axes(&self) -> Result<(SampleDomain, Vec<usize>)> {
        if self.dimension() < 2 || self.manifold_dimension() < 2 {
            return Err(EkmanError::manifold(
                "swap_axes",
                format!("need at least two axes ({})", self.describe()),
            ));
        }
        let mut axes = self.axes.clone();
        axes.swap(0, 1);
        let mut lengths = self.lengths.clone();
        lengths.swap(0, 1);
        let n = self.len();
        let (n0, n1) = (self.lengths[0], self.lengths[1]);
        let perm: Vec<usize> = (0..n)
            .map(|e_new| {
                let j = e_new % n1;
                let rest = e_new / n1;
                let i = rest % n0;
                let k = rest / n0;
                i + n0 * (j + n1 * k)
            })
            .collect();
        let layout = match &self.layout {
            Layout::Linear(linear) => {
                let mut linear = linear.clone();
                linear.swap(0, 1);
                Layout::Linear(linear)
            }
            Layout::Gridded(s) => {
                let mut out = Array2::<f64>::zeros(s.raw_dim());
                for (e_new, &e_old) in perm.iter().enumerate() {
                    for c in 0..s.nrows() {
                        let row = if c == 0 {
                            1
                        } else if c == 1 {
                            0
                        } else {
                            c
                        };
                        out[[c, e_new]] = s[[row, e_old]];
                    }
                }
                Layout::Gridded(out)
            }
        };
        let domain = SampleDomain {
            axes,
            lengths,
            layout,
            coord_system: self.coord_system.clone(),
            rectilinear: OnceCell::new(),
        };
        Ok((domain, perm))
    }

    /// Short human-readable description used in error messages and logs
    pub fn describe(&self) -> String {
        let kind = if self.is_linear() { "linear" } else { "gridded" };
        let names: Vec<&str> = self.axes.iter().map(|a| a.name.as_str()).collect();
        let lengths: Vec<String> = self.lengths.iter().map(|n| n.to_string()).collect();
        let cs = self.coord_system.as_ref().map(|c| c.name()).unwrap_or("none");
        format!(
            "{} {}D/{}D ({}) {} cs={}",
            kind,
            self.dimension(),
            self.manifold_dimension(),
            names.join(", "),
            lengths.join("x"),
            cs
        )
    }

    /// Whether a vertical value in `unit` can be compared with this domain's vertical axis
    pub fn vertical_quantity(&self) -> Option<Quantity> {
        self.vertical_axis().map(|i| self.axes[i].unit.quantity())
    }
}

fn same_bits(a: &Array2<f64>, b: &Array2<f64>) -> bool {
    a.shape() == b.shape()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
}

/// Structural equality: same axes, shape, coordinate system and sample coordinates
impl PartialEq for SampleDomain {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.axes != other.axes || self.lengths != other.lengths {
            return false;
        }
        let cs_equal = match (&self.coord_system, &other.coord_system) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        };
        if !cs_equal {
            return false;
        }
        match (&self.layout, &other.layout) {
            (Layout::Linear(a), Layout::Linear(b)) => a == b,
            _ => same_bits(&self.samples(), &other.samples()),
        }
    }
}

impl fmt::Display for SampleDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Whether two shared domains are structurally equal
pub fn domains_equal(a: &Arc<SampleDomain>, b: &Arc<SampleDomain>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}
