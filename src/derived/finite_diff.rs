//! Finite-difference derivatives over sample domains.
//!
//! Derivatives are taken in index space (central differences inside the
//! grid, one-sided at the edges) and mapped onto the domain's coordinates
//! through the local Jacobian, so curvilinear and projected grids need no
//! special casing. Longitude differences wrap at 360 degrees.

use ndarray::{Array2, ArrayView1, ArrayView2};
use std::sync::Arc;
use tracing::debug;

use super::EarthModel;
use crate::domain::{domains_equal, solve, AxisKind, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::resample::horizontal_domain;
use crate::resolver::{get_lat_lon, is_slice};
use crate::units::{Quantity, Unit};

/// Partial derivative of every parameter along domain axis `axis`.
///
/// Latitude and longitude axes are measured in metres using the Earth
/// model's length of a degree, with the longitudinal metric shrinking by
/// the (pole-guarded) cosine of latitude. Length axes are converted to
/// metres and pressure axes to pascals. 2D slices of 3D domains are
/// differentiated on their horizontal grid and keep their original domain.
pub fn partial(field: &GridField, axis: usize, earth: &EarthModel) -> Result<GridField> {
    let mut last: Option<(Arc<SampleDomain>, Arc<Metric>)> = None;
    field.map_flat(|g| {
        let cached = last
            .as_ref()
            .filter(|(source, _)| domains_equal(source, g.domain()))
            .map(|(_, metric)| metric.clone());
        let metric = match cached {
            Some(metric) => metric,
            None => {
                let metric = Arc::new(Metric::along(g.domain(), axis, earth)?);
                last = Some((g.domain().clone(), metric.clone()));
                metric
            }
        };
        metric.differentiate(g)
    })
}

/// Derivative along the first (x) axis
pub fn ddx(field: &GridField, earth: &EarthModel) -> Result<GridField> {
    partial(field, 0, earth)
}

/// Derivative along the second (y) axis
pub fn ddy(field: &GridField, earth: &EarthModel) -> Result<GridField> {
    partial(field, 1, earth)
}

/// Everything needed to differentiate grids over one domain along one axis
struct Metric {
    work: Arc<SampleDomain>,
    coords: Array2<f64>,
    periods: Vec<Option<f64>>,
    axis: usize,
    /// Native axis units per metre (or pascal) at every sample
    scale: Vec<f64>,
    denom: Unit,
}

impl Metric {
    fn along(domain: &Arc<SampleDomain>, axis: usize, earth: &EarthModel) -> Result<Self> {
        let work = if is_slice(domain) {
            Arc::new(horizontal_domain(domain)?)
        } else {
            domain.clone()
        };
        if axis >= work.dimension() {
            return Err(EkmanError::invalid_param(
                "axis",
                format!("no axis {} in {}", axis, work.describe()),
            ));
        }
        let coords = work.samples().into_owned();
        let periods = longitude_periods(&work);
        let n = work.len();
        let a = &work.axes()[axis];
        let (scale, denom) = match a.kind {
            AxisKind::Latitude | AxisKind::Longitude => {
                let per_unit = unit_span(&a.unit, &Unit::Degree)? * earth.metres_per_degree();
                let scale = match (a.kind, work.find_axis(AxisKind::Latitude)) {
                    (AxisKind::Longitude, Some(lat)) => {
                        let lat_unit = &work.axes()[lat].unit;
                        coords
                            .row(lat)
                            .iter()
                            .map(|v| Ok(per_unit * earth.cos_latitude(lat_unit.convert(*v, &Unit::Degree)?)))
                            .collect::<Result<Vec<_>>>()?
                    }
                    _ => vec![per_unit; n],
                };
                (scale, Unit::Meter)
            }
            _ => match a.unit.quantity() {
                Quantity::Length => (vec![unit_span(&a.unit, &Unit::Meter)?; n], Unit::Meter),
                Quantity::Pressure => (vec![unit_span(&a.unit, &Unit::Pascal)?; n], Unit::Pascal),
                _ => (vec![1.0; n], a.unit.clone()),
            },
        };
        debug!(axis = %a.name, domain = %work.describe(), "built finite-difference metric");
        Ok(Self {
            work,
            coords,
            periods,
            axis,
            scale,
            denom,
        })
    }

    fn differentiate(&self, g: &FlatGrid) -> Result<FlatGrid> {
        let values = g.values();
        if values.ncols() != self.work.len() {
            return Err(EkmanError::incompatible(
                "partial",
                format!("{} values over {}", values.ncols(), self.work.describe()),
            ));
        }
        let axis_name = &self.work.axes()[self.axis].name;
        let mut out = Array2::<f32>::from_elem(values.raw_dim(), f32::NAN);
        let mut params = Vec::with_capacity(g.params().len());
        for (c, p) in g.params().iter().enumerate() {
            let (column, unit) = differentiable(values.row(c), &p.unit)?;
            let grad = coordinate_gradient(
                self.coords.view(),
                &self.periods,
                self.work.lengths(),
                &column,
            );
            for (e, scale) in self.scale.iter().enumerate() {
                let v = grad[[self.axis, e]] / scale;
                out[[c, e]] = if v.is_finite() { v as f32 } else { f32::NAN };
            }
            params.push(Param {
                name: format!("d{}_d{}", p.name, axis_name),
                unit: unit.per(&self.denom),
            });
        }
        FlatGrid::new(g.domain().clone(), params, out)
    }
}

/// Values as f64, with speeds brought to m/s so their derivatives are in s⁻¹
fn differentiable(row: ArrayView1<f32>, unit: &Unit) -> Result<(Vec<f64>, Unit)> {
    let mut column: Vec<f64> = row.iter().map(|v| *v as f64).collect();
    if unit.quantity() == Quantity::Speed {
        unit.convert_slice(&mut column, &Unit::MeterPerSecond)?;
        return Ok((column, Unit::MeterPerSecond));
    }
    Ok((column, unit.clone()))
}

/// How many `to` units one `from` unit spans
fn unit_span(from: &Unit, to: &Unit) -> Result<f64> {
    Ok(from.convert(1.0, to)? - from.convert(0.0, to)?)
}

fn longitude_periods(domain: &SampleDomain) -> Vec<Option<f64>> {
    domain
        .axes()
        .iter()
        .map(|a| match a.kind {
            AxisKind::Longitude => unit_span(&a.unit, &Unit::Degree).ok().map(|deg| 360.0 / deg),
            _ => None,
        })
        .collect()
}

/// Lower and upper neighbour of sample `e` along every index axis.
///
/// Axes of length one have no neighbours.
fn neighbours(lengths: &[usize], e: usize) -> Vec<Option<(usize, usize)>> {
    let mut out = Vec::with_capacity(lengths.len());
    let mut stride = 1;
    let mut rest = e;
    for &n in lengths {
        let i = rest % n;
        rest /= n;
        out.push(if n < 2 {
            None
        } else {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            Some((e - (i - lo) * stride, e + (hi - i) * stride))
        });
        stride *= n;
    }
    out
}

fn difference(coords: ArrayView1<f64>, lo: usize, hi: usize, period: Option<f64>) -> f64 {
    let d = coords[hi] - coords[lo];
    match period {
        Some(p) => d - p * (d / p).round(),
        None => d,
    }
}

/// Gradient of `values` with respect to every coordinate row of `coords`.
///
/// Index-space differences form the Jacobian rows; index axes along which
/// no coordinate changes are ignored. The minimum-norm solution of the
/// chain rule is taken, which is exact whenever the remaining Jacobian is
/// square. Points touching a missing value come out NaN.
pub(crate) fn coordinate_gradient(
    coords: ArrayView2<f64>,
    periods: &[Option<f64>],
    lengths: &[usize],
    values: &[f64],
) -> Array2<f64> {
    let (dims, n) = coords.dim();
    let mut out = Array2::<f64>::from_elem((dims, n), f64::NAN);
    let mut jac: Vec<Vec<f64>> = Vec::with_capacity(lengths.len());
    let mut df: Vec<f64> = Vec::with_capacity(lengths.len());
    'points: for e in 0..n {
        jac.clear();
        df.clear();
        for (lo, hi) in neighbours(lengths, e).into_iter().flatten() {
            let row: Vec<f64> = (0..dims)
                .map(|d| difference(coords.row(d), lo, hi, periods.get(d).copied().flatten()))
                .collect();
            if row.iter().all(|v| *v == 0.0) {
                continue;
            }
            let dv = values[hi] - values[lo];
            if !dv.is_finite() || row.iter().any(|v| !v.is_finite()) {
                continue 'points;
            }
            jac.push(row);
            df.push(dv);
        }
        if jac.is_empty() {
            continue;
        }
        let normal: Vec<Vec<f64>> = jac
            .iter()
            .map(|a| jac.iter().map(|b| a.iter().zip(b).map(|(x, y)| x * y).sum()).collect())
            .collect();
        if let Some(y) = solve(&normal, &df) {
            for d in 0..dims {
                out[[d, e]] = jac.iter().zip(&y).map(|(row, yi)| row[d] * yi).sum();
            }
        }
    }
    out
}

/// Latitude/longitude geometry of a domain for derivatives on the sphere
pub(crate) struct Spherical {
    work_len: usize,
    lengths: Vec<usize>,
    /// Latitude and longitude rows, radians
    coords: Array2<f64>,
}

impl Spherical {
    pub(crate) fn new(domain: &Arc<SampleDomain>) -> Result<Self> {
        let work = if is_slice(domain) {
            Arc::new(horizontal_domain(domain)?)
        } else {
            domain.clone()
        };
        let (lats, lons) = get_lat_lon(&work)?;
        let n = lats.len();
        let mut coords = Array2::<f64>::zeros((2, n));
        for e in 0..n {
            coords[[0, e]] = lats[e].to_radians();
            coords[[1, e]] = lons[e].to_radians();
        }
        Ok(Self {
            work_len: work.len(),
            lengths: work.lengths().to_vec(),
            coords,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.work_len
    }

    pub(crate) fn latitude(&self, e: usize) -> f64 {
        self.coords[[0, e]]
    }

    /// Rows: derivative per radian of latitude, then of longitude
    pub(crate) fn gradient(&self, values: &[f64]) -> Array2<f64> {
        let periods = [None, Some(std::f64::consts::TAU)];
        coordinate_gradient(self.coords.view(), &periods, &self.lengths, values)
    }

    /// Angle (radians, counterclockwise from east) of the grid's first index axis
    pub(crate) fn x_axis_angle(&self) -> Vec<f64> {
        (0..self.work_len)
            .map(|e| match neighbours(&self.lengths, e).first().copied().flatten() {
                Some((lo, hi)) => {
                    let dlat = self.coords[[0, hi]] - self.coords[[0, lo]];
                    let dlon = difference(self.coords.row(1), lo, hi, Some(std::f64::consts::TAU));
                    dlat.atan2(dlon * self.latitude(e).cos())
                }
                None => 0.0,
            })
            .collect()
    }
}
