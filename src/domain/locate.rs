//! Point location inside a domain and interpolation stencils.
//!
//! Locating a point yields fractional index positions along each manifold
//! axis. A stencil turns fractional indices into (sample, weight) pairs for
//! one of the two sampling policies.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{Layout, SampleDomain};
use crate::error::EkmanError;

/// Slack allowed on domain edges for weighted-average sampling, in index units
const EDGE_TOLERANCE: f64 = 1e-5;
const NEWTON_ITERATIONS: usize = 12;

/// Interpolation policy used when resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Pick the closest original sample
    NearestNeighbor,
    /// Blend the corners of the enclosing cell, skipping missing corners
    WeightedAverage,
}

impl FromStr for SamplingMode {
    type Err = EkmanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" | "nearest_neighbor" | "nn" => Ok(SamplingMode::NearestNeighbor),
            "weighted" | "weighted_average" | "wa" | "linear" => Ok(SamplingMode::WeightedAverage),
            _ => Err(EkmanError::invalid_param(
                "sampling_mode",
                format!("Unknown sampling mode: {}", s),
            )),
        }
    }
}

/// Fill `out` with (flat sample index, weight) pairs for one point.
///
/// Returns false when the point falls outside the domain.
pub fn stencil(
    lengths: &[usize],
    frac: &[f64],
    mode: SamplingMode,
    out: &mut Vec<(usize, f64)>,
) -> bool {
    out.clear();
    if frac.iter().any(|f| !f.is_finite()) {
        return false;
    }
    match mode {
        SamplingMode::NearestNeighbor => {
            let mut flat = 0;
            for m in (0..lengths.len()).rev() {
                let n = lengths[m];
                let f = frac[m];
                if f < -0.5 || f > n as f64 - 0.5 {
                    return false;
                }
                let i = (f.round().max(0.0) as usize).min(n - 1);
                flat = flat * n + i;
            }
            out.push((flat, 1.0));
            true
        }
        SamplingMode::WeightedAverage => {
            // per-axis (base index, upper weight)
            let mut cells = Vec::with_capacity(lengths.len());
            for (m, &n) in lengths.iter().enumerate() {
                let f = frac[m];
                if n == 1 {
                    if f.abs() > 0.5 {
                        return false;
                    }
                    cells.push((0usize, 0.0));
                    continue;
                }
                if f < -EDGE_TOLERANCE || f > (n - 1) as f64 + EDGE_TOLERANCE {
                    return false;
                }
                let f = f.clamp(0.0, (n - 1) as f64);
                let base = (f.floor() as usize).min(n - 2);
                cells.push((base, f - base as f64));
            }
            let corners = 1usize << lengths.len();
            for corner in 0..corners {
                let mut weight = 1.0;
                let mut flat = 0;
                for m in (0..lengths.len()).rev() {
                    let (base, t) = cells[m];
                    let upper = corner & (1 << m) != 0;
                    if upper && lengths[m] == 1 {
                        weight = 0.0;
                        break;
                    }
                    weight *= if upper { t } else { 1.0 - t };
                    flat = flat * lengths[m] + base + usize::from(upper);
                }
                if weight > 0.0 {
                    out.push((flat, weight));
                }
            }
            if out.is_empty() {
                // exactly on a sample with every other weight zero
                let flat = cells
                    .iter()
                    .enumerate()
                    .rev()
                    .fold(0, |acc, (m, &(base, _))| acc * lengths[m] + base);
                out.push((flat, 1.0));
            }
            true
        }
    }
}

/// Blend `values` (one row per component) with a stencil, skipping NaN contributors
pub fn apply_stencil(values: &[f32], st: &[(usize, f64)]) -> f32 {
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for &(e, w) in st {
        let v = values[e];
        if v.is_finite() {
            sum += w * v as f64;
            wsum += w;
        }
    }
    if wsum > 0.0 {
        (sum / wsum) as f32
    } else {
        f32::NAN
    }
}

impl SampleDomain {
    /// Fractional indices of every point, shape (manifold, points); NaN where unlocatable.
    ///
    /// `points` has one row per coordinate of this domain, in its native units.
    pub fn fractional_indices(&self, points: ArrayView2<f64>) -> Array2<f64> {
        let m = self.manifold_dimension();
        let npts = points.ncols();
        let mut out = Array2::<f64>::from_elem((m, npts), f64::NAN);
        if points.nrows() != self.dimension() {
            return out;
        }
        match &self.layout {
            Layout::Linear(linear) => {
                for p in 0..npts {
                    for (c, l) in linear.iter().enumerate() {
                        let v = points[[c, p]];
                        out[[c, p]] = if !v.is_finite() {
                            f64::NAN
                        } else if l.count == 1 {
                            if l.step == 0.0 || (v - l.first).abs() <= l.step.abs() / 2.0 {
                                0.0
                            } else {
                                f64::NAN
                            }
                        } else {
                            (v - l.first) / l.step
                        };
                    }
                }
            }
            Layout::Gridded(samples) => {
                if let Some(axes) = self.rectilinear_axes() {
                    for p in 0..npts {
                        for (c, coords) in axes.iter().enumerate() {
                            out[[c, p]] = locate_monotonic(coords, points[[c, p]]);
                        }
                    }
                } else {
                    let mut locator = Curvilinear::new(self, samples);
                    let mut point = vec![0.0; self.dimension()];
                    for p in 0..npts {
                        for (c, v) in point.iter_mut().enumerate() {
                            *v = points[[c, p]];
                        }
                        if let Some(frac) = locator.locate(&point) {
                            for (k, f) in frac.into_iter().enumerate() {
                                out[[k, p]] = f;
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Per-axis coordinate vectors when each coordinate depends on its own index
    /// axis only and is strictly monotonic
    fn rectilinear_axes(&self) -> Option<&Vec<Vec<f64>>> {
        self.rectilinear
            .get_or_init(|| {
                let samples = match &self.layout {
                    Layout::Gridded(s) => s,
                    Layout::Linear(_) => return None,
                };
                if self.manifold_dimension() != self.dimension() {
                    return None;
                }
                let mut axes = Vec::with_capacity(self.dimension());
                for c in 0..self.dimension() {
                    let n = self.lengths[c];
                    let stride: usize = self.lengths[..c].iter().product();
                    let coords: Vec<f64> = (0..n).map(|i| samples[[c, i * stride]]).collect();
                    if !strictly_monotonic(&coords) {
                        return None;
                    }
                    for e in 0..self.len() {
                        let i = (e / stride) % n;
                        if samples[[c, e]] != coords[i] {
                            return None;
                        }
                    }
                    axes.push(coords);
                }
                Some(axes)
            })
            .as_ref()
    }
}

fn strictly_monotonic(v: &[f64]) -> bool {
    if v.iter().any(|x| !x.is_finite()) {
        return false;
    }
    if v.len() < 2 {
        return true;
    }
    let up = v.windows(2).all(|w| w[1] > w[0]);
    let down = v.windows(2).all(|w| w[1] < w[0]);
    up || down
}

/// Fractional position of `x` in a strictly monotonic coordinate vector,
/// extrapolated with the edge spacing beyond either end
fn locate_monotonic(coords: &[f64], x: f64) -> f64 {
    let n = coords.len();
    if !x.is_finite() {
        return f64::NAN;
    }
    if n == 1 {
        return 0.0;
    }
    let sign = if coords[n - 1] > coords[0] { 1.0 } else { -1.0 };
    let at = |i: usize| coords[i] * sign;
    let x = x * sign;
    if x <= at(0) {
        return (x - at(0)) / (at(1) - at(0));
    }
    if x >= at(n - 1) {
        return (n - 1) as f64 + (x - at(n - 1)) / (at(n - 1) - at(n - 2));
    }
    let (mut lo, mut hi) = (0, n - 1);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if at(mid) <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo as f64 + (x - at(lo)) / (at(hi) - at(lo))
}

/// Locator for curvilinear point sets: nearest-sample walk, then Newton
/// inversion of the multilinear cell map
struct Curvilinear<'a> {
    domain: &'a SampleDomain,
    samples: &'a Array2<f64>,
    /// Coordinate rows used for location
    rows: Vec<usize>,
    /// Index axes with more than one sample
    active: Vec<usize>,
    /// 1 / range of each used row, so units do not dominate distances
    scale: Vec<f64>,
    hint: Option<usize>,
}

impl<'a> Curvilinear<'a> {
    fn new(domain: &'a SampleDomain, samples: &'a Array2<f64>) -> Self {
        let (lo, hi) = domain.low_high();
        let active: Vec<usize> = (0..domain.manifold_dimension())
            .filter(|&m| domain.lengths[m] > 1)
            .collect();
        let varying: Vec<usize> = (0..domain.dimension())
            .filter(|&c| hi[c] - lo[c] > 0.0)
            .collect();
        let rows: Vec<usize> = varying.into_iter().take(active.len()).collect();
        let scale = rows
            .iter()
            .map(|&c| {
                let r = hi[c] - lo[c];
                if r > 0.0 {
                    1.0 / r
                } else {
                    1.0
                }
            })
            .collect();
        Self {
            domain,
            samples,
            rows,
            active,
            scale,
            hint: None,
        }
    }

    fn distance(&self, e: usize, point: &[f64]) -> f64 {
        self.rows
            .iter()
            .zip(&self.scale)
            .map(|(&c, &s)| {
                let d = (self.samples[[c, e]] - point[c]) * s;
                d * d
            })
            .sum::<f64>()
    }

    fn nearest_brute(&self, point: &[f64]) -> Option<usize> {
        let mut best = None;
        let mut best_d = f64::INFINITY;
        for e in 0..self.domain.len() {
            let d = self.distance(e, point);
            if d < best_d {
                best_d = d;
                best = Some(e);
            }
        }
        best
    }

    /// Greedy descent over index-space neighbours
    fn walk(&self, start: usize, point: &[f64]) -> usize {
        let mut current = start;
        let mut current_d = self.distance(current, point);
        loop {
            let idx = self.domain.unravel(current);
            let mut best = current;
            let mut best_d = current_d;
            for &m in &self.active {
                for delta in [-1isize, 1] {
                    let i = idx[m] as isize + delta;
                    if i < 0 || i as usize >= self.domain.lengths[m] {
                        continue;
                    }
                    let mut n = idx.clone();
                    n[m] = i as usize;
                    let e = self.domain.flat_index(&n);
                    let d = self.distance(e, point);
                    if d < best_d {
                        best_d = d;
                        best = e;
                    }
                }
            }
            if best == current {
                return current;
            }
            current = best;
            current_d = best_d;
        }
    }

    fn locate(&mut self, point: &[f64]) -> Option<Vec<f64>> {
        if point.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let m = self.domain.manifold_dimension();
        if self.active.is_empty() || self.rows.is_empty() {
            return Some(vec![0.0; m]);
        }
        let start = match self.hint {
            Some(h) => self.walk(h, point),
            None => self.walk(self.nearest_brute(point)?, point),
        };
        if let Some(found) = self.refine(start, point) {
            self.hint = Some(start);
            return Some(found);
        }
        // the walk can stall in a local minimum; retry from the global nearest
        let nearest = self.nearest_brute(point)?;
        let result = self.refine(nearest, point);
        if result.is_some() {
            self.hint = Some(nearest);
        }
        result
    }

    /// Try the cells touching sample `e`
    fn refine(&self, e: usize, point: &[f64]) -> Option<Vec<f64>> {
        let idx = self.domain.unravel(e);
        let k = self.active.len();
        let mut best: Option<(f64, Vec<f64>)> = None;
        for choice in 0..(1usize << k) {
            let mut base = idx.clone();
            for (bit, &m) in self.active.iter().enumerate() {
                let n = self.domain.lengths[m];
                let b = if choice & (1 << bit) != 0 {
                    idx[m] as isize - 1
                } else {
                    idx[m] as isize
                };
                base[m] = b.clamp(0, n as isize - 2) as usize;
            }
            if let Some(u) = self.newton(&base, point) {
                // violation measured in index units; boundary cells may extrapolate
                let mut violation: f64 = 0.0;
                let mut frac = vec![0.0; self.domain.manifold_dimension()];
                for (bit, &m) in self.active.iter().enumerate() {
                    let uu = u[bit];
                    let n = self.domain.lengths[m];
                    let below = if base[m] == 0 { 0.5 } else { 0.0 };
                    let above = if base[m] + 2 == n { 0.5 } else { 0.0 };
                    let v = if uu < -EDGE_TOLERANCE {
                        (-uu - below).max(0.0)
                    } else if uu > 1.0 + EDGE_TOLERANCE {
                        (uu - 1.0 - above).max(0.0)
                    } else {
                        0.0
                    };
                    violation = violation.max(v);
                    frac[m] = base[m] as f64 + uu;
                }
                if violation <= EDGE_TOLERANCE {
                    let inside_score = u.iter().map(|x| (x - 0.5).abs()).fold(0.0, f64::max);
                    if best.as_ref().map(|(s, _)| inside_score < *s).unwrap_or(true) {
                        best = Some((inside_score, frac));
                    }
                }
            }
        }
        best.map(|(_, f)| f)
    }

    /// Solve X(u) = point inside the cell anchored at `base`
    fn newton(&self, base: &[usize], point: &[f64]) -> Option<Vec<f64>> {
        let k = self.active.len();
        let corners = 1usize << k;
        let mut corner_coords = vec![vec![0.0; self.rows.len()]; corners];
        for (corner, cc) in corner_coords.iter_mut().enumerate() {
            let mut idx = base.to_vec();
            for (bit, &m) in self.active.iter().enumerate() {
                if corner & (1 << bit) != 0 {
                    idx[m] += 1;
                }
            }
            let e = self.domain.flat_index(&idx);
            for (r, &c) in self.rows.iter().enumerate() {
                cc[r] = self.samples[[c, e]];
            }
        }
        if corner_coords.iter().flatten().any(|v| !v.is_finite()) {
            return None;
        }
        let target: Vec<f64> = self.rows.iter().map(|&c| point[c]).collect();
        let n = self.rows.len().min(k);
        let mut u = vec![0.5; k];
        for _ in 0..NEWTON_ITERATIONS {
            let mut x = vec![0.0; self.rows.len()];
            let mut jac = vec![vec![0.0; k]; self.rows.len()];
            for (corner, cc) in corner_coords.iter().enumerate() {
                let mut w = 1.0;
                let mut dw = vec![1.0; k];
                for d in 0..k {
                    let upper = corner & (1 << d) != 0;
                    let f = if upper { u[d] } else { 1.0 - u[d] };
                    let df = if upper { 1.0 } else { -1.0 };
                    w *= f;
                    for (dd, g) in dw.iter_mut().enumerate() {
                        *g *= if dd == d { df } else { f };
                    }
                }
                for r in 0..self.rows.len() {
                    x[r] += w * cc[r];
                    for d in 0..k {
                        jac[r][d] += dw[d] * cc[r];
                    }
                }
            }
            let residual: Vec<f64> = (0..n).map(|r| target[r] - x[r]).collect();
            let delta = solve(&jac[..n], &residual)?;
            let mut step: f64 = 0.0;
            for d in 0..k.min(delta.len()) {
                u[d] += delta[d];
                step = step.max(delta[d].abs());
            }
            if step < 1e-10 {
                break;
            }
        }
        if u.iter().all(|v| v.is_finite()) {
            Some(u)
        } else {
            None
        }
    }
}

/// Gaussian elimination with partial pivoting for small square systems
pub(crate) fn solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() < n) {
        return None;
    }
    let mut m: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, &bi)| {
            let mut r = row[..n].to_vec();
            r.push(bi);
            r
        })
        .collect();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            m[i][col]
                .abs()
                .partial_cmp(&m[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if m[pivot][col].abs() < 1e-300 {
            return None;
        }
        m.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            for k in col..=n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut s = m[row][n];
        for k in (row + 1)..n {
            s -= m[row][k] * x[k];
        }
        x[row] = s / m[row][row];
    }
    Some(x)
}
