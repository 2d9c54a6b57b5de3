//! Inbound grid sources.
//!
//! A [`GridSource`] hands out, per named parameter and time index, the sample
//! domain and the sample values of a (possibly index-restricted) grid. The
//! in-memory [`MemorySource`] keeps rectilinear grids and builds their domains
//! through a [`DomainCache`], so repeated requests for the same parameter,
//! selection and (when the vertical coordinate moves in time) time index share
//! one domain.

use chrono::{DateTime, Utc};
use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::domain::cache::{structural_identity, DomainCache, DomainKey};
use crate::domain::{
    Axis, CoordinateSystem, LinearAxis, MapProjection, SampleDomain, VerticalTransform,
};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField, Param};
use crate::units::Unit;

/// Index range along one axis: `start..end` (end exclusive, open when `None`) every `stride`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: Option<usize>,
    pub stride: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: Option<usize>, stride: usize) -> Self {
        Self { start, end, stride }
    }
}

/// Index restriction of a grid, one optional range per axis
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub ranges: Vec<Option<IndexRange>>,
}

impl Selection {
    /// Every sample
    pub fn all() -> Self {
        Self::default()
    }

    /// Every n-th sample along each axis
    pub fn strided(strides: &[usize]) -> Self {
        Self {
            ranges: strides
                .iter()
                .map(|&s| Some(IndexRange::new(0, None, s)))
                .collect(),
        }
    }

    pub fn with_range(mut self, axis: usize, range: IndexRange) -> Self {
        if self.ranges.len() <= axis {
            self.ranges.resize(axis + 1, None);
        }
        self.ranges[axis] = Some(range);
        self
    }

    pub fn is_all(&self) -> bool {
        self.ranges
            .iter()
            .flatten()
            .all(|r| r.start == 0 && r.end.is_none() && r.stride <= 1)
    }

    /// Selected indices along every axis of a grid with the given lengths
    pub fn indices(&self, lengths: &[usize]) -> Result<Vec<Vec<usize>>> {
        if self.ranges.len() > lengths.len() {
            return Err(EkmanError::invalid_param(
                "selection",
                format!("{} ranges for a {}-axis grid", self.ranges.len(), lengths.len()),
            ));
        }
        lengths
            .iter()
            .enumerate()
            .map(|(a, &n)| {
                let range = self.ranges.get(a).copied().flatten();
                let Some(r) = range else {
                    return Ok((0..n).collect());
                };
                let end = r.end.unwrap_or(n).min(n);
                if r.stride == 0 || r.start >= end {
                    return Err(EkmanError::invalid_param(
                        "selection",
                        format!("empty range {:?} on axis {} of length {}", r, a, n),
                    ));
                }
                Ok((r.start..end).step_by(r.stride).collect())
            })
            .collect()
    }

    /// Stable text form used in cache keys
    fn key(&self) -> String {
        if self.is_all() {
            return String::new();
        }
        self.ranges
            .iter()
            .map(|r| match r {
                Some(r) => format!("{}:{}:{}", r.start, r.end.map_or(-1, |e| e as i64), r.stride),
                None => "*".to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Supplier of domains and sample buffers per named parameter
pub trait GridSource: Send + Sync {
    fn parameters(&self) -> Vec<String>;

    /// Domain of `param` at `time_index`, restricted by `selection`
    fn domain(&self, param: &str, time_index: usize, selection: &Selection) -> Result<Arc<SampleDomain>>;

    /// Values of `param` at `time_index`; `None` when the step has no data
    fn read(&self, param: &str, time_index: usize, selection: &Selection) -> Result<Option<FlatGrid>>;

    /// Valid times of `param`, empty for a time-independent grid
    fn times(&self, param: &str) -> Result<Vec<DateTime<Utc>>>;

    fn vertical_transform(&self, param: &str) -> Option<Arc<dyn VerticalTransform>>;
}

/// A rectilinear grid held in memory: one coordinate vector per axis and one
/// value buffer (first axis fastest) per time step
#[derive(Clone)]
pub struct SourceGrid {
    pub name: String,
    pub unit: Unit,
    axes: Vec<Axis>,
    coords: Vec<Vec<f64>>,
    projection: Option<MapProjection>,
    vertical: Option<Arc<dyn VerticalTransform>>,
    times: Vec<DateTime<Utc>>,
    steps: Vec<Option<Vec<f32>>>,
}

impl fmt::Debug for SourceGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceGrid")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("axes", &self.axes)
            .field("lengths", &self.lengths())
            .field("vertical", &self.vertical.as_ref().map(|v| v.name().to_string()))
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl SourceGrid {
    pub fn new(name: &str, unit: Unit, axes: Vec<Axis>, coords: Vec<Vec<f64>>) -> Result<Self> {
        if axes.len() != coords.len() || !(1..=3).contains(&axes.len()) {
            return Err(EkmanError::invalid_param(
                name,
                format!("{} axes with {} coordinate vectors", axes.len(), coords.len()),
            ));
        }
        if coords.iter().any(|c| c.is_empty()) {
            return Err(EkmanError::invalid_param(name, "empty coordinate vector"));
        }
        Ok(Self {
            name: name.to_string(),
            unit,
            axes,
            coords,
            projection: None,
            vertical: None,
            times: Vec::new(),
            steps: Vec::new(),
        })
    }

    pub fn with_projection(mut self, projection: MapProjection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_vertical_transform(mut self, transform: Arc<dyn VerticalTransform>) -> Self {
        self.vertical = Some(transform);
        self
    }

    /// Values of a time-independent grid
    pub fn with_values(mut self, values: Vec<f32>) -> Result<Self> {
        if !self.times.is_empty() {
            return Err(EkmanError::invalid_param(&self.name, "grid already has time steps"));
        }
        self.check_len(&values)?;
        self.steps = vec![Some(values)];
        Ok(self)
    }

    /// Append a time step; `None` marks a step with no data
    pub fn with_step(mut self, time: DateTime<Utc>, values: Option<Vec<f32>>) -> Result<Self> {
        if self.times.is_empty() && !self.steps.is_empty() {
            return Err(EkmanError::invalid_param(&self.name, "grid is time independent"));
        }
        if self.times.last().map_or(false, |last| *last >= time) {
            return Err(EkmanError::invalid_param(&self.name, "times must be strictly increasing"));
        }
        if let Some(v) = &values {
            self.check_len(v)?;
        }
        self.times.push(time);
        self.steps.push(values);
        Ok(self)
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.coords.iter().map(Vec::len).collect()
    }

    fn check_len(&self, values: &[f32]) -> Result<()> {
        let expected: usize = self.lengths().iter().product();
        if values.len() != expected {
            return Err(EkmanError::invalid_param(
                &self.name,
                format!("{} values for a grid of {} samples", values.len(), expected),
            ));
        }
        Ok(())
    }

    /// Identity of the whole grid, shared by every selection of it
    fn identity(&self) -> u64 {
        let coords: Vec<&[f64]> = self.coords.iter().map(|c| c.as_slice()).collect();
        let mut id = structural_identity(&self.name, &self.axes, &coords);
        if let Some(v) = &self.vertical {
            id ^= structural_identity(v.name(), &[], &[]);
        }
        id
    }

    fn vertical_axis(&self) -> Option<usize> {
        self.axes.iter().position(|a| a.kind.is_vertical())
    }

    /// Build the domain of the selected samples
    fn build_domain(&self, index: &[Vec<usize>], time_index: usize) -> Result<SampleDomain> {
        let coords: Vec<Vec<f64>> = index
            .iter()
            .zip(&self.coords)
            .map(|(idx, c)| idx.iter().map(|&i| c[i]).collect())
            .collect();
        let horizontal_cs = self.projection.clone().map(CoordinateSystem::projection);
        let transform = match &self.vertical {
            Some(t) => t,
            None => {
                let domain = product_domain(self.axes.clone(), &coords)?;
                return Ok(match horizontal_cs {
                    Some(cs) => domain.with_coord_system(cs),
                    None => domain,
                });
            }
        };

        let v = self.vertical_axis().ok_or_else(|| {
            EkmanError::invalid_param(
                &self.name,
                format!("vertical transform '{}' without a vertical axis", transform.name()),
            )
        })?;
        let lengths: Vec<usize> = coords.iter().map(Vec::len).collect();
        let native = product_domain(self.axes.clone(), &coords)?;
        let samples = native.samples().into_owned();
        let full_lengths = self.lengths();
        let horizontal: Vec<usize> = (0..native.len())
            .map(|e| {
                let selected = native.unravel(e);
                let mut flat = 0;
                let mut stride = 1;
                for (a, (&i, &n)) in selected.iter().zip(&full_lengths).enumerate() {
                    if a == v {
                        continue;
                    }
                    flat += index[a][i] * stride;
                    stride *= n;
                }
                flat
            })
            .collect();
        let native_levels = samples.row(v).to_vec();
        let altitudes = transform.altitudes(&native_levels, &horizontal, Some(time_index))?;

        let mut reference_samples = samples;
        for (e, z) in altitudes.into_iter().enumerate() {
            reference_samples[[v, e]] = z;
        }
        let mut reference_axes = self.axes.clone();
        reference_axes[v] = Axis::altitude();
        let mut reference = SampleDomain::gridded(reference_axes, lengths, reference_samples)?;
        if let Some(cs) = horizontal_cs {
            reference = reference.with_coord_system(cs);
        }
        let cs = CoordinateSystem::empirical(Arc::new(native.clone()), Arc::new(reference))?;
        debug!(
            param = %self.name,
            transform = transform.name(),
            time_index,
            "built empirical vertical coordinate system"
        );
        Ok(native.with_coord_system(cs))
    }
}

/// Closed-form domain when every coordinate vector is evenly spaced, explicit otherwise
fn product_domain(axes: Vec<Axis>, coords: &[Vec<f64>]) -> Result<SampleDomain> {
    if let Some(linear) = coords.iter().map(|c| as_linear(c)).collect::<Option<Vec<_>>>() {
        return SampleDomain::linear(axes, linear);
    }
    let lengths: Vec<usize> = coords.iter().map(Vec::len).collect();
    let n: usize = lengths.iter().product();
    let mut samples = Array2::<f64>::zeros((coords.len(), n));
    for e in 0..n {
        let mut rest = e;
        for (a, c) in coords.iter().enumerate() {
            samples[[a, e]] = c[rest % c.len()];
            rest /= c.len();
        }
    }
    SampleDomain::gridded(axes, lengths, samples)
}

fn as_linear(c: &[f64]) -> Option<LinearAxis> {
    if c.len() == 1 {
        return Some(LinearAxis::new(c[0], 1.0, 1));
    }
    let step = c[1] - c[0];
    let tolerance = step.abs() * 1e-6;
    let even = c
        .windows(2)
        .all(|w| ((w[1] - w[0]) - step).abs() <= tolerance);
    (even && step != 0.0).then(|| LinearAxis::new(c[0], step, c.len()))
}

/// Grid source over in-memory grids
pub struct MemorySource {
    grids: RwLock<HashMap<String, Arc<SourceGrid>>>,
    cache: Arc<DomainCache>,
}

impl MemorySource {
    pub fn new(cache: Arc<DomainCache>) -> Self {
        Self {
            grids: RwLock::new(HashMap::new()),
            cache,
        }
    }

    /// Add or replace a grid. Replacing drops every cached domain of the old grid.
    pub fn insert(&self, grid: SourceGrid) {
        let previous = self
            .grids
            .write()
            .insert(grid.name.clone(), Arc::new(grid));
        if let Some(old) = previous {
            let dropped = self.cache.invalidate(old.identity());
            debug!(param = %old.name, dropped, "replaced grid, invalidated cached domains");
        }
    }

    pub fn cache(&self) -> &Arc<DomainCache> {
        &self.cache
    }

    fn grid(&self, param: &str) -> Result<Arc<SourceGrid>> {
        self.grids
            .read()
            .get(param)
            .cloned()
            .ok_or_else(|| EkmanError::DataNotFound {
                message: format!("no parameter named '{}'", param),
            })
    }

    fn checked_time(grid: &SourceGrid, time_index: usize) -> Result<()> {
        if time_index >= grid.steps.len().max(1) {
            return Err(EkmanError::DataNotFound {
                message: format!(
                    "time index {} out of range for '{}' ({} steps)",
                    time_index,
                    grid.name,
                    grid.steps.len()
                ),
            });
        }
        Ok(())
    }

    fn domain_of(&self, grid: &SourceGrid, time_index: usize, selection: &Selection) -> Result<(Arc<SampleDomain>, Vec<Vec<usize>>)> {
        Self::checked_time(grid, time_index)?;
        let index = selection.indices(&grid.lengths())?;
        let time_dependent = grid
            .vertical
            .as_ref()
            .map_or(false, |v| v.is_time_dependent());
        let key = DomainKey::new(
            grid.identity(),
            time_dependent.then_some(time_index),
            selection.key(),
        );
        let domain = self
            .cache
            .get_or_try_build(&key, || grid.build_domain(&index, time_index))?;
        Ok((domain, index))
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(Arc::new(DomainCache::default()))
    }
}

impl GridSource for MemorySource {
    fn parameters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.grids.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn domain(&self, param: &str, time_index: usize, selection: &Selection) -> Result<Arc<SampleDomain>> {
        let grid = self.grid(param)?;
        self.domain_of(&grid, time_index, selection).map(|(d, _)| d)
    }

    fn read(&self, param: &str, time_index: usize, selection: &Selection) -> Result<Option<FlatGrid>> {
        let grid = self.grid(param)?;
        let (domain, index) = self.domain_of(&grid, time_index, selection)?;
        let Some(Some(values)) = grid.steps.get(time_index) else {
            debug!(param, time_index, "no data for step");
            return Ok(None);
        };
        let full_lengths = grid.lengths();
        let selected: Vec<f32> = (0..domain.len())
            .map(|e| {
                let mut rest = e;
                let mut flat = 0;
                let mut stride = 1;
                for (idx, &n) in index.iter().zip(&full_lengths) {
                    flat += idx[rest % idx.len()] * stride;
                    rest /= idx.len();
                    stride *= n;
                }
                values[flat]
            })
            .collect();
        FlatGrid::scalar(domain, Param::new(&grid.name, grid.unit.clone()), selected).map(Some)
    }

    fn times(&self, param: &str) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.grid(param)?.times.clone())
    }

    fn vertical_transform(&self, param: &str) -> Option<Arc<dyn VerticalTransform>> {
        self.grid(param).ok().and_then(|g| g.vertical.clone())
    }
}

/// Read every step of `param` into a field: a time sequence when the grid has
/// valid times, a single grid otherwise
pub fn load_field(source: &dyn GridSource, param: &str, selection: &Selection) -> Result<GridField> {
    let start = Instant::now();
    let times = source.times(param)?;
    let field = if times.is_empty() {
        source
            .read(param, 0, selection)?
            .map(GridField::from)
            .ok_or_else(|| EkmanError::DataNotFound {
                message: format!("'{}' has no data", param),
            })?
    } else {
        let steps = (0..times.len())
            .map(|t| Ok(source.read(param, t, selection)?.map(GridField::from)))
            .collect::<Result<Vec<_>>>()?;
        GridField::time_sequence(times, steps)?
    };
    info!(
        param,
        steps = field.step_count(),
        duration_ms = start.elapsed().as_millis() as u64,
        "loaded field"
    );
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vertical::OceanSigma;
    use crate::domain::AxisKind;
    use crate::resolver::reference_samples;
    use chrono::TimeZone;

    fn temperature(n_times: usize) -> SourceGrid {
        let mut grid = SourceGrid::new(
            "t",
            Unit::Kelvin,
            vec![Axis::longitude(), Axis::latitude()],
            vec![vec![0.0, 1.0, 2.0, 3.0], vec![10.0, 11.0, 12.0]],
        )
        .unwrap();
        for k in 0..n_times {
            let time = Utc.with_ymd_and_hms(2024, 1, 1, k as u32, 0, 0).unwrap();
            let values = (0..12).map(|e| (100 * k + e) as f32).collect();
            let step = if k == 1 { None } else { Some(values) };
            grid = grid.with_step(time, step).unwrap();
        }
        grid
    }

    #[test]
    fn test_strided_read_gathers_selected_samples() {
        let source = MemorySource::default();
        source.insert(temperature(1));
        let sel = Selection::strided(&[2, 2]);
        let g = source.read("t", 0, &sel).unwrap().unwrap();
        assert_eq!(g.domain().lengths(), &[2, 2]);
        assert!(g.domain().is_linear());
        assert_eq!(g.values().row(0).to_vec(), vec![0.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn test_domains_are_shared_through_the_cache() {
        let source = MemorySource::default();
        source.insert(temperature(3));
        let a = source.domain("t", 0, &Selection::all()).unwrap();
        let b = source.domain("t", 2, &Selection::all()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = source.cache().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);

        source.insert(temperature(3));
        assert!(source.cache().is_empty());
    }

    #[test]
    fn test_load_field_keeps_missing_steps() {
        let source = MemorySource::default();
        source.insert(temperature(3));
        let field = load_field(&source, "t", &Selection::all()).unwrap();
        assert_eq!(field.step_count(), 3);
        assert_eq!(field.flats().len(), 2);
        assert!(matches!(
            load_field(&source, "q", &Selection::all()),
            Err(EkmanError::DataNotFound { .. })
        ));
    }

    #[test]
    fn test_uneven_coordinates_give_gridded_domain() {
        let grid = SourceGrid::new(
            "z",
            Unit::Meter,
            vec![Axis::longitude(), Axis::latitude()],
            vec![vec![0.0, 1.0, 3.0], vec![0.0, 1.0]],
        )
        .unwrap()
        .with_values(vec![0.0; 6])
        .unwrap();
        let source = MemorySource::default();
        source.insert(grid);
        let d = source.domain("z", 0, &Selection::all()).unwrap();
        assert!(!d.is_linear());
        assert_eq!(d.sample(2), vec![3.0, 0.0]);
    }

    #[test]
    fn test_ocean_sigma_builds_time_dependent_reference() {
        let transform = OceanSigma {
            eta: vec![vec![0.0; 4], vec![1.0; 4]],
            depth: vec![100.0; 4],
        };
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let grid = SourceGrid::new(
            "temp",
            Unit::Celsius,
            vec![Axis::longitude(), Axis::latitude(), Axis::level("sigma", Unit::Dimensionless)],
            vec![vec![0.0, 1.0], vec![0.0, 1.0], vec![-1.0, -0.5, 0.0]],
        )
        .unwrap()
        .with_vertical_transform(Arc::new(transform))
        .with_step(t0, Some(vec![10.0; 12]))
        .unwrap()
        .with_step(t1, Some(vec![11.0; 12]))
        .unwrap();
        let source = MemorySource::default();
        source.insert(grid);

        let d0 = source.domain("temp", 0, &Selection::all()).unwrap();
        let d1 = source.domain("temp", 1, &Selection::all()).unwrap();
        assert!(!Arc::ptr_eq(&d0, &d1));
        let (axes, reference) = reference_samples(&d0).unwrap();
        let v = axes.iter().position(|a| a.kind == AxisKind::Altitude).unwrap();
        // bottom level sits at -depth, the surface at eta
        assert!((reference[[v, 0]] + 100.0).abs() < 1e-9);
        assert!((reference[[v, 11]]).abs() < 1e-9);
        let (_, reference) = reference_samples(&d1).unwrap();
        assert!((reference[[v, 11]] - 1.0).abs() < 1e-9);
        assert!(source.vertical_transform("temp").is_some());
    }

    #[test]
    fn test_selection_validation() {
        let sel = Selection::all().with_range(0, IndexRange::new(3, Some(2), 1));
        assert!(sel.indices(&[4, 3]).is_err());
        let sel = Selection::strided(&[0]);
        assert!(sel.indices(&[4]).is_err());
        let sel = Selection::strided(&[1, 1, 1]);
        assert!(sel.indices(&[4, 3]).is_err());
        assert!(Selection::strided(&[1, 1]).is_all());
    }
}
