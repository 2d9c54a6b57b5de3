//! Grid fields: functions from a sample domain to named, unit-tagged parameters.
//!
//! A field is either a flat grid or a sequence (time or ensemble index) of
//! nested fields. Sequence steps may be missing; missing steps travel through
//! every operation as `None` instead of raising errors. Individual missing
//! samples are NaN.

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::SampleDomain;
use crate::error::{EkmanError, Result};
use crate::units::Unit;

/// A named, unit-tagged scalar parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub unit: Unit,
}

impl Param {
    pub fn new(name: &str, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            unit,
        }
    }
}

/// Values of one or more parameters over a single domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatGrid {
    domain: Arc<SampleDomain>,
    params: Vec<Param>,
    /// Shape (parameter count, sample count)
    values: Array2<f32>,
}

impl FlatGrid {
    pub fn new(domain: Arc<SampleDomain>, params: Vec<Param>, values: Array2<f32>) -> Result<Self> {
        let grid = Self {
            domain,
            params,
            values,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Single-parameter grid
    pub fn scalar(domain: Arc<SampleDomain>, param: Param, values: Vec<f32>) -> Result<Self> {
        let n = values.len();
        let values = Array2::from_shape_vec((1, n), values)
            .map_err(|e| EkmanError::invalid_param(&param.name, e.to_string()))?;
        Self::new(domain, vec![param], values)
    }

    /// Check shapes; deserialized grids must pass this before use
    pub fn validate(&self) -> Result<()> {
        self.domain.validate()?;
        if self.params.is_empty() {
            return Err(EkmanError::invalid_param("params", "a grid needs at least one parameter"));
        }
        if self.values.nrows() != self.params.len() || self.values.ncols() != self.domain.len() {
            return Err(EkmanError::invalid_param(
                "values",
                format!(
                    "values are {}x{}, expected {}x{} for {}",
                    self.values.nrows(),
                    self.values.ncols(),
                    self.params.len(),
                    self.domain.len(),
                    self.domain.describe()
                ),
            ));
        }
        Ok(())
    }

    pub fn domain(&self) -> &Arc<SampleDomain> {
        &self.domain
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param(&self) -> &Param {
        &self.params[0]
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Values of one parameter
    pub fn component(&self, i: usize) -> ArrayView1<'_, f32> {
        self.values.row(i)
    }

    pub fn len(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same domain and parameters, new values
    pub fn with_values(&self, values: Array2<f32>) -> Result<Self> {
        Self::new(self.domain.clone(), self.params.clone(), values)
    }

    /// Same values on a domain with the same sample count
    pub fn with_domain(&self, domain: Arc<SampleDomain>) -> Result<Self> {
        Self::new(domain, self.params.clone(), self.values.clone())
    }

    pub fn with_params(&self, params: Vec<Param>) -> Result<Self> {
        Self::new(self.domain.clone(), params, self.values.clone())
    }

    /// Rename every parameter; multi-parameter grids get `name_<i>` suffixes
    pub fn renamed(&self, name: &str) -> Self {
        let params = if self.params.len() == 1 {
            vec![Param::new(name, self.params[0].unit.clone())]
        } else {
            self.params
                .iter()
                .enumerate()
                .map(|(i, p)| Param::new(&format!("{}_{}", name, i), p.unit.clone()))
                .collect()
        };
        Self {
            domain: self.domain.clone(),
            params,
            values: self.values.clone(),
        }
    }

    pub fn with_unit(&self, unit: Unit) -> Self {
        let mut out = self.clone();
        for p in out.params.iter_mut() {
            p.unit = unit.clone();
        }
        out
    }

    /// Apply a function to every value
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self {
            domain: self.domain.clone(),
            params: self.params.clone(),
            values: self.values.mapv(f),
        }
    }

    /// One parameter as a scalar grid
    pub fn select(&self, i: usize) -> Result<Self> {
        let param = self.params.get(i).cloned().ok_or_else(|| {
            EkmanError::invalid_param("component", format!("no component {}", i))
        })?;
        Self::scalar(self.domain.clone(), param, self.values.row(i).to_vec())
    }

    /// Minimum and maximum of the finite values, NaN when there are none
    pub fn min_max(&self) -> (f32, f32) {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::NAN, f32::NAN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    pub fn is_all_missing(&self) -> bool {
        self.values.iter().all(|v| !v.is_finite())
    }

    pub fn is_any_missing(&self) -> bool {
        self.values.iter().any(|v| !v.is_finite())
    }
}

/// Outer index of a sequence field with its (possibly missing) steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence<K> {
    /// Name of the outer index, e.g. "time" or "ensemble"
    pub name: String,
    pub keys: Vec<K>,
    pub steps: Vec<Option<GridField>>,
}

/// A flat grid or a (nested) sequence of grids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridField {
    Flat(FlatGrid),
    TimeSequence(Sequence<DateTime<Utc>>),
    IndexSequence(Sequence<i64>),
}

impl From<FlatGrid> for GridField {
    fn from(g: FlatGrid) -> Self {
        GridField::Flat(g)
    }
}

impl GridField {
    pub fn time_sequence(times: Vec<DateTime<Utc>>, steps: Vec<Option<GridField>>) -> Result<Self> {
        if times.len() != steps.len() {
            return Err(EkmanError::invalid_param(
                "time",
                format!("{} times for {} steps", times.len(), steps.len()),
            ));
        }
        Ok(GridField::TimeSequence(Sequence {
            name: "time".to_string(),
            keys: times,
            steps,
        }))
    }

    pub fn index_sequence(name: &str, keys: Vec<i64>, steps: Vec<Option<GridField>>) -> Result<Self> {
        if keys.len() != steps.len() {
            return Err(EkmanError::invalid_param(
                name,
                format!("{} keys for {} steps", keys.len(), steps.len()),
            ));
        }
        Ok(GridField::IndexSequence(Sequence {
            name: name.to_string(),
            keys,
            steps,
        }))
    }

    /// Validate every flat grid and sequence shape
    pub fn validate(&self) -> Result<()> {
        match self {
            GridField::Flat(g) => g.validate(),
            GridField::TimeSequence(s) => validate_sequence(s),
            GridField::IndexSequence(s) => validate_sequence(s),
        }
    }

    pub fn as_flat(&self) -> Option<&FlatGrid> {
        match self {
            GridField::Flat(g) => Some(g),
            _ => None,
        }
    }

    pub fn is_time_sequence(&self) -> bool {
        matches!(self, GridField::TimeSequence(_))
    }

    pub fn times(&self) -> Option<&[DateTime<Utc>]> {
        match self {
            GridField::TimeSequence(s) => Some(&s.keys),
            _ => None,
        }
    }

    /// Whether an ensemble (index) dimension appears anywhere in the nesting
    pub fn has_ensemble(&self) -> bool {
        match self {
            GridField::Flat(_) => false,
            GridField::IndexSequence(_) => true,
            GridField::TimeSequence(s) => s.steps.iter().flatten().any(|f| f.has_ensemble()),
        }
    }

    /// Steps of the outermost sequence; a flat grid is its own single step
    pub fn step_count(&self) -> usize {
        match self {
            GridField::Flat(_) => 1,
            GridField::TimeSequence(s) => s.steps.len(),
            GridField::IndexSequence(s) => s.steps.len(),
        }
    }

    /// Every flat grid, depth first
    pub fn flats(&self) -> Vec<&FlatGrid> {
        let mut out = Vec::new();
        self.collect_flats(&mut out);
        out
    }

    fn collect_flats<'a>(&'a self, out: &mut Vec<&'a FlatGrid>) {
        match self {
            GridField::Flat(g) => out.push(g),
            GridField::TimeSequence(s) => s.steps.iter().flatten().for_each(|f| f.collect_flats(out)),
            GridField::IndexSequence(s) => {
                s.steps.iter().flatten().for_each(|f| f.collect_flats(out))
            }
        }
    }

    pub fn first_flat(&self) -> Option<&FlatGrid> {
        match self {
            GridField::Flat(g) => Some(g),
            GridField::TimeSequence(s) => s.steps.iter().flatten().find_map(|f| f.first_flat()),
            GridField::IndexSequence(s) => s.steps.iter().flatten().find_map(|f| f.first_flat()),
        }
    }

    /// Spatial domain of the first non-missing step
    pub fn spatial_domain(&self) -> Option<&Arc<SampleDomain>> {
        self.first_flat().map(|g| g.domain())
    }

    pub fn params(&self) -> Option<&[Param]> {
        self.first_flat().map(|g| g.params())
    }

    /// Rebuild the field by applying `f` to every flat grid; missing steps stay missing
    pub fn map_flat<F>(&self, mut f: F) -> Result<GridField>
    where
        F: FnMut(&FlatGrid) -> Result<FlatGrid>,
    {
        self.map_flat_dyn(&mut f)
    }

    fn map_flat_dyn(&self, f: &mut dyn FnMut(&FlatGrid) -> Result<FlatGrid>) -> Result<GridField> {
        match self {
            GridField::Flat(g) => Ok(GridField::Flat(f(g)?)),
            GridField::TimeSequence(s) => Ok(GridField::TimeSequence(map_sequence(s, f)?)),
            GridField::IndexSequence(s) => Ok(GridField::IndexSequence(map_sequence(s, f)?)),
        }
    }

    /// Like [`GridField::map_flat`], but the function may turn a step into a missing one
    pub fn filter_map_flat<F>(&self, mut f: F) -> Result<Option<GridField>>
    where
        F: FnMut(&FlatGrid) -> Result<Option<FlatGrid>>,
    {
        self.filter_map_dyn(&mut f)
    }

    fn filter_map_dyn(
        &self,
        f: &mut dyn FnMut(&FlatGrid) -> Result<Option<FlatGrid>>,
    ) -> Result<Option<GridField>> {
        fn seq<K: Clone>(
            s: &Sequence<K>,
            f: &mut dyn FnMut(&FlatGrid) -> Result<Option<FlatGrid>>,
        ) -> Result<Sequence<K>> {
            let steps = s
                .steps
                .iter()
                .map(|step| match step {
                    Some(field) => field.filter_map_dyn(f),
                    None => Ok(None),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Sequence {
                name: s.name.clone(),
                keys: s.keys.clone(),
                steps,
            })
        }
        match self {
            GridField::Flat(g) => Ok(f(g)?.map(GridField::Flat)),
            GridField::TimeSequence(s) => Ok(Some(GridField::TimeSequence(seq(s, f)?))),
            GridField::IndexSequence(s) => Ok(Some(GridField::IndexSequence(seq(s, f)?))),
        }
    }

    /// Combine with a second field step by step.
    ///
    /// The structure of `self` drives the result. A flat `other` is reused for
    /// every step; a sequence `other` is aligned to this field's keys (times by
    /// nearest time inside the other's range). Steps missing on either side are
    /// missing in the result.
    pub fn zip_flat<F>(&self, other: &GridField, mut f: F) -> Result<GridField>
    where
        F: FnMut(&FlatGrid, &FlatGrid) -> Result<FlatGrid>,
    {
        self.zip_dyn(other, &mut f)
    }

    fn zip_dyn(
        &self,
        other: &GridField,
        f: &mut dyn FnMut(&FlatGrid, &FlatGrid) -> Result<FlatGrid>,
    ) -> Result<GridField> {
        match (self, other) {
            (GridField::Flat(a), GridField::Flat(b)) => Ok(GridField::Flat(f(a, b)?)),
            (GridField::Flat(a), _) => {
                // broadcast the flat operand across the other's steps, keeping argument order
                other.map_flat_dyn(&mut |b| f(a, b))
            }
            (_, GridField::Flat(b)) => self.map_flat_dyn(&mut |a| f(a, b)),
            (GridField::TimeSequence(a), GridField::TimeSequence(b)) => {
                let aligned = align_times(&a.keys, &b.keys);
                Ok(GridField::TimeSequence(zip_sequence(a, b, &aligned, f)?))
            }
            (GridField::IndexSequence(a), GridField::IndexSequence(b)) => {
                let aligned = align_indices(&a.keys, &b.keys);
                Ok(GridField::IndexSequence(zip_sequence(a, b, &aligned, f)?))
            }
            (GridField::TimeSequence(a), GridField::IndexSequence(_)) => {
                // time over ensemble against a bare ensemble: pair every time with it
                let steps = a
                    .steps
                    .iter()
                    .map(|step| step.as_ref().map(|s| s.zip_dyn(other, f)).transpose())
                    .collect::<Result<Vec<_>>>()?;
                Ok(GridField::TimeSequence(Sequence {
                    name: a.name.clone(),
                    keys: a.keys.clone(),
                    steps,
                }))
            }
            (GridField::IndexSequence(a), GridField::TimeSequence(_)) => Err(EkmanError::incompatible(
                "zip",
                format!("cannot pair index sequence '{}' with a time sequence", a.name),
            )),
        }
    }

    /// Rename the parameters of every step
    pub fn renamed(&self, name: &str) -> Result<GridField> {
        self.map_flat(|g| Ok(g.renamed(name)))
    }
}

fn validate_sequence<K>(s: &Sequence<K>) -> Result<()> {
    if s.keys.len() != s.steps.len() {
        return Err(EkmanError::invalid_param(
            &s.name,
            format!("{} keys for {} steps", s.keys.len(), s.steps.len()),
        ));
    }
    s.steps.iter().flatten().try_for_each(|f| f.validate())
}

fn map_sequence<K: Clone>(
    s: &Sequence<K>,
    f: &mut dyn FnMut(&FlatGrid) -> Result<FlatGrid>,
) -> Result<Sequence<K>> {
    let steps = s
        .steps
        .iter()
        .map(|step| step.as_ref().map(|field| field.map_flat_dyn(f)).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(Sequence {
        name: s.name.clone(),
        keys: s.keys.clone(),
        steps,
    })
}

fn zip_sequence<K: Clone, J>(
    a: &Sequence<K>,
    b: &Sequence<J>,
    aligned: &[Option<usize>],
    f: &mut dyn FnMut(&FlatGrid, &FlatGrid) -> Result<FlatGrid>,
) -> Result<Sequence<K>> {
    let steps = a
        .steps
        .iter()
        .zip(aligned)
        .map(|(step, idx)| {
            let other = idx.and_then(|j| b.steps.get(j)).and_then(|s| s.as_ref());
            match (step, other) {
                (Some(x), Some(y)) => x.zip_dyn(y, f).map(Some),
                _ => Ok(None),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Sequence {
        name: a.name.clone(),
        keys: a.keys.clone(),
        steps,
    })
}

/// Map each primary time to a secondary step: exact match, else nearest time
/// when inside the secondary's range, else none. Two single-step series
/// always pair.
pub fn align_times(primary: &[DateTime<Utc>], secondary: &[DateTime<Utc>]) -> Vec<Option<usize>> {
    if primary.len() == 1 && secondary.len() == 1 {
        return vec![Some(0)];
    }
    let (lo, hi) = match (secondary.iter().min(), secondary.iter().max()) {
        (Some(lo), Some(hi)) => (*lo, *hi),
        _ => return vec![None; primary.len()],
    };
    primary
        .iter()
        .map(|t| {
            if let Some(j) = secondary.iter().position(|s| s == t) {
                return Some(j);
            }
            if *t < lo || *t > hi {
                return None;
            }
            secondary
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| (**s - *t).num_milliseconds().unsigned_abs())
                .map(|(j, _)| j)
        })
        .collect()
}

/// Map ensemble keys by value, falling back to position when the keys differ
pub fn align_indices(primary: &[i64], secondary: &[i64]) -> Vec<Option<usize>> {
    let by_value: Vec<Option<usize>> = primary
        .iter()
        .map(|k| secondary.iter().position(|s| s == k))
        .collect();
    if by_value.iter().any(|v| v.is_some()) {
        by_value
    } else {
        (0..primary.len())
            .map(|i| (i < secondary.len()).then_some(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis};
    use chrono::TimeZone;

    fn domain() -> Arc<SampleDomain> {
        Arc::new(
            SampleDomain::linear(vec![Axis::longitude()], vec![LinearAxis::new(0.0, 1.0, 3)])
                .unwrap(),
        )
    }

    fn grid(v: f32) -> FlatGrid {
        FlatGrid::scalar(domain(), Param::new("t", Unit::Kelvin), vec![v; 3]).unwrap()
    }

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_scalar_shape_is_checked() {
        let bad = FlatGrid::scalar(domain(), Param::new("t", Unit::Kelvin), vec![1.0; 2]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_min_max_skips_missing() {
        let g = FlatGrid::scalar(domain(), Param::new("t", Unit::Kelvin), vec![1.0, f32::NAN, 3.0])
            .unwrap();
        assert_eq!(g.min_max(), (1.0, 3.0));
        assert!(g.is_any_missing());
        assert!(!g.is_all_missing());
    }

    #[test]
    fn test_map_keeps_missing_steps() {
        let f = GridField::time_sequence(
            vec![hour(0), hour(1)],
            vec![Some(grid(1.0).into()), None],
        )
        .unwrap();
        let doubled = f.map_flat(|g| Ok(g.map(|v| v * 2.0))).unwrap();
        match doubled {
            GridField::TimeSequence(s) => {
                assert!(s.steps[1].is_none());
                assert_eq!(s.steps[0].as_ref().unwrap().first_flat().unwrap().values()[[0, 0]], 2.0);
            }
            _ => panic!("expected a time sequence"),
        }
    }

    #[test]
    fn test_align_times() {
        let primary = vec![hour(0), hour(3), hour(6), hour(9)];
        let secondary = vec![hour(2), hour(6), hour(8)];
        assert_eq!(
            align_times(&primary, &secondary),
            vec![None, Some(0), Some(1), None]
        );
        assert_eq!(align_times(&[hour(0)], &[hour(5)]), vec![Some(0)]);
    }

    #[test]
    fn test_zip_broadcasts_flat_operand() {
        let seq = GridField::time_sequence(
            vec![hour(0), hour(1)],
            vec![Some(grid(1.0).into()), Some(grid(2.0).into())],
        )
        .unwrap();
        let flat: GridField = grid(10.0).into();
        let out = seq
            .zip_flat(&flat, |a, b| a.with_values(a.values() - b.values()))
            .unwrap();
        let values: Vec<f32> = out.flats().iter().map(|g| g.values()[[0, 0]]).collect();
        assert_eq!(values, vec![-9.0, -8.0]);

        let out = flat
            .zip_flat(&seq, |a, b| a.with_values(a.values() - b.values()))
            .unwrap();
        let values: Vec<f32> = out.flats().iter().map(|g| g.values()[[0, 0]]).collect();
        assert_eq!(values, vec![9.0, 8.0]);
    }

    #[test]
    fn test_serde_round_trip() {
        let f = GridField::time_sequence(vec![hour(0)], vec![Some(grid(1.0).into())]).unwrap();
        let json = serde_json::to_string(&f).unwrap();
        let back: GridField = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back, f);
    }
}
