//! Slices: constant-level sheets, lines and profiles through a grid, point
//! samples, and collapsing 3D slices into 2D grids.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::resample_flat;
use crate::domain::vertical::{altitude_to_pressure, pressure_to_altitude};
use crate::domain::{
    domains_equal, Axis, AxisKind, CoordinateSystem, MapProjection, SampleDomain, SamplingMode,
};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField};
use crate::resolver::{self, is_navigated, is_single_point_domain, is_volume};
use crate::units::{Quantity, Unit};

/// A geographic point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLonPoint {
    pub lat: f64,
    pub lon: f64,
}

impl LatLonPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Where to sample: the sampling domain, plus a replacement source domain
/// when the grid must first be expressed in reference coordinates
struct Plan {
    source: Option<Arc<SampleDomain>>,
    target: Arc<SampleDomain>,
}

impl Plan {
    fn apply(&self, grid: &FlatGrid, mode: SamplingMode) -> Result<FlatGrid> {
        match &self.source {
            Some(reference) => resample_flat(&grid.with_domain(reference.clone())?, &self.target, mode),
            None => resample_flat(grid, &self.target, mode),
        }
    }
}

/// Apply a per-domain plan to every step, building it once per distinct domain
fn sample_with_plan<F>(field: &GridField, mode: SamplingMode, mut plan_for: F) -> Result<GridField>
where
    F: FnMut(&SampleDomain) -> Result<Plan>,
{
    let mut last: Option<(Arc<SampleDomain>, Plan)> = None;
    field.map_flat(|g| {
        let reuse = matches!(&last, Some((d, _)) if domains_equal(d, g.domain()));
        if !reuse {
            last = Some((g.domain().clone(), plan_for(g.domain())?));
        }
        match &last {
            Some((_, plan)) => plan.apply(g, mode),
            None => Err(EkmanError::DataNotFound {
                message: "no sampling plan".to_string(),
            }),
        }
    })
}

/// Reference-space copy of a domain, no coordinate system attached
fn reference_domain(domain: &SampleDomain) -> Result<Arc<SampleDomain>> {
    let (axes, samples) = resolver::reference_samples(domain)?;
    Ok(Arc::new(SampleDomain::gridded(
        axes,
        domain.lengths().to_vec(),
        samples,
    )?))
}

/// Slice a 3D grid at a constant vertical level.
///
/// The level may be given in the native vertical unit or in the unit of the
/// coordinate system's reference vertical (e.g. metres against a pressure
/// grid). When the reference level cannot be mapped back to a finite native
/// value the whole domain is converted to reference coordinates first.
pub fn slice_at_level(
    field: &GridField,
    level: f64,
    unit: &Unit,
    mode: SamplingMode,
) -> Result<GridField> {
    sample_with_plan(field, mode, |domain| level_plan(domain, level, unit))
}

fn level_plan(domain: &SampleDomain, level: f64, unit: &Unit) -> Result<Plan> {
    if !is_volume(domain) {
        return Err(EkmanError::manifold(
            "slice_at_level",
            format!("can't slice a grid that is not a 3D volume ({})", domain.describe()),
        ));
    }
    let v = domain.vertical_axis().ok_or_else(|| EkmanError::UnresolvableLevel {
        operation: "slice_at_level".to_string(),
        message: format!("no vertical coordinate ({})", domain.describe()),
    })?;
    let native_axis = &domain.axes()[v];

    if unit.can_convert(&native_axis.unit) {
        let native = unit.convert(level, &native_axis.unit)?;
        return Ok(Plan {
            source: None,
            target: Arc::new(level_sheet(domain, v, native)?),
        });
    }

    let cs = match domain.coord_system() {
        Some(cs) => cs,
        None => {
            let native = convert_vertical(level, unit, native_axis)
                .ok_or_else(|| incompatible_level(domain, unit))?;
            return Ok(Plan {
                source: None,
                target: Arc::new(level_sheet(domain, v, native)?),
            });
        }
    };

    let ref_axes = cs.reference_axes(domain.axes())?;
    let rv = ref_axes
        .iter()
        .position(|a| a.kind.is_vertical())
        .ok_or_else(|| incompatible_level(domain, unit))?;
    let ref_level = if unit.can_convert(&ref_axes[rv].unit) {
        unit.convert(level, &ref_axes[rv].unit)?
    } else {
        convert_vertical(level, unit, &ref_axes[rv]).ok_or_else(|| incompatible_level(domain, unit))?
    };

    if !matches!(cs.as_ref(), CoordinateSystem::Empirical { .. }) {
        let first = Array2::from_shape_vec((domain.dimension(), 1), domain.sample(0))
            .map_err(|e| EkmanError::invalid_param("slice_at_level", e.to_string()))?;
        let mut reference = cs.to_reference(domain.axes(), first.view())?;
        reference[[rv, 0]] = ref_level;
        let native = cs.from_reference(domain.axes(), reference.view())?[[v, 0]];
        if native.is_finite() {
            debug!(level, native, "resolved level through reference coordinates");
            return Ok(Plan {
                source: None,
                target: Arc::new(level_sheet(domain, v, native)?),
            });
        }
        warn!(
            level,
            domain = %domain.describe(),
            "level has no native value, converting domain to reference coordinates"
        );
    }

    let reference = reference_domain(domain)?;
    if !ref_level.is_finite() {
        return Err(EkmanError::UnresolvableLevel {
            operation: "slice_at_level".to_string(),
            message: format!("level {} {} is not finite in {}", level, unit, domain.describe()),
        });
    }
    let target = Arc::new(level_sheet(&reference, rv, ref_level)?);
    Ok(Plan {
        source: Some(reference),
        target,
    })
}

/// Pressure/altitude conversion through the standard atmosphere
fn convert_vertical(level: f64, unit: &Unit, axis: &Axis) -> Option<f64> {
    match (unit.quantity(), axis.unit.quantity()) {
        (Quantity::Length, Quantity::Pressure) => {
            let z = unit.convert(level, &Unit::Meter).ok()?;
            Unit::Hectopascal.convert(altitude_to_pressure(z), &axis.unit).ok()
        }
        (Quantity::Pressure, Quantity::Length) => {
            let p = unit.convert(level, &Unit::Hectopascal).ok()?;
            Unit::Meter.convert(pressure_to_altitude(p), &axis.unit).ok()
        }
        _ => None,
    }
}

fn incompatible_level(domain: &SampleDomain, unit: &Unit) -> EkmanError {
    EkmanError::UnresolvableLevel {
        operation: "slice_at_level".to_string(),
        message: format!(
            "level unit {} is incompatible with the vertical component of {}",
            unit,
            domain.describe()
        ),
    }
}

/// The first vertical layer's horizontal positions with the vertical set to `value`
fn level_sheet(domain: &SampleDomain, vertical: usize, value: f64) -> Result<SampleDomain> {
    let lengths = domain.lengths();
    let n = lengths[0] * lengths[1];
    let mut coords = Array2::<f64>::zeros((domain.dimension(), n));
    for e in 0..n {
        for (c, x) in domain.sample(e).into_iter().enumerate() {
            coords[[c, e]] = x;
        }
        coords[[vertical, e]] = value;
    }
    Ok(
        SampleDomain::gridded(domain.axes().to_vec(), vec![lengths[0], lengths[1]], coords)?
            .with_shared_coord_system(domain.coord_system().cloned()),
    )
}

/// Slice along the straight native-coordinate line between two points.
///
/// The path has as many points as the grid resolution covers along the
/// dominant horizontal axis. For a 3D grid every native level is kept, giving
/// a vertical cross-section; equal endpoints give a vertical profile.
pub fn slice_along_line(
    field: &GridField,
    start: LatLonPoint,
    end: LatLonPoint,
    mode: SamplingMode,
) -> Result<GridField> {
    if let Some(domain) = field.spatial_domain() {
        if is_single_point_domain(domain) {
            return Ok(field.clone());
        }
    }
    sample_with_plan(field, mode, |domain| line_plan(domain, start, end))
}

/// Vertical profile at a point
pub fn profile_at_point(field: &GridField, point: LatLonPoint, mode: SamplingMode) -> Result<GridField> {
    slice_along_line(field, point, point, mode)
}

fn line_plan(domain: &SampleDomain, start: LatLonPoint, end: LatLonPoint) -> Result<Plan> {
    let is_3d = domain.dimension() == 3;
    if is_3d && domain.manifold_dimension() != 3 {
        return Err(EkmanError::manifold(
            "slice_along_line",
            format!("domain must have same manifold size as dimension ({})", domain.describe()),
        ));
    }
    if !is_navigated(domain) {
        return Err(EkmanError::NotGeoreferenced {
            operation: "slice_along_line".to_string(),
            domain: domain.describe(),
        });
    }

    let native_lat = domain.find_axis(AxisKind::Latitude);
    let native_lon = domain.find_axis(AxisKind::Longitude);
    if let (Some(lat), Some(lon)) = (native_lat, native_lon) {
        let ends = endpoints_in(domain.axes(), lat, lon, start, end)?;
        return Ok(Plan {
            source: None,
            target: Arc::new(line_domain(domain, lat, lon, ends, start == end)?),
        });
    }

    let cs = domain.coord_system().ok_or_else(|| EkmanError::NotGeoreferenced {
        operation: "slice_along_line".to_string(),
        domain: domain.describe(),
    })?;
    let ref_axes = cs.reference_axes(domain.axes())?;
    let lat = ref_axes.iter().position(|a| a.kind == AxisKind::Latitude);
    let lon = ref_axes.iter().position(|a| a.kind == AxisKind::Longitude);
    let (lat, lon) = match (lat, lon) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EkmanError::NotGeoreferenced {
                operation: "slice_along_line".to_string(),
                domain: domain.describe(),
            })
        }
    };

    // endpoints in reference space, vertical held at the first sample's value
    let first = Array2::from_shape_vec((domain.dimension(), 1), domain.sample(0))
        .map_err(|e| EkmanError::invalid_param("slice_along_line", e.to_string()))?;
    let first_ref = cs.to_reference(domain.axes(), first.view())?;
    let ref_ends = endpoints_in(&ref_axes, lat, lon, start, end)?;
    let mut reference = Array2::<f64>::zeros((ref_axes.len(), 2));
    for c in 0..ref_axes.len() {
        reference[[c, 0]] = first_ref[[c, 0]];
        reference[[c, 1]] = first_ref[[c, 0]];
    }
    for (c, pair) in [(lat, ref_ends.lat), (lon, ref_ends.lon)] {
        reference[[c, 0]] = pair.0;
        reference[[c, 1]] = pair.1;
    }
    let native = cs.from_reference(domain.axes(), reference.view())?;
    let finite = [lat, lon]
        .iter()
        .all(|&c| native[[c, 0]].is_finite() && native[[c, 1]].is_finite());
    if finite {
        let ends = Endpoints {
            lat: (native[[lat, 0]], native[[lat, 1]]),
            lon: (native[[lon, 0]], native[[lon, 1]]),
        };
        return Ok(Plan {
            source: None,
            target: Arc::new(line_domain(domain, lat, lon, ends, start == end)?),
        });
    }

    warn!(
        domain = %domain.describe(),
        "line endpoints have no native coordinates, slicing in reference coordinates"
    );
    let reference_dom = reference_domain(domain)?;
    let target = Arc::new(line_domain(&reference_dom, lat, lon, ref_ends, start == end)?);
    Ok(Plan {
        source: Some(reference_dom),
        target,
    })
}

/// Start/end values along the two horizontal coordinates
struct Endpoints {
    lat: (f64, f64),
    lon: (f64, f64),
}

fn endpoints_in(
    axes: &[Axis],
    lat: usize,
    lon: usize,
    start: LatLonPoint,
    end: LatLonPoint,
) -> Result<Endpoints> {
    let deg = Unit::Degree;
    Ok(Endpoints {
        lat: (
            deg.convert(start.lat, &axes[lat].unit)?,
            deg.convert(end.lat, &axes[lat].unit)?,
        ),
        lon: (
            deg.convert(start.lon, &axes[lon].unit)?,
            deg.convert(end.lon, &axes[lon].unit)?,
        ),
    })
}

/// Evenly spaced path between the endpoints, repeated on every vertical level
fn line_domain(
    domain: &SampleDomain,
    lat: usize,
    lon: usize,
    ends: Endpoints,
    same_point: bool,
) -> Result<SampleDomain> {
    let is_3d = domain.dimension() == 3;
    let lengths = domain.lengths();
    let size_x = lengths[lon.min(lengths.len() - 1)];
    let size_y = lengths[lat.min(lengths.len() - 1)];
    let size_z = if is_3d { lengths[2] } else { 1 };
    let other = 3 - (lat + lon);
    let (lo, hi) = domain.low_high();

    let num_locs = if same_point {
        1
    } else {
        let count = |c: usize, size: usize, (a, b): (f64, f64)| {
            let per = (hi[c] - lo[c]) / size as f64;
            if per > 0.0 {
                ((a - b).abs() / per).round() as usize
            } else {
                0
            }
        };
        let nx = count(lon, size_x, ends.lon);
        let ny = count(lat, size_y, ends.lat);
        nx.max(ny).min(size_x).max(1)
    };

    let lon_range = (domain.axes()[lon].kind == AxisKind::Longitude).then(|| (lo[lon], hi[lon]));
    let mut coords = Array2::<f64>::zeros((domain.dimension(), num_locs * size_z));
    for k in 0..size_z {
        let height = if is_3d {
            domain.sample(domain.flat_index(&[0, 0, k]))[other]
        } else {
            0.0
        };
        for i in 0..num_locs {
            let p = i + k * num_locs;
            let frac = if num_locs == 1 {
                1.0
            } else {
                i as f64 / (num_locs - 1) as f64
            };
            let mut x = ends.lon.0 + (ends.lon.1 - ends.lon.0) * frac;
            if let Some((low, high)) = lon_range {
                x = resolver::normalize_into(x, low, high);
            }
            coords[[lon, p]] = x;
            coords[[lat, p]] = ends.lat.0 + (ends.lat.1 - ends.lat.0) * frac;
            if is_3d {
                coords[[other, p]] = height;
            }
        }
    }
    let line_lengths = match (is_3d, num_locs > 1) {
        (true, true) => vec![num_locs, size_z],
        (true, false) => vec![size_z],
        (false, _) => vec![num_locs],
    };
    Ok(
        SampleDomain::gridded(domain.axes().to_vec(), line_lengths, coords)?
            .with_shared_coord_system(domain.coord_system().cloned()),
    )
}

/// Sample a 3D grid at a single geographic location; `altitude` is in metres
pub fn sample_at_point(
    field: &GridField,
    point: LatLonPoint,
    altitude: f64,
    mode: SamplingMode,
) -> Result<GridField> {
    let domain = field.spatial_domain().ok_or_else(|| EkmanError::DataNotFound {
        message: "field has no data to sample".to_string(),
    })?;
    if !is_navigated(domain) {
        return Err(EkmanError::NotGeoreferenced {
            operation: "sample_at_point".to_string(),
            domain: domain.describe(),
        });
    }
    if !is_volume(domain) {
        return Err(EkmanError::manifold(
            "sample_at_point",
            format!("need a 3D grid ({})", domain.describe()),
        ));
    }
    let (axes, coords) = if resolver::is_lat_lon_order(domain) {
        (
            vec![Axis::latitude(), Axis::longitude(), Axis::altitude()],
            vec![point.lat, point.lon, altitude],
        )
    } else {
        (
            vec![Axis::longitude(), Axis::latitude(), Axis::altitude()],
            vec![point.lon, point.lat, altitude],
        )
    };
    let samples = Array2::from_shape_vec((3, 1), coords)
        .map_err(|e| EkmanError::invalid_param("sample_at_point", e.to_string()))?;
    let target = Arc::new(SampleDomain::gridded(axes, vec![1, 1, 1], samples)?);
    super::resample(field, &target, mode)
}

/// Collapse a 2D slice embedded in 3D into a true 2D grid.
///
/// The third coordinate is dropped and any coordinate system is replaced by
/// the horizontal navigation of the original domain.
pub fn make_2d_grid_from_slice(field: &GridField) -> Result<GridField> {
    let mut last: Option<(Arc<SampleDomain>, Arc<SampleDomain>)> = None;
    field.map_flat(|g| {
        let reuse = matches!(&last, Some((d, _)) if domains_equal(d, g.domain()));
        if !reuse {
            last = Some((g.domain().clone(), Arc::new(collapse_domain(g.domain())?)));
        }
        match &last {
            Some((_, flat)) => g.with_domain(flat.clone()),
            None => Err(EkmanError::DataNotFound {
                message: "no collapsed domain".to_string(),
            }),
        }
    })
}

fn collapse_domain(domain: &SampleDomain) -> Result<SampleDomain> {
    if domain.dimension() != 3 || domain.manifold_dimension() != 2 {
        return Err(EkmanError::manifold(
            "make_2d_grid_from_slice",
            format!("not a 2D slice of a 3D domain ({})", domain.describe()),
        ));
    }
    horizontal_domain(domain)
}

/// 2D domain over the first layer's horizontal coordinates.
///
/// A coordinate system is replaced by the domain's horizontal navigation,
/// or dropped when the axes are already latitude and longitude.
pub(crate) fn horizontal_domain(domain: &SampleDomain) -> Result<SampleDomain> {
    if domain.manifold_dimension() < 2 {
        return Err(EkmanError::manifold(
            "horizontal_domain",
            format!("need at least a 2D manifold ({})", domain.describe()),
        ));
    }
    let lengths = domain.lengths()[..2].to_vec();
    let n = lengths[0] * lengths[1];
    let samples = domain.samples();
    let coords = samples.slice(ndarray::s![..2, ..n]).to_owned();
    let axes = domain.axes()[..2].to_vec();
    let flat = SampleDomain::gridded(axes.clone(), lengths, coords)?;
    if domain.coord_system().is_none() {
        return Ok(flat);
    }
    let navigation = resolver::navigation(domain)?;
    let already_lat_lon = matches!(navigation, MapProjection::LatLon(_))
        && axes.iter().any(|a| a.kind == AxisKind::Latitude)
        && axes.iter().any(|a| a.kind == AxisKind::Longitude);
    if already_lat_lon {
        Ok(flat)
    } else {
        Ok(flat.with_coord_system(CoordinateSystem::projection(navigation)))
    }
}
