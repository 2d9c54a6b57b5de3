//! Domain and coordinate resolution.
//!
//! Answers structural questions about a field's domain (grid shape,
//! georeferencing, axis order), resolves the 2D map projection behind a
//! coordinate system and converts points between two domains' native
//! coordinates, falling back to the reference space when the axes differ.

use ndarray::{Array2, ArrayView2};
use std::sync::Arc;
use tracing::debug;

use crate::domain::projection::LatLonBounds;
use crate::domain::vertical::{altitude_to_pressure, pressure_to_altitude};
use crate::domain::{
    domains_equal, Axis, AxisKind, CoordinateSystem, MapProjection, SampleDomain, Unwrapped,
};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField};
use crate::units::{Quantity, Unit};

/// Whether the field's spatial domain has manifold dimension 2 or 3
pub fn is_grid(field: &GridField) -> bool {
    field
        .spatial_domain()
        .map(|d| (2..=3).contains(&d.manifold_dimension()))
        .unwrap_or(false)
}

pub fn is_3d(domain: &SampleDomain) -> bool {
    domain.dimension() == 3
}

pub fn is_2d(domain: &SampleDomain) -> bool {
    domain.dimension() == 2
}

/// 3D coordinates on a 3D manifold
pub fn is_volume(domain: &SampleDomain) -> bool {
    domain.dimension() == 3 && domain.manifold_dimension() == 3
}

/// A 2D sheet embedded in 3D coordinates
pub fn is_slice(domain: &SampleDomain) -> bool {
    domain.dimension() == 3 && domain.manifold_dimension() == 2
}

/// Reference axes of a domain (its native axes when it has no coordinate system)
pub fn reference_axes(domain: &SampleDomain) -> Result<Vec<Axis>> {
    match domain.coord_system() {
        Some(cs) => cs.reference_axes(domain.axes()),
        None => Ok(domain.axes().to_vec()),
    }
}

/// Whether latitude and longitude can be derived for every sample
pub fn is_navigated(domain: &SampleDomain) -> bool {
    reference_axes(domain)
        .map(|axes| {
            axes.iter().any(|a| a.kind == AxisKind::Latitude)
                && axes.iter().any(|a| a.kind == AxisKind::Longitude)
        })
        .unwrap_or(false)
}

/// Whether latitude comes before longitude in the domain's reference order
pub fn is_lat_lon_order(domain: &SampleDomain) -> bool {
    let axes = match reference_axes(domain) {
        Ok(axes) => axes,
        Err(_) => return false,
    };
    let lat = axes.iter().position(|a| a.kind == AxisKind::Latitude);
    let lon = axes.iter().position(|a| a.kind == AxisKind::Longitude);
    matches!((lat, lon), (Some(la), Some(lo)) if la < lo)
}

/// Whether every step shares one spatial domain
pub fn is_constant_spatial_domain(field: &GridField) -> bool {
    let flats = field.flats();
    match flats.split_first() {
        Some((first, rest)) => rest.iter().all(|g| domains_equal(first.domain(), g.domain())),
        None => true,
    }
}

/// A domain with a single horizontal point: one sample, a 1x1 horizontal
/// index space, or a vertical profile whose horizontal coordinates never vary
pub fn is_single_point_domain(domain: &SampleDomain) -> bool {
    let lengths = domain.lengths();
    if domain.len() == 1 {
        return true;
    }
    if lengths.len() >= 2 {
        return lengths[0] == 1 && lengths[1] == 1;
    }
    if domain.dimension() == 3 {
        if let Some(v) = domain.vertical_axis() {
            let (lo, hi) = domain.low_high();
            return (0..3).filter(|&c| c != v).all(|c| lo[c] == hi[c]);
        }
    }
    false
}

pub fn get_vertical_kind(domain: &SampleDomain) -> Option<AxisKind> {
    domain.vertical_axis().map(|i| domain.axes()[i].kind)
}

pub fn get_vertical_unit(domain: &SampleDomain) -> Option<Unit> {
    domain.vertical_axis().map(|i| domain.axes()[i].unit.clone())
}

/// Resolve the 2D map projection behind a domain.
///
/// Coordinate systems are unwrapped one level at a time until a genuinely 2D
/// transform is found. A domain whose native or reference axes are latitude
/// and longitude resolves to a trivial lat/lon projection.
pub fn navigation(domain: &SampleDomain) -> Result<MapProjection> {
    let mut current = domain;
    let mut cs = domain.coord_system().map(|c| c.as_ref());
    loop {
        let next = match cs {
            Some(c) => c.unwrap_one_level(),
            None => Unwrapped::Identity,
        };
        match next {
            Unwrapped::Projection(p) => return Ok(p),
            Unwrapped::Inner(inner) => cs = Some(inner),
            Unwrapped::Reference(reference) => {
                current = reference;
                cs = reference.coord_system().map(|c| c.as_ref());
            }
            Unwrapped::Identity => {
                return lat_lon_projection(current).ok_or_else(|| EkmanError::NoNavigation {
                    domain: domain.describe(),
                })
            }
        }
    }
}

/// Trivial projection for a domain whose first two axes are latitude and longitude
fn lat_lon_projection(domain: &SampleDomain) -> Option<MapProjection> {
    let lat = domain.find_axis(AxisKind::Latitude)?;
    let lon = domain.find_axis(AxisKind::Longitude)?;
    if lat > 1 || lon > 1 {
        return None;
    }
    let (lo, hi) = domain.low_high();
    let to_deg = |i: usize, v: f64| domain.axes()[i].unit.convert(v, &Unit::Degree).ok();
    let (mut lat_min, mut lat_max) = (to_deg(lat, lo[lat])?, to_deg(lat, hi[lat])?);
    let (mut lon_min, mut lon_max) = (to_deg(lon, lo[lon])?, to_deg(lon, hi[lon])?);
    if lat_min == lat_max {
        lat_min -= 0.5;
        lat_max += 0.5;
    }
    if lon_min == lon_max {
        lon_min -= 0.5;
        lon_max += 0.5;
    }
    Some(MapProjection::LatLon(LatLonBounds {
        lat_first: lat < lon,
        lat_min,
        lon_min,
        lat_max,
        lon_max,
    }))
}

/// Shift a longitude by multiples of 360 into the domain's own longitude range
pub fn normalize_longitude(domain: &SampleDomain, lon: f64) -> f64 {
    let i = match domain.find_axis(AxisKind::Longitude) {
        Some(i) => i,
        None => return lon,
    };
    let (lo, hi) = domain.low_high();
    normalize_into(lon, lo[i], hi[i])
}

pub(crate) fn normalize_into(lon: f64, low: f64, high: f64) -> f64 {
    if !lon.is_finite() || !low.is_finite() || !high.is_finite() || low > high {
        return lon;
    }
    if (low..=high).contains(&lon) {
        return lon;
    }
    // first equivalent at or above `low`, then back one turn if that overshoots
    let shifted = low + (lon - low).rem_euclid(360.0);
    if shifted > high && shifted > low {
        shifted - 360.0
    } else {
        shifted
    }
}

/// Reference coordinates of every sample, with the reference axes
pub fn reference_samples(domain: &SampleDomain) -> Result<(Vec<Axis>, Array2<f64>)> {
    let samples = domain.samples();
    match domain.coord_system() {
        Some(cs) => Ok((
            cs.reference_axes(domain.axes())?,
            cs.to_reference(domain.axes(), samples.view())?,
        )),
        None => Ok((domain.axes().to_vec(), samples.into_owned())),
    }
}

/// Latitude and longitude (degrees) of every sample
pub fn get_lat_lon(domain: &SampleDomain) -> Result<(Vec<f64>, Vec<f64>)> {
    let not_georeferenced = || EkmanError::NotGeoreferenced {
        operation: "get_lat_lon".to_string(),
        domain: domain.describe(),
    };
    let (axes, samples) = reference_samples(domain)?;
    let lat = axes
        .iter()
        .position(|a| a.kind == AxisKind::Latitude)
        .ok_or_else(not_georeferenced)?;
    let lon = axes
        .iter()
        .position(|a| a.kind == AxisKind::Longitude)
        .ok_or_else(not_georeferenced)?;
    let mut lats = samples.row(lat).to_vec();
    let mut lons = samples.row(lon).to_vec();
    axes[lat].unit.convert_slice(&mut lats, &Unit::Degree)?;
    axes[lon].unit.convert_slice(&mut lons, &Unit::Degree)?;
    Ok((lats, lons))
}

/// Latitude and longitude of the sample at the middle index of every axis
pub fn center_point(domain: &SampleDomain) -> Result<(f64, f64)> {
    let mid: Vec<usize> = domain.lengths().iter().map(|&n| n / 2).collect();
    let e = domain.flat_index(&mid);
    let point = Array2::from_shape_vec((domain.dimension(), 1), domain.sample(e))
        .map_err(|e| EkmanError::invalid_param("center_point", e.to_string()))?;
    let (axes, reference) = match domain.coord_system() {
        Some(cs) => (
            cs.reference_axes(domain.axes())?,
            cs.to_reference(domain.axes(), point.view())?,
        ),
        None => (domain.axes().to_vec(), point),
    };
    let find = |kind: AxisKind| {
        axes.iter()
            .position(|a| a.kind == kind)
            .ok_or_else(|| EkmanError::NotGeoreferenced {
                operation: "center_point".to_string(),
                domain: domain.describe(),
            })
    };
    let (lat, lon) = (find(AxisKind::Latitude)?, find(AxisKind::Longitude)?);
    Ok((
        axes[lat].unit.convert(reference[[lat, 0]], &Unit::Degree)?,
        axes[lon].unit.convert(reference[[lon, 0]], &Unit::Degree)?,
    ))
}

/// Native vertical value of an altitude (m), evaluated at the domain's first sample column
pub fn get_level(domain: &SampleDomain, altitude: f64) -> Result<f64> {
    let v = vertical_index(domain, "get_level")?;
    let axis = &domain.axes()[v];
    match axis.kind {
        AxisKind::Altitude => return Unit::Meter.convert(altitude, &axis.unit),
        AxisKind::Pressure => {
            return Unit::Hectopascal.convert(altitude_to_pressure(altitude), &axis.unit)
        }
        _ => {}
    }
    let cs = domain.coord_system().ok_or_else(|| unresolvable(domain, "get_level"))?;
    let ref_axes = cs.reference_axes(domain.axes())?;
    let rv = ref_axes
        .iter()
        .position(|a| a.kind.is_vertical())
        .ok_or_else(|| unresolvable(domain, "get_level"))?;
    let first = domain.sample(0);
    let point = Array2::from_shape_vec((domain.dimension(), 1), first)
        .map_err(|e| EkmanError::invalid_param("get_level", e.to_string()))?;
    let mut reference = cs.to_reference(domain.axes(), point.view())?;
    reference[[rv, 0]] = Unit::Meter.convert(altitude, &ref_axes[rv].unit)?;
    let native = cs.from_reference(domain.axes(), reference.view())?;
    Ok(native[[v, 0]])
}

/// Altitude (m) of a native vertical value, evaluated at the domain's first sample column
pub fn get_altitude(domain: &SampleDomain, level: f64) -> Result<f64> {
    let v = vertical_index(domain, "get_altitude")?;
    let axis = &domain.axes()[v];
    match axis.kind {
        AxisKind::Altitude => return axis.unit.convert(level, &Unit::Meter),
        AxisKind::Pressure => {
            return Ok(pressure_to_altitude(axis.unit.convert(level, &Unit::Hectopascal)?))
        }
        _ => {}
    }
    let cs = domain.coord_system().ok_or_else(|| unresolvable(domain, "get_altitude"))?;
    let ref_axes = cs.reference_axes(domain.axes())?;
    let rv = ref_axes
        .iter()
        .position(|a| a.kind == AxisKind::Altitude)
        .ok_or_else(|| unresolvable(domain, "get_altitude"))?;
    let mut first = domain.sample(0);
    first[v] = level;
    let point = Array2::from_shape_vec((domain.dimension(), 1), first)
        .map_err(|e| EkmanError::invalid_param("get_altitude", e.to_string()))?;
    let reference = cs.to_reference(domain.axes(), point.view())?;
    ref_axes[rv].unit.convert(reference[[rv, 0]], &Unit::Meter)
}

fn vertical_index(domain: &SampleDomain, operation: &str) -> Result<usize> {
    if domain.dimension() != 3 {
        return Err(EkmanError::manifold(
            operation,
            format!("needs a 3D domain ({})", domain.describe()),
        ));
    }
    domain
        .vertical_axis()
        .ok_or_else(|| unresolvable(domain, operation))
}

fn unresolvable(domain: &SampleDomain, operation: &str) -> EkmanError {
    EkmanError::UnresolvableLevel {
        operation: operation.to_string(),
        message: format!("no vertical coordinate to resolve against ({})", domain.describe()),
    }
}

/// Whether a level expressed in `unit` can be located in the field's domain
pub fn can_slice_at_level(field: &GridField, unit: &Unit) -> bool {
    let domain = match field.spatial_domain() {
        Some(d) => d,
        None => return false,
    };
    if !is_volume(domain) {
        return false;
    }
    if let Some(native) = get_vertical_unit(domain) {
        if native.can_convert(unit) {
            return true;
        }
    }
    match reference_axes(domain) {
        Ok(axes) => axes
            .iter()
            .filter(|a| a.kind.is_vertical())
            .any(|a| a.unit.can_convert(unit))
            || (unit.quantity() == Quantity::Length
                && get_vertical_kind(domain) == Some(AxisKind::Pressure))
            || (unit.quantity() == Quantity::Pressure
                && get_vertical_kind(domain) == Some(AxisKind::Altitude)),
        Err(_) => false,
    }
}

/// Whether the first two axes are latitude/longitude and can be exchanged
pub fn can_swap_lat_lon(domain: &SampleDomain) -> bool {
    if domain.dimension() < 2 || domain.manifold_dimension() < 2 {
        return false;
    }
    let kinds = [domain.axes()[0].kind, domain.axes()[1].kind];
    let lat_lon = matches!(
        kinds,
        [AxisKind::Latitude, AxisKind::Longitude] | [AxisKind::Longitude, AxisKind::Latitude]
    );
    let cs_ok = match domain.coord_system().map(|c| c.as_ref()) {
        None | Some(CoordinateSystem::Identity) => true,
        Some(CoordinateSystem::CartesianProduct { horizontal, .. }) => {
            matches!(horizontal.as_ref(), CoordinateSystem::Identity)
        }
        Some(_) => false,
    };
    lat_lon && cs_ok
}

fn swap_flat(grid: &FlatGrid) -> Result<FlatGrid> {
    let (domain, perm) = grid.domain().swap_first_axes()?;
    let values = grid.values();
    let mut out = Array2::<f32>::zeros(values.raw_dim());
    for (e_new, &e_old) in perm.iter().enumerate() {
        for c in 0..values.nrows() {
            out[[c, e_new]] = values[[c, e_old]];
        }
    }
    FlatGrid::new(Arc::new(domain), grid.params().to_vec(), out)
}

/// Exchange the latitude and longitude axes of every step
pub fn swap_lat_lon(field: &GridField) -> Result<GridField> {
    if let Some(domain) = field.spatial_domain() {
        if !can_swap_lat_lon(domain) {
            return Err(EkmanError::incompatible(
                "swap_lat_lon",
                format!("cannot swap axes of {}", domain.describe()),
            ));
        }
    }
    field.map_flat(swap_flat)
}

/// Express points given in `from`'s native coordinates in `to`'s native coordinates.
///
/// Matching axes are mapped directly with unit conversion when both domains
/// share a coordinate system; otherwise the points travel through the
/// reference space. Pressure and altitude are reconciled through the standard
/// atmosphere when the two sides disagree on the vertical quantity. A
/// coordinate of `to` that `from` cannot supply is filled in only when `to`
/// is constant along it.
pub fn convert_points(
    from: &SampleDomain,
    points: ArrayView2<f64>,
    to: &SampleDomain,
) -> Result<Array2<f64>> {
    let same_cs = match (from.coord_system(), to.coord_system()) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
        _ => false,
    };
    if same_cs {
        if let Some(out) = map_axes(from.axes(), points, to.axes(), || Ok(native_constants(to)))? {
            return Ok(out);
        }
    }

    let (from_axes, from_ref) = match from.coord_system() {
        Some(cs) => (
            cs.reference_axes(from.axes())?,
            cs.to_reference(from.axes(), points)?,
        ),
        None => (from.axes().to_vec(), points.to_owned()),
    };
    let to_axes = reference_axes(to)?;
    let to_ref = map_axes(&from_axes, from_ref.view(), &to_axes, || {
        let (_, samples) = reference_samples(to)?;
        Ok(row_constants(&samples))
    })?
    .ok_or_else(|| {
        EkmanError::incompatible(
            "convert_points",
            format!("{} has no coordinates for {}", from.describe(), to.describe()),
        )
    })?;
    debug!(
        from = %from.describe(),
        to = %to.describe(),
        "converted points through reference coordinates"
    );
    match to.coord_system() {
        Some(cs) => cs.from_reference(to.axes(), to_ref.view()),
        None => Ok(to_ref),
    }
}

/// Per-coordinate constant value of a domain, if the coordinate never varies
fn native_constants(domain: &SampleDomain) -> Vec<Option<f64>> {
    let (lo, hi) = domain.low_high();
    lo.into_iter()
        .zip(hi)
        .map(|(l, h)| (l == h).then_some(l))
        .collect()
}

fn row_constants(samples: &Array2<f64>) -> Vec<Option<f64>> {
    samples
        .rows()
        .into_iter()
        .map(|row| {
            let first = row.iter().copied().find(|v| v.is_finite())?;
            row.iter()
                .all(|v| !v.is_finite() || *v == first)
                .then_some(first)
        })
        .collect()
}

/// Pick and convert rows of `points` (on `src` axes) onto `dst` axes.
///
/// Returns `None` when a destination axis has no source and no constant.
fn map_axes<C>(
    src: &[Axis],
    points: ArrayView2<f64>,
    dst: &[Axis],
    constants: C,
) -> Result<Option<Array2<f64>>>
where
    C: FnOnce() -> Result<Vec<Option<f64>>>,
{
    let n = points.ncols();
    let mut out = Array2::<f64>::zeros((dst.len(), n));
    let mut constants = Some(constants);
    let mut cached: Option<Vec<Option<f64>>> = None;
    for (d, axis) in dst.iter().enumerate() {
        if let Some(s) = src.iter().position(|a| a.matches(axis)) {
            for p in 0..n {
                out[[d, p]] = src[s].unit.convert(points[[s, p]], &axis.unit)?;
            }
            continue;
        }
        if let Some(s) = vertical_partner(src, axis) {
            let from = &src[s];
            for p in 0..n {
                let v = points[[s, p]];
                out[[d, p]] = match axis.kind {
                    AxisKind::Pressure => Unit::Hectopascal
                        .convert(altitude_to_pressure(from.unit.convert(v, &Unit::Meter)?), &axis.unit)?,
                    _ => Unit::Meter.convert(
                        pressure_to_altitude(from.unit.convert(v, &Unit::Hectopascal)?),
                        &axis.unit,
                    )?,
                };
            }
            continue;
        }
        if cached.is_none() {
            if let Some(f) = constants.take() {
                cached = Some(f()?);
            }
        }
        match cached.as_ref().and_then(|c| c.get(d).copied().flatten()) {
            Some(value) => out.row_mut(d).fill(value),
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

/// Source axis that can stand in for a pressure/altitude destination axis
fn vertical_partner(src: &[Axis], dst: &Axis) -> Option<usize> {
    let wanted = match dst.kind {
        AxisKind::Pressure if dst.unit.quantity() == Quantity::Pressure => AxisKind::Altitude,
        AxisKind::Altitude if dst.unit.quantity() == Quantity::Length => AxisKind::Pressure,
        _ => return None,
    };
    src.iter().position(|a| {
        a.kind == wanted
            && match wanted {
                AxisKind::Altitude => a.unit.quantity() == Quantity::Length,
                _ => a.unit.quantity() == Quantity::Pressure,
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::projection::LambertConformal;
    use crate::domain::{LinearAxis, VerticalCoordinate};
    use ndarray::array;

    fn lon_lat() -> SampleDomain {
        SampleDomain::linear(
            vec![Axis::longitude(), Axis::latitude()],
            vec![LinearAxis::new(0.0, 10.0, 36), LinearAxis::new(-30.0, 10.0, 7)],
        )
        .unwrap()
    }

    fn lambert_domain() -> SampleDomain {
        SampleDomain::linear(
            vec![Axis::x(Unit::Kilometer), Axis::y(Unit::Kilometer), Axis::pressure()],
            vec![
                LinearAxis::new(-500.0, 100.0, 11),
                LinearAxis::new(-500.0, 100.0, 11),
                LinearAxis::new(1000.0, -250.0, 3),
            ],
        )
        .unwrap()
        .with_coord_system(CoordinateSystem::cartesian(
            CoordinateSystem::projection(MapProjection::LambertConformal(LambertConformal::new(
                40.0, -100.0, 40.0, 40.0,
            ))),
            VerticalCoordinate::StandardAtmosphere,
        ))
    }

    #[test]
    fn test_shape_predicates() {
        let d = lambert_domain();
        assert!(is_volume(&d));
        assert!(!is_slice(&d));
        assert!(is_navigated(&d));
        assert!(is_lat_lon_order(&d));
        assert!(!is_lat_lon_order(&lon_lat()));
    }

    #[test]
    fn test_navigation_unwraps_to_lambert() {
        match navigation(&lambert_domain()).unwrap() {
            MapProjection::LambertConformal(p) => assert_eq!(p.lat0, 40.0),
            other => panic!("unexpected projection {:?}", other),
        }
        match navigation(&lon_lat()).unwrap() {
            MapProjection::LatLon(b) => {
                assert!(!b.lat_first);
                assert_eq!(b.lon_max, 350.0);
            }
            other => panic!("unexpected projection {:?}", other),
        }
        let plain = SampleDomain::linear(
            vec![Axis::x(Unit::Meter), Axis::y(Unit::Meter)],
            vec![LinearAxis::new(0.0, 1.0, 2), LinearAxis::new(0.0, 1.0, 2)],
        )
        .unwrap();
        assert!(matches!(navigation(&plain), Err(EkmanError::NoNavigation { .. })));
    }

    #[test]
    fn test_normalize_longitude() {
        let d = lon_lat();
        assert_eq!(normalize_longitude(&d, -10.0), 350.0);
        assert_eq!(normalize_longitude(&d, 370.0), 10.0);
        assert_eq!(normalize_longitude(&d, 180.0), 180.0);
    }

    #[test]
    fn test_normalize_huge_longitude() {
        let d = lon_lat();
        assert_eq!(normalize_longitude(&d, 1.0e9), 280.0);
        assert_eq!(normalize_longitude(&d, -1.0e9), 80.0);
        for lon in [1.0e17, -1.0e17, f64::MAX] {
            let out = normalize_longitude(&d, lon);
            assert!(out > -10.0 && out <= 350.0, "{} -> {}", lon, out);
        }
        // the gap between 350 and 360 maps just below the low end
        assert_eq!(normalize_longitude(&d, 355.0), 355.0 - 360.0);
    }

    #[test]
    fn test_levels_round_trip() {
        let d = lambert_domain();
        let z = get_altitude(&d, 500.0).unwrap();
        assert!((get_level(&d, z).unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_convert_points_through_reference() {
        let lambert = lambert_domain();
        let lat_lon = SampleDomain::linear(
            vec![Axis::latitude(), Axis::longitude(), Axis::altitude()],
            vec![
                LinearAxis::new(40.0, 1.0, 2),
                LinearAxis::new(-100.0, 1.0, 2),
                LinearAxis::new(0.0, 1.0, 1),
            ],
        )
        .unwrap();
        let points = array![[40.0], [-100.0], [0.0]];
        let native = convert_points(&lat_lon, points.view(), &lambert).unwrap();
        assert!(native[[0, 0]].abs() < 1e-6);
        assert!(native[[1, 0]].abs() < 1e-6);
        assert!((native[[2, 0]] - 1013.25).abs() < 1e-6);
    }

    #[test]
    fn test_swap_lat_lon() {
        let d = Arc::new(lon_lat());
        let values: Vec<f32> = (0..d.len()).map(|e| e as f32).collect();
        let grid = FlatGrid::scalar(d.clone(), crate::field::Param::new("t", Unit::Kelvin), values)
            .unwrap();
        let swapped = swap_lat_lon(&grid.clone().into()).unwrap();
        let g = swapped.first_flat().unwrap();
        assert!(is_lat_lon_order(g.domain()));
        // sample (lat=-20, lon=30) is old index 3 + 36
        let e = g.domain().flat_index(&[1, 3]);
        assert_eq!(g.values()[[0, e]], 39.0);
    }
}
