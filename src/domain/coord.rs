//! Coordinate systems: unit-aware transforms between a domain's native
//! coordinates and the reference space (latitude, longitude, altitude).

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::locate::{stencil, SamplingMode};
use super::projection::{MapProjection, RadarProjection, PROJECTION_EARTH_RADIUS};
use super::vertical::VerticalCoordinate;
use super::{Axis, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::units::Unit;

/// Effective earth radius factor for beam propagation
const FOUR_THIRDS: f64 = 4.0 / 3.0;

/// Geometry of a volume-scanning radar: native coordinates are
/// (azimuth degrees, range metres, elevation degrees)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarGeometry {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Antenna altitude above sea level (m)
    pub station_altitude: f64,
}

impl RadarGeometry {
    fn horizontal(&self) -> RadarProjection {
        RadarProjection::new(self.center_lat, self.center_lon)
    }

    /// (azimuth, slant range, elevation) to (lat, lon, altitude)
    pub fn to_lat_lon_alt(&self, azimuth: f64, range: f64, elevation: f64) -> (f64, f64, f64) {
        let a = FOUR_THIRDS * PROJECTION_EARTH_RADIUS;
        let el = elevation.to_radians();
        let h = (range * range + a * a + 2.0 * range * a * el.sin()).sqrt() - a;
        let ground = a * (range * el.cos() / (a + h)).asin();
        let (lat, lon) = self.horizontal().xy_to_lat_lon(azimuth, ground);
        (lat, lon, h + self.station_altitude)
    }

    /// (lat, lon, altitude) to (azimuth, slant range, elevation)
    pub fn from_lat_lon_alt(&self, lat: f64, lon: f64, alt: f64) -> (f64, f64, f64) {
        let a = FOUR_THIRDS * PROJECTION_EARTH_RADIUS;
        let (azimuth, ground) = self.horizontal().lat_lon_to_xy(lat, lon);
        let h = alt - self.station_altitude;
        let theta = ground / a;
        let r2 = a * a + (a + h) * (a + h) - 2.0 * a * (a + h) * theta.cos();
        let range = r2.max(0.0).sqrt();
        let elevation = if range > 0.0 {
            (((a + h) * theta.cos() - a) / range).clamp(-1.0, 1.0).asin().to_degrees()
        } else {
            0.0
        };
        (azimuth, range, elevation)
    }
}

/// Bidirectional transform between native and reference coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinateSystem {
    /// Native coordinates are already reference coordinates
    Identity,
    /// A 2D horizontal projection; extra native coordinates pass through
    Projection { projection: MapProjection },
    /// Horizontal transform composed with an independent vertical one
    CartesianProduct {
        horizontal: Box<CoordinateSystem>,
        vertical: VerticalCoordinate,
    },
    /// Pairing of a native domain with its precomputed reference coordinates
    Empirical {
        native: Arc<SampleDomain>,
        reference: Arc<SampleDomain>,
    },
    /// Volume radar (azimuth, range, elevation)
    Radar3D { geometry: RadarGeometry },
    /// Wrapper marking a coordinate system shared through a cache
    Caching { inner: Box<CoordinateSystem> },
}

/// Result of unwrapping a coordinate system by one level
#[derive(Debug)]
pub enum Unwrapped<'a> {
    /// A genuinely 2D transform was reached
    Projection(MapProjection),
    /// Keep unwrapping this coordinate system
    Inner(&'a CoordinateSystem),
    /// Keep unwrapping with this domain's coordinate system
    Reference(&'a SampleDomain),
    /// Nothing left to unwrap
    Identity,
}

impl CoordinateSystem {
    pub fn projection(projection: MapProjection) -> Self {
        CoordinateSystem::Projection { projection }
    }

    pub fn cartesian(horizontal: CoordinateSystem, vertical: VerticalCoordinate) -> Self {
        CoordinateSystem::CartesianProduct {
            horizontal: Box::new(horizontal),
            vertical,
        }
    }

    pub fn empirical(native: Arc<SampleDomain>, reference: Arc<SampleDomain>) -> Result<Self> {
        if native.lengths() != reference.lengths() {
            return Err(EkmanError::incompatible(
                "empirical_coordinate_system",
                format!(
                    "native ({}) and reference ({}) shapes differ",
                    native.describe(),
                    reference.describe()
                ),
            ));
        }
        Ok(CoordinateSystem::Empirical { native, reference })
    }

    pub fn caching(inner: CoordinateSystem) -> Self {
        CoordinateSystem::Caching {
            inner: Box::new(inner),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordinateSystem::Identity => "identity",
            CoordinateSystem::Projection { projection } => projection.name(),
            CoordinateSystem::CartesianProduct { .. } => "cartesian_product",
            CoordinateSystem::Empirical { .. } => "empirical",
            CoordinateSystem::Radar3D { .. } => "radar_3d",
            CoordinateSystem::Caching { .. } => "caching",
        }
    }

    /// Peel one layer off the coordinate system
    pub fn unwrap_one_level(&self) -> Unwrapped<'_> {
        match self {
            CoordinateSystem::Identity => Unwrapped::Identity,
            CoordinateSystem::Projection { projection } => Unwrapped::Projection(projection.clone()),
            CoordinateSystem::CartesianProduct { horizontal, .. } => Unwrapped::Inner(horizontal),
            CoordinateSystem::Empirical { reference, .. } => Unwrapped::Reference(reference),
            CoordinateSystem::Radar3D { geometry } => Unwrapped::Projection(MapProjection::Radar(
                RadarProjection::new(geometry.center_lat, geometry.center_lon),
            )),
            CoordinateSystem::Caching { inner } => Unwrapped::Inner(inner),
        }
    }

    /// Axes of the reference space for a domain with the given native axes
    pub fn reference_axes(&self, native: &[Axis]) -> Result<Vec<Axis>> {
        match self {
            CoordinateSystem::Identity => Ok(native.to_vec()),
            CoordinateSystem::Caching { inner } => inner.reference_axes(native),
            CoordinateSystem::Projection { .. } => {
                require_dimension(self, native, 2)?;
                let mut axes = vec![Axis::latitude(), Axis::longitude()];
                axes.extend(native[2..].iter().cloned());
                Ok(axes)
            }
            CoordinateSystem::CartesianProduct {
                horizontal,
                vertical,
            } => {
                require_dimension(self, native, 3)?;
                let mut axes = horizontal.reference_axes(&native[..2])?;
                axes.push(match vertical {
                    VerticalCoordinate::Identity => native[2].clone(),
                    VerticalCoordinate::StandardAtmosphere => Axis::altitude(),
                });
                Ok(axes)
            }
            CoordinateSystem::Empirical { reference, .. } => Ok(reference.axes().to_vec()),
            CoordinateSystem::Radar3D { .. } => {
                require_dimension(self, native, 3)?;
                Ok(vec![Axis::latitude(), Axis::longitude(), Axis::altitude()])
            }
        }
    }

    /// Native points (one row per native axis) to reference points
    pub fn to_reference(&self, native: &[Axis], points: ArrayView2<f64>) -> Result<Array2<f64>> {
        match self {
            CoordinateSystem::Identity => Ok(points.to_owned()),
            CoordinateSystem::Caching { inner } => inner.to_reference(native, points),
            CoordinateSystem::Projection { projection } => {
                require_dimension(self, native, 2)?;
                let [ux, uy] = projection.native_units();
                let mut out = points.to_owned();
                for p in 0..points.ncols() {
                    let x = native[0].unit.convert(points[[0, p]], &ux)?;
                    let y = native[1].unit.convert(points[[1, p]], &uy)?;
                    let (lat, lon) = projection.to_lat_lon(x, y);
                    out[[0, p]] = lat;
                    out[[1, p]] = lon;
                }
                Ok(out)
            }
            CoordinateSystem::CartesianProduct {
                horizontal,
                vertical,
            } => {
                require_dimension(self, native, 3)?;
                let horiz = horizontal.to_reference(&native[..2], points.slice(s![..2, ..]))?;
                let mut out = Array2::<f64>::zeros((3, points.ncols()));
                out.slice_mut(s![..2, ..]).assign(&horiz.slice(s![..2, ..]));
                for p in 0..points.ncols() {
                    out[[2, p]] = vertical.to_reference(points[[2, p]], &native[2].unit)?.0;
                }
                Ok(out)
            }
            CoordinateSystem::Empirical {
                native: native_domain,
                reference,
            } => interpolate_between(native_domain, reference, points),
            CoordinateSystem::Radar3D { geometry } => {
                require_dimension(self, native, 3)?;
                let mut out = Array2::<f64>::zeros((3, points.ncols()));
                for p in 0..points.ncols() {
                    let az = native[0].unit.convert(points[[0, p]], &Unit::Degree)?;
                    let range = native[1].unit.convert(points[[1, p]], &Unit::Meter)?;
                    let el = native[2].unit.convert(points[[2, p]], &Unit::Degree)?;
                    let (lat, lon, alt) = geometry.to_lat_lon_alt(az, range, el);
                    out[[0, p]] = lat;
                    out[[1, p]] = lon;
                    out[[2, p]] = alt;
                }
                Ok(out)
            }
        }
    }

    /// Reference points (one row per reference axis) back to native points
    pub fn from_reference(&self, native: &[Axis], points: ArrayView2<f64>) -> Result<Array2<f64>> {
        match self {
            CoordinateSystem::Identity => Ok(points.to_owned()),
            CoordinateSystem::Caching { inner } => inner.from_reference(native, points),
            CoordinateSystem::Projection { projection } => {
                require_dimension(self, native, 2)?;
                let [ux, uy] = projection.native_units();
                let mut out = points.to_owned();
                for p in 0..points.ncols() {
                    let (x, y) = projection.from_lat_lon(points[[0, p]], points[[1, p]]);
                    out[[0, p]] = ux.convert(x, &native[0].unit)?;
                    out[[1, p]] = uy.convert(y, &native[1].unit)?;
                }
                Ok(out)
            }
            CoordinateSystem::CartesianProduct {
                horizontal,
                vertical,
            } => {
                require_dimension(self, native, 3)?;
                let ref_axes = self.reference_axes(native)?;
                let horiz = horizontal.from_reference(&native[..2], points.slice(s![..2, ..]))?;
                let mut out = Array2::<f64>::zeros((3, points.ncols()));
                out.slice_mut(s![..2, ..]).assign(&horiz.slice(s![..2, ..]));
                for p in 0..points.ncols() {
                    out[[2, p]] =
                        vertical.from_reference(points[[2, p]], &ref_axes[2].unit, &native[2].unit)?;
                }
                Ok(out)
            }
            CoordinateSystem::Empirical {
                native: native_domain,
                reference,
            } => interpolate_between(reference, native_domain, points),
            CoordinateSystem::Radar3D { geometry } => {
                require_dimension(self, native, 3)?;
                let mut out = Array2::<f64>::zeros((3, points.ncols()));
                for p in 0..points.ncols() {
                    let (az, range, el) =
                        geometry.from_lat_lon_alt(points[[0, p]], points[[1, p]], points[[2, p]]);
                    out[[0, p]] = Unit::Degree.convert(az, &native[0].unit)?;
                    out[[1, p]] = Unit::Meter.convert(range, &native[1].unit)?;
                    out[[2, p]] = Unit::Degree.convert(el, &native[2].unit)?;
                }
                Ok(out)
            }
        }
    }

    /// Whether the outermost horizontal transform is a true map projection
    /// (anything other than plain latitude/longitude)
    pub fn is_projecting(&self) -> bool {
        let mut current = self;
        loop {
            match current.unwrap_one_level() {
                Unwrapped::Projection(MapProjection::LatLon(_)) => return false,
                Unwrapped::Projection(_) => return true,
                Unwrapped::Inner(inner) => current = inner,
                Unwrapped::Reference(domain) => match domain.coord_system() {
                    Some(cs) => current = cs,
                    None => return false,
                },
                Unwrapped::Identity => return false,
            }
        }
    }
}

fn require_dimension(cs: &CoordinateSystem, native: &[Axis], min: usize) -> Result<()> {
    if native.len() < min {
        return Err(EkmanError::manifold(
            cs.name(),
            format!("needs at least {} native axes, got {}", min, native.len()),
        ));
    }
    Ok(())
}

/// Locate `points` in `from` and blend the matching samples of `to`
fn interpolate_between(
    from: &SampleDomain,
    to: &SampleDomain,
    points: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    if from.lengths() != to.lengths() {
        return Err(EkmanError::incompatible(
            "empirical_coordinate_system",
            format!("{} vs {}", from.describe(), to.describe()),
        ));
    }
    let frac = from.fractional_indices(points);
    let target = to.samples();
    let dim = to.dimension();
    let mut out = Array2::<f64>::from_elem((dim, points.ncols()), f64::NAN);
    let mut st = Vec::new();
    let mut f = vec![0.0; frac.nrows()];
    for p in 0..points.ncols() {
        for (m, v) in f.iter_mut().enumerate() {
            *v = frac[[m, p]];
        }
        if !stencil(from.lengths(), &f, SamplingMode::WeightedAverage, &mut st) {
            continue;
        }
        for c in 0..dim {
            let mut sum = 0.0;
            let mut wsum = 0.0;
            for &(e, w) in &st {
                let v = target[[c, e]];
                if v.is_finite() {
                    sum += w * v;
                    wsum += w;
                }
            }
            if wsum > 0.0 {
                out[[c, p]] = sum / wsum;
            }
        }
    }
    Ok(out)
}
