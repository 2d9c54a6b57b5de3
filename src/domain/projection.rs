//! 2D map projections between native horizontal coordinates and latitude/longitude.
//!
//! All projected coordinates are in metres relative to the projection origin;
//! angles going in and out are degrees. The formulas are the spherical forms
//! from Snyder, "Map Projections: A Working Manual".

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::units::Unit;

/// Mean Earth radius used by the spherical projections (metres)
pub const PROJECTION_EARTH_RADIUS: f64 = 6_371_229.0;

const DEG: f64 = PI / 180.0;

/// A genuinely 2D horizontal transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapProjection {
    LatLon(LatLonBounds),
    LambertConformal(LambertConformal),
    Mercator(Mercator),
    PolarStereographic(PolarStereographic),
    Radar(RadarProjection),
}

impl MapProjection {
    /// Native (x, y) to (lat, lon) in degrees
    pub fn to_lat_lon(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            MapProjection::LatLon(b) => {
                if b.lat_first {
                    (x, y)
                } else {
                    (y, x)
                }
            }
            MapProjection::LambertConformal(p) => p.xy_to_lat_lon(x, y),
            MapProjection::Mercator(p) => p.xy_to_lat_lon(x, y),
            MapProjection::PolarStereographic(p) => p.xy_to_lat_lon(x, y),
            MapProjection::Radar(p) => p.xy_to_lat_lon(x, y),
        }
    }

    /// (lat, lon) in degrees to native (x, y)
    pub fn from_lat_lon(&self, lat: f64, lon: f64) -> (f64, f64) {
        match self {
            MapProjection::LatLon(b) => {
                if b.lat_first {
                    (lat, lon)
                } else {
                    (lon, lat)
                }
            }
            MapProjection::LambertConformal(p) => p.lat_lon_to_xy(lat, lon),
            MapProjection::Mercator(p) => p.lat_lon_to_xy(lat, lon),
            MapProjection::PolarStereographic(p) => p.lat_lon_to_xy(lat, lon),
            MapProjection::Radar(p) => p.lat_lon_to_xy(lat, lon),
        }
    }

    /// Units the native coordinates are expressed in
    pub fn native_units(&self) -> [Unit; 2] {
        match self {
            MapProjection::LatLon(_) => [Unit::Degree, Unit::Degree],
            MapProjection::Radar(_) => [Unit::Degree, Unit::Meter],
            _ => [Unit::Meter, Unit::Meter],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MapProjection::LatLon(_) => "lat_lon",
            MapProjection::LambertConformal(_) => "lambert_conformal",
            MapProjection::Mercator(_) => "mercator",
            MapProjection::PolarStereographic(_) => "polar_stereographic",
            MapProjection::Radar(_) => "radar",
        }
    }
}

/// Trivial projection for domains that are already latitude/longitude
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLonBounds {
    /// Whether the native order is (lat, lon)
    pub lat_first: bool,
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

/// Spherical Lambert Conformal Conic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambertConformal {
    /// Latitude of the origin (degrees)
    pub lat0: f64,
    /// Central meridian (degrees)
    pub lon0: f64,
    /// First standard parallel (degrees)
    pub latin1: f64,
    /// Second standard parallel (degrees), equal to latin1 for a tangent cone
    pub latin2: f64,
    pub earth_radius: f64,
}

impl LambertConformal {
    pub fn new(lat0: f64, lon0: f64, latin1: f64, latin2: f64) -> Self {
        Self {
            lat0,
            lon0,
            latin1,
            latin2,
            earth_radius: PROJECTION_EARTH_RADIUS,
        }
    }

    /// Cone constant, F constant and rho at the origin
    fn constants(&self) -> (f64, f64, f64) {
        let phi1 = self.latin1 * DEG;
        let phi2 = self.latin2 * DEG;
        let n = if (phi1 - phi2).abs() < 1e-10 {
            phi1.sin()
        } else {
            (phi1.cos() / phi2.cos()).ln()
                / ((FRAC_PI_4 + phi2 / 2.0).tan() / (FRAC_PI_4 + phi1 / 2.0).tan()).ln()
        };
        let f = phi1.cos() * (FRAC_PI_4 + phi1 / 2.0).tan().powf(n) / n;
        let rho0 = self.rho(self.lat0 * DEG, n, f);
        (n, f, rho0)
    }

    fn rho(&self, phi: f64, n: f64, f: f64) -> f64 {
        self.earth_radius * f / (FRAC_PI_4 + phi / 2.0).tan().powf(n)
    }

    pub fn lat_lon_to_xy(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (n, f, rho0) = self.constants();
        let rho = self.rho(lat * DEG, n, f);
        let theta = n * wrap_radians((lon - self.lon0) * DEG);
        (rho * theta.sin(), rho0 - rho * theta.cos())
    }

    pub fn xy_to_lat_lon(&self, x: f64, y: f64) -> (f64, f64) {
        let (n, f, rho0) = self.constants();
        let sign = n.signum();
        let dy = rho0 - y;
        let rho = sign * (x * x + dy * dy).sqrt();
        let theta = (sign * x).atan2(sign * dy);
        let lat = if rho == 0.0 {
            sign * FRAC_PI_2
        } else {
            2.0 * (self.earth_radius * f / rho).powf(1.0 / n).atan() - FRAC_PI_2
        };
        let lon = self.lon0 * DEG + theta / n;
        (lat / DEG, lon / DEG)
    }
}

/// Spherical Mercator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mercator {
    /// Latitude of true scale (degrees)
    pub lat_ts: f64,
    /// Central meridian (degrees)
    pub lon0: f64,
    pub earth_radius: f64,
}

impl Mercator {
    pub fn new(lat_ts: f64, lon0: f64) -> Self {
        Self {
            lat_ts,
            lon0,
            earth_radius: PROJECTION_EARTH_RADIUS,
        }
    }

    fn scaled_radius(&self) -> f64 {
        self.earth_radius * (self.lat_ts * DEG).cos()
    }

    pub fn lat_lon_to_xy(&self, lat: f64, lon: f64) -> (f64, f64) {
        let r = self.scaled_radius();
        let x = r * wrap_radians((lon - self.lon0) * DEG);
        let y = r * (FRAC_PI_4 + lat * DEG / 2.0).tan().ln();
        (x, y)
    }

    pub fn xy_to_lat_lon(&self, x: f64, y: f64) -> (f64, f64) {
        let r = self.scaled_radius();
        let lat = 2.0 * (y / r).exp().atan() - FRAC_PI_2;
        let lon = self.lon0 * DEG + x / r;
        (lat / DEG, lon / DEG)
    }
}

/// Spherical polar stereographic, north or south polar aspect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarStereographic {
    /// Latitude of true scale (degrees)
    pub lat_ts: f64,
    /// Meridian pointing straight down from the pole (degrees)
    pub lon0: f64,
    pub north: bool,
    pub earth_radius: f64,
}

impl PolarStereographic {
    pub fn new(lat_ts: f64, lon0: f64, north: bool) -> Self {
        Self {
            lat_ts,
            lon0,
            north,
            earth_radius: PROJECTION_EARTH_RADIUS,
        }
    }

    fn k0(&self) -> f64 {
        (1.0 + (self.lat_ts.abs() * DEG).sin()) / 2.0
    }

    pub fn lat_lon_to_xy(&self, lat: f64, lon: f64) -> (f64, f64) {
        let two_rk = 2.0 * self.earth_radius * self.k0();
        let dlon = (lon - self.lon0) * DEG;
        if self.north {
            let rho = two_rk * (FRAC_PI_4 - lat * DEG / 2.0).tan();
            (rho * dlon.sin(), -rho * dlon.cos())
        } else {
            let rho = two_rk * (FRAC_PI_4 + lat * DEG / 2.0).tan();
            (rho * dlon.sin(), rho * dlon.cos())
        }
    }

    pub fn xy_to_lat_lon(&self, x: f64, y: f64) -> (f64, f64) {
        let two_rk = 2.0 * self.earth_radius * self.k0();
        let rho = (x * x + y * y).sqrt();
        let c = FRAC_PI_2 - 2.0 * (rho / two_rk).atan();
        if self.north {
            (c / DEG, self.lon0 + x.atan2(-y) / DEG)
        } else {
            (-c / DEG, self.lon0 + x.atan2(y) / DEG)
        }
    }
}

/// Flat-earth (azimuth, range) projection about a radar station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarProjection {
    pub center_lat: f64,
    pub center_lon: f64,
    pub earth_radius: f64,
}

impl RadarProjection {
    pub fn new(center_lat: f64, center_lon: f64) -> Self {
        Self {
            center_lat,
            center_lon,
            earth_radius: PROJECTION_EARTH_RADIUS,
        }
    }

    /// (azimuth degrees clockwise from north, range metres) to (lat, lon)
    pub fn xy_to_lat_lon(&self, azimuth: f64, range: f64) -> (f64, f64) {
        let az = azimuth * DEG;
        let north = range * az.cos();
        let east = range * az.sin();
        let lat = self.center_lat + north / self.earth_radius / DEG;
        let coslat = (self.center_lat * DEG).cos().max(1e-6);
        let lon = self.center_lon + east / (self.earth_radius * coslat) / DEG;
        (lat, lon)
    }

    pub fn lat_lon_to_xy(&self, lat: f64, lon: f64) -> (f64, f64) {
        let coslat = (self.center_lat * DEG).cos().max(1e-6);
        let north = (lat - self.center_lat) * DEG * self.earth_radius;
        let east = wrap_radians((lon - self.center_lon) * DEG) * self.earth_radius * coslat;
        let mut azimuth = east.atan2(north) / DEG;
        if azimuth < 0.0 {
            azimuth += 360.0;
        }
        (azimuth, (north * north + east * east).sqrt())
    }
}

fn wrap_radians(mut a: f64) -> f64 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}
