//! Geodesy primitives shared by the instrument model (§4.3), environment model (§4.5), and link
//! range checks (§4.7): a minimal 3D vector type, ECEF/lat-lon conversions, great-circle arc
//! length, and equirectangular projection with antimeridian/pole wraparound handling.

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Mean equatorial Earth radius, in kilometres. Matches `R_earth` in the source's `MathUtils`.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A plain 3D vector. Used for ECI/ECEF positions; no relation to any linear-algebra crate is
/// needed here, the operations used by this simulator are a handful of dot/cross/normalize calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(*self).sqrt()
    }

    pub fn sub(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, f: f64) -> Vec3 {
        Vec3::new(self.x * f, self.y * f, self.z * f)
    }

    /// Unit vector, or a [`GeoError::DegenerateBasis`] if this vector is (numerically) zero.
    pub fn normalized(&self, at: LatLon) -> Result<Vec3, GeoError> {
        let n = self.norm();
        if n < 1e-9 {
            return Err(GeoError::DegenerateBasis {
                lon: at.lon_deg,
                lat: at.lat_deg,
            });
        }
        Ok(self.scale(1.0 / n))
    }
}

/// Geodetic latitude/longitude, in degrees. Longitude is normalised to (-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl LatLon {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        LatLon {
            lat_deg,
            lon_deg: normalize_lon(lon_deg),
        }
    }
}

fn normalize_lon(lon: f64) -> f64 {
    let mut l = lon % 360.0;
    if l <= -180.0 {
        l += 360.0;
    } else if l > 180.0 {
        l -= 360.0;
    }
    l
}

/// Converts an ECEF position (spherical Earth, radius `EARTH_RADIUS_KM`) to lat/lon.
pub fn ecef_to_latlon(p: Vec3) -> LatLon {
    let r = p.norm().max(1e-9);
    let lat = (p.z / r).asin().to_degrees();
    let lon = p.y.atan2(p.x).to_degrees();
    LatLon::new(lat, lon)
}

/// Converts a lat/lon on a sphere of the given radius to an ECEF position.
pub fn latlon_to_ecef(ll: LatLon, radius: f64) -> Vec3 {
    let lat = ll.lat_deg.to_radians();
    let lon = ll.lon_deg.to_radians();
    Vec3::new(
        radius * lat.cos() * lon.cos(),
        radius * lat.cos() * lon.sin(),
        radius * lat.sin(),
    )
}

/// Great-circle arc length between two points on a sphere of the given radius, via the
/// haversine formula. Zero for coincident points; `pi * radius` for antipodal points.
pub fn great_circle_arc(a: LatLon, b: LatLon, radius: f64) -> f64 {
    let lat1 = a.lat_deg.to_radians();
    let lat2 = b.lat_deg.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon_deg - a.lon_deg).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().clamp(-1.0, 1.0).asin();
    radius * c
}

/// Equirectangular projection of a lat/lon into `[0, world_w) x [0, world_h)` pixel/model space.
/// Longitude -180..=180 maps to x in 0..world_w; latitude 90..=-90 maps to y in 0..world_h.
pub fn equirectangular(ll: LatLon, world_w: f64, world_h: f64) -> (f64, f64) {
    let x = (ll.lon_deg + 180.0) / 360.0 * world_w;
    let y = (90.0 - ll.lat_deg) / 180.0 * world_h;
    (x, y)
}

/// Does the straight segment between two ECEF points pass through (or under) the Earth sphere of
/// radius `EARTH_RADIUS_KM`? Used for link line-of-sight checks (§4.7).
///
/// Finds the closest approach of the segment to the origin and compares it to the radius; a
/// segment both of whose endpoints are above the horizon can still dip below it in between.
pub fn segment_intersects_earth(a: Vec3, b: Vec3, radius: f64) -> bool {
    let d = b.sub(a);
    let len2 = d.dot(d);
    if len2 < 1e-12 {
        return a.norm() < radius;
    }
    // Parametrize the segment as a + t*d, t in [0,1]; minimise |a + t*d|^2.
    let t = -(a.dot(d)) / len2;
    let t = t.clamp(0.0, 1.0);
    let closest = a.add(d.scale(t));
    closest.norm() < radius
}

/// Maximum usable aperture angle (radians) for a sensor at altitude `h` above a sphere of the
/// given radius: alpha_max = 2*asin(R / (R+h)). Values above this are silently clamped by callers.
pub fn max_aperture(altitude_km: f64, radius: f64) -> f64 {
    let ratio = (radius / (radius + altitude_km)).clamp(-1.0, 1.0);
    2.0 * ratio.asin()
}
