//! Nadir-pointing conical instrument model (§4.3): slant range, ground swath, footprint polygon
//! (with antimeridian/pole wraparound), and the visible-cell scan used by the environment model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::activity::CellCoord;
use crate::error::GeoError;
use crate::geo::{self, LatLon, Vec3, EARTH_RADIUS_KM};

/// A nadir-pointing conical sensor, parameterised by its half-cone aperture angle (radians).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Instrument {
    aperture: f64,
    /// Number of interpolated samples per segment used when scanning a moving footprint
    /// (`Config::interpos`, §4.3).
    interpos: usize,
}

impl Instrument {
    /// Builds an instrument, clamping `aperture` to the maximum usable aperture at `altitude_km`
    /// if it exceeds it (silent, per §4.3 — logged at `warn` rather than rejected).
    pub fn new(aperture: f64, altitude_km: f64, interpos: usize) -> Self {
        let max = geo::max_aperture(altitude_km, EARTH_RADIUS_KM);
        let clamped = if aperture > max {
            warn!(requested = aperture, max, altitude_km, "aperture clamped to horizon limit");
            max
        } else {
            aperture
        };
        Instrument {
            aperture: clamped,
            interpos,
        }
    }

    pub fn aperture(&self) -> f64 {
        self.aperture
    }

    pub fn interpos(&self) -> usize {
        self.interpos
    }
}

/// Earth central angle (radians) subtended between the sub-satellite point and the point on the
/// surface seen at off-nadir angle `eta` (radians), for a satellite at orbital radius `r = R + h`.
///
/// Solves the spherical triangle (Earth centre, sub-point, satellite) via the law of sines; `eta`
/// near zero returns zero directly to avoid a `0/0` in the general formula.
pub fn earth_central_angle(altitude_km: f64, eta: f64) -> Result<f64, GeoError> {
    if eta.abs() < 1e-9 {
        return Ok(0.0);
    }
    let r = EARTH_RADIUS_KM + altitude_km;
    let ratio = r * eta.sin() / EARTH_RADIUS_KM;
    if !(-1.0..=1.0).contains(&ratio) {
        return Err(GeoError::NanSlantRange {
            altitude: altitude_km,
            angle: eta,
        });
    }
    // Obtuse solution: the interior angle at the target point is > 90 deg for a sensor looking
    // down from orbit (elevation above the local horizon is positive).
    let angle_t = std::f64::consts::PI - ratio.asin();
    let lambda = std::f64::consts::PI - eta - angle_t;
    if lambda.is_nan() || lambda < 0.0 {
        return Err(GeoError::NanSlantRange {
            altitude: altitude_km,
            angle: eta,
        });
    }
    Ok(lambda)
}

/// Slant range (km) from the satellite to the point on the surface seen at off-nadir angle `eta`.
pub fn slant_range(altitude_km: f64, eta: f64) -> Result<f64, GeoError> {
    if eta.abs() < 1e-9 {
        return Ok(altitude_km);
    }
    let lambda = earth_central_angle(altitude_km, eta)?;
    let rho = EARTH_RADIUS_KM * lambda.sin() / eta.sin();
    if rho.is_nan() || rho <= 0.0 {
        return Err(GeoError::NanSlantRange {
            altitude: altitude_km,
            angle: eta,
        });
    }
    Ok(rho)
}

/// Ground swath radius (arc length, km) on the Earth sphere subtended by the instrument's full
/// aperture angle at the given altitude.
pub fn swath_arc(altitude_km: f64, aperture: f64) -> Result<f64, GeoError> {
    let lambda = earth_central_angle(altitude_km, aperture)?;
    Ok(lambda * EARTH_RADIUS_KM)
}

/// Destination point at angular distance `d` (radians) and bearing `theta` (radians, clockwise
/// from north) from `start`, on a sphere.
fn spherical_offset(start: LatLon, d: f64, theta: f64) -> LatLon {
    let lat1 = start.lat_deg.to_radians();
    let lon1 = start.lon_deg.to_radians();
    let lat2 = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * theta.cos()).clamp(-1.0, 1.0).asin();
    let lon2 = lon1 + (theta.sin() * d.sin() * lat1.cos()).atan2(d.cos() - lat1.sin() * lat2.sin());
    LatLon::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Samples `n` points around the footprint circle of arc radius `arc_km` centred at `sub`, then
/// projects them into `[0,world_w) x [0,world_h)` equirectangular pixel space, inserting vertices
/// at the map edges where the polygon crosses the antimeridian, and border vertices along the top
/// or bottom edge when the footprint encloses a pole.
pub fn footprint_polygon(sub: LatLon, arc_km: f64, n: usize, world_w: f64, world_h: f64) -> Vec<(f64, f64)> {
    let d = (arc_km / EARTH_RADIUS_KM).min(std::f64::consts::PI);
    let encloses_north_pole = sub.lat_deg + d.to_degrees() >= 90.0;
    let encloses_south_pole = sub.lat_deg - d.to_degrees() <= -90.0;

    let mut raw: Vec<LatLon> = Vec::with_capacity(n);
    for i in 0..n {
        let theta = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
        raw.push(spherical_offset(sub, d, theta));
    }

    let mut points: Vec<(f64, f64)> = raw.iter().map(|ll| geo::equirectangular(*ll, world_w, world_h)).collect();

    if encloses_north_pole || encloses_south_pole {
        let border_y = if encloses_north_pole { 0.0 } else { world_h };
        let mut closed = Vec::with_capacity(points.len() + 2);
        closed.push((0.0, border_y));
        closed.extend(points);
        closed.push((world_w, border_y));
        return closed;
    }

    let mut out: Vec<(f64, f64)> = Vec::with_capacity(points.len() + 4);
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        out.push((x0, y0));
        let (x1, y1) = points[(i + 1) % points.len()];
        if (x1 - x0).abs() > world_w / 2.0 {
            // Crossed the antimeridian: insert vertices at the two map edges at the
            // interpolated crossing latitude.
            let t = if x1 > x0 {
                (world_w - x0) / (x1 + world_w - x0)
            } else {
                x0 / (x0 + world_w - x1)
            };
            let y_cross = y0 + t * (y1 - y0);
            if x1 > x0 {
                out.push((0.0, y_cross));
                out.push((world_w, y_cross));
            } else {
                out.push((world_w, y_cross));
                out.push((0.0, y_cross));
            }
        }
    }
    points.clear();
    out
}

/// Expands a 4-quadrant scan from `start` over a rectangular grid, collecting every cell whose
/// precomputed ECEF position (via `cell_ecef`) is within `arc_km` great-circle arc of `sub_ecef`.
/// Each quadrant's row/column expansion stops once it finds no newly-in-range cell, matching the
/// "stop each quadrant row once no new cell is within range" contract in §4.3.
pub fn visible_cells_scan(
    start: CellCoord,
    sub: LatLon,
    arc_km: f64,
    bounds: (i32, i32),
    cell_latlon: impl Fn(CellCoord) -> Option<LatLon>,
) -> HashSet<CellCoord> {
    let mut visible = HashSet::new();
    let (w, h) = bounds;
    let quadrants: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

    for (dx, dy) in quadrants {
        let mut row = 0;
        loop {
            let mut any_in_row = false;
            let mut col = 0;
            loop {
                let cx = start.0 + dx * col;
                let cy = start.1 + dy * row;
                if cx < 0 || cy < 0 || cx >= w || cy >= h {
                    break;
                }
                let Some(ll) = cell_latlon((cx, cy)) else { break };
                let arc = geo::great_circle_arc(sub, ll, EARTH_RADIUS_KM);
                if arc <= arc_km {
                    visible.insert((cx, cy));
                    any_in_row = true;
                    col += 1;
                } else if col == 0 {
                    // Column 0 out of range too: no point continuing to widen this row.
                    break;
                } else {
                    break;
                }
            }
            if !any_in_row {
                break;
            }
            row += 1;
        }
    }
    visible
}

/// Union of visible-cell sets sampled at `interpos` interpolated positions along the segment from
/// `(p0,t0)` to `(p1,t1)`, per §4.3.
pub fn visible_cells_for_segment(
    start: CellCoord,
    sub0: LatLon,
    sub1: LatLon,
    arc_km: f64,
    bounds: (i32, i32),
    interpos: usize,
    cell_latlon: impl Fn(CellCoord) -> Option<LatLon> + Copy,
) -> HashSet<CellCoord> {
    let mut union = HashSet::new();
    let n = interpos.max(1);
    for i in 0..=n {
        let frac = i as f64 / n as f64;
        let lat = sub0.lat_deg + (sub1.lat_deg - sub0.lat_deg) * frac;
        let lon = sub0.lon_deg + (sub1.lon_deg - sub0.lon_deg) * frac;
        let sub = LatLon::new(lat, lon);
        union.extend(visible_cells_scan(start, sub, arc_km, bounds, cell_latlon));
    }
    union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nadir_slant_range_equals_altitude() {
        assert_eq!(slant_range(500.0, 0.0).unwrap(), 500.0);
    }

    #[test]
    fn aperture_clamped_when_exceeding_horizon() {
        let huge = std::f64::consts::PI / 2.0;
        let inst = Instrument::new(huge, 500.0, 4);
        assert!(inst.aperture() < huge);
    }

    #[test]
    fn footprint_at_equator_has_no_pole_wrap() {
        let sub = LatLon::new(0.0, 0.0);
        let poly = footprint_polygon(sub, 200.0, 16, 3600.0, 1800.0);
        assert!(poly.len() >= 16);
    }

    #[test]
    fn footprint_wraps_antimeridian() {
        let sub = LatLon::new(0.0, 179.5);
        let poly = footprint_polygon(sub, 300.0, 16, 3600.0, 1800.0);
        let has_low = poly.iter().any(|(x, _)| *x < 50.0);
        let has_high = poly.iter().any(|(x, _)| *x > 3550.0);
        assert!(has_low && has_high);
    }

    #[test]
    fn visible_cells_includes_subpoint_cell() {
        let bounds = (100, 100);
        let cell_latlon = |c: CellCoord| -> Option<LatLon> {
            if c.0 < 0 || c.1 < 0 || c.0 >= bounds.0 || c.1 >= bounds.1 {
                return None;
            }
            let (x, y) = geo::equirectangular(LatLon::new(0.0, 0.0), 100.0, 100.0);
            let dx = c.0 as f64 - x;
            let dy = c.1 as f64 - y;
            Some(LatLon::new(-dy * 1.8, dx * 3.6))
        };
        let visible = visible_cells_scan((50, 50), LatLon::new(0.0, 0.0), 500.0, bounds, cell_latlon);
        assert!(visible.contains(&(50, 50)));
    }
}
