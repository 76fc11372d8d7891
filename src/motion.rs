//! Kinematic motion model (§1 Non-goals, §4.9 step 1): a pure function of virtual time standing
//! in for a real SGP4 propagator. Orbital elements are resolved into a position by solving
//! Kepler's equation and rotating the perifocal frame by argument-of-periapsis, inclination, and
//! right-ascension-of-ascending-node — numerical fidelity against a real two-body/J2 propagator is
//! explicitly out of scope; `speed` drives the mean-anomaly rate directly rather than being derived
//! from a gravitational constant, keeping propagation a closed-form function of `t` alone.

use serde::{Deserialize, Serialize};

use crate::error::SystemError;
use crate::geo::{ecef_to_latlon, LatLon, Vec3, EARTH_RADIUS_KM};

/// Keplerian elements seeding one agent's kinematic stand-in orbit (§6 `agent.motion.*`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeplerianElements {
    pub altitude_km: f64,
    pub eccentricity: f64,
    pub inclination_deg: f64,
    pub argp_deg: f64,
    pub raan_deg: f64,
    pub init_mean_anomaly_deg: f64,
    /// Mean-anomaly rate, in radians per virtual-time unit.
    pub speed: f64,
}

impl Default for KeplerianElements {
    fn default() -> Self {
        KeplerianElements {
            altitude_km: 700.0,
            eccentricity: 0.0,
            inclination_deg: 97.4,
            argp_deg: 0.0,
            raan_deg: 0.0,
            init_mean_anomaly_deg: 0.0,
            speed: 0.001,
        }
    }
}

/// Solves Kepler's equation `M = E - e sin E` for the eccentric anomaly via Newton-Raphson.
fn solve_eccentric_anomaly(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut e = mean_anomaly;
    for _ in 0..50 {
        let f = e - eccentricity * e.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * e.cos();
        let step = f / f_prime;
        e -= step;
        if step.abs() < 1e-12 {
            break;
        }
    }
    e
}

/// A single agent's kinematic motion model: fixed orbital elements plus the last propagated
/// sample.
#[derive(Debug, Clone)]
pub struct MotionModel {
    elements: KeplerianElements,
    last_position: Option<Vec3>,
}

impl MotionModel {
    pub fn new(elements: KeplerianElements) -> Self {
        MotionModel {
            elements,
            last_position: None,
        }
    }

    pub fn elements(&self) -> &KeplerianElements {
        &self.elements
    }

    /// Position (Earth-fixed frame, consistent with [`crate::geo`]'s ground-cell frame) at
    /// virtual time `t`.
    pub fn position_at(&self, t: f64) -> Vec3 {
        let e = &self.elements;
        let semi_major = EARTH_RADIUS_KM + e.altitude_km;
        let mean_anomaly = e.init_mean_anomaly_deg.to_radians() + e.speed * t;
        let eccentric_anomaly = solve_eccentric_anomaly(mean_anomaly, e.eccentricity);

        let cos_e = eccentric_anomaly.cos();
        let sin_e = eccentric_anomaly.sin();
        let true_anomaly = 2.0
            * ((1.0 + e.eccentricity).sqrt() * (eccentric_anomaly / 2.0).sin())
                .atan2((1.0 - e.eccentricity).sqrt() * (eccentric_anomaly / 2.0).cos());
        let radius = semi_major * (1.0 - e.eccentricity * cos_e);

        let x_pf = radius * true_anomaly.cos();
        let y_pf = radius * true_anomaly.sin();

        let argp = e.argp_deg.to_radians();
        let inc = e.inclination_deg.to_radians();
        let raan = e.raan_deg.to_radians();

        // Standard 3-1-3 perifocal-to-Earth-fixed rotation: argp about z, inc about x, raan about z.
        let (cos_w, sin_w) = (argp.cos(), argp.sin());
        let (cos_i, sin_i) = (inc.cos(), inc.sin());
        let (cos_o, sin_o) = (raan.cos(), raan.sin());

        let x1 = cos_w * x_pf - sin_w * y_pf;
        let y1 = sin_w * x_pf + cos_w * y_pf;
        let z1 = 0.0;

        let x2 = x1;
        let y2 = cos_i * y1 - sin_i * z1;
        let z2 = sin_i * y1 + cos_i * z1;

        let x3 = cos_o * x2 - sin_o * y2;
        let y3 = sin_o * x2 + cos_o * y2;
        let z3 = z2;

        Vec3::new(x3, y3, z3)
    }

    pub fn latlon_at(&self, t: f64) -> LatLon {
        ecef_to_latlon(self.position_at(t))
    }

    /// Advances one step, returning the new position. Per §4.10 failure semantics a propagation
    /// failure (next position missing) is logged and the old position holds; this closed-form
    /// model never fails to produce a position, but the `Result` return keeps the call site
    /// (§4.9 `update_position`) uniform with a real propagator that could.
    pub fn step(&mut self, t: f64) -> Result<Vec3, SystemError> {
        let p = self.position_at(t);
        self.last_position = Some(p);
        Ok(p)
    }

    pub fn last_position(&self) -> Option<Vec3> {
        self.last_position
    }
}

/// Parses the initial orbital elements out of a two-line element set (`--parse-tle`, §6/§14). Only
/// line 2's angles and mean motion are read; the epoch on line 1 is ignored since this model has no
/// calendar semantics of its own. Altitude is derived from mean motion via Kepler's third law for a
/// circular orbit at that period, since TLEs do not carry altitude directly.
pub fn parse_tle(text: &str) -> Result<KeplerianElements, SystemError> {
    let line2 = text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('2'))
        .ok_or_else(|| SystemError::InvariantViolation("TLE has no line 2".to_string()))?;

    let field = |start: usize, end: usize| -> Result<f64, SystemError> {
        line2
            .get(start..end)
            .ok_or_else(|| SystemError::InvariantViolation(format!("TLE line 2 too short for field [{start}..{end})")))?
            .trim()
            .parse::<f64>()
            .map_err(|_| SystemError::InvariantViolation(format!("TLE line 2 field [{start}..{end}) is not numeric")))
    };

    let inclination_deg = field(8, 16)?;
    let raan_deg = field(17, 25)?;
    let eccentricity = format!("0.{}", line2.get(26..33).unwrap_or("0").trim())
        .parse::<f64>()
        .map_err(|_| SystemError::InvariantViolation("TLE line 2 eccentricity field is not numeric".to_string()))?;
    let argp_deg = field(34, 42)?;
    let mean_anomaly_deg = field(43, 51)?;
    let mean_motion_rev_per_day = field(52, 63)?;

    // mu for Earth in km^3/s^2; n in rad/s from mean_motion_rev_per_day.
    const MU_EARTH: f64 = 398_600.4418;
    let n = mean_motion_rev_per_day * 2.0 * std::f64::consts::PI / 86_400.0;
    let semi_major = (MU_EARTH / (n * n)).cbrt();
    let altitude_km = semi_major - EARTH_RADIUS_KM;

    Ok(KeplerianElements {
        altitude_km,
        eccentricity,
        inclination_deg,
        argp_deg,
        raan_deg,
        init_mean_anomaly_deg: mean_anomaly_deg,
        speed: n,
    })
}
