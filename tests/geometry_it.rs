//! Great-circle arc and footprint-polygon wraparound invariants (8, 9) against the public `geo`
//! and `instrument` APIs.

use aeodss_sim::geo::{great_circle_arc, LatLon, EARTH_RADIUS_KM};
use aeodss_sim::instrument::footprint_polygon;

/// Invariant 8: zero at the sub-point, `pi * R_earth` for antipodal points.
#[test]
fn invariant8_great_circle_arc_it() {
    let p = LatLon::new(12.0, -48.0);
    assert!(great_circle_arc(p, p, EARTH_RADIUS_KM).abs() < 1e-9);

    let a = LatLon::new(10.0, 20.0);
    let b = LatLon::new(-10.0, -160.0);
    let expect = std::f64::consts::PI * EARTH_RADIUS_KM;
    assert!((great_circle_arc(a, b, EARTH_RADIUS_KM) - expect).abs() < 1e-6);
}

/// Invariant 9: at longitude 179 degrees, the footprint polygon contains points near both map
/// edges (x near 0 and x near world width).
#[test]
fn invariant9_footprint_wraps_antimeridian_it() {
    let sub = LatLon::new(5.0, 179.0);
    let poly = footprint_polygon(sub, 400.0, 24, 3600.0, 1800.0);
    let has_low = poly.iter().any(|(x, _)| *x < 50.0);
    let has_high = poly.iter().any(|(x, _)| *x > 3550.0);
    assert!(has_low, "footprint missing a vertex near x=0: {poly:?}");
    assert!(has_high, "footprint missing a vertex near x=world_w: {poly:?}");
}

/// Invariant 9, pole case: a footprint that encloses the north pole closes through border
/// vertices on the map's top edge rather than leaving a gap.
#[test]
fn invariant9_footprint_near_pole_closes_through_border_it() {
    let sub = LatLon::new(89.5, 10.0);
    let poly = footprint_polygon(sub, 500.0, 16, 3600.0, 1800.0);
    assert_eq!(poly.first().copied(), Some((0.0, 0.0)));
    assert_eq!(poly.last().copied(), Some((3600.0, 0.0)));
}

#[test]
fn invariant9_footprint_near_south_pole_closes_through_bottom_border_it() {
    let sub = LatLon::new(-89.5, -30.0);
    let poly = footprint_polygon(sub, 500.0, 16, 3600.0, 1800.0);
    assert_eq!(poly.first().copied(), Some((0.0, 1800.0)));
    assert_eq!(poly.last().copied(), Some((3600.0, 1800.0)));
}
