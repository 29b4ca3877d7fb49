//! Cubic Hermite segments with Catmull-Rom knot tangents on a non-uniform grid.

use crate::coordinates::Vec2;

/// A known sample of one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Knot {
    pub frame: usize,
    pub t: f64,
    pub p: Vec2,
}

/// Tangent at `knot` from its connected neighbours.
///
/// Both neighbours give the non-uniform Catmull-Rom tangent; a single
/// neighbour gives the one-sided secant (clamped end); none gives zero.
pub fn knot_tangent(prev: Option<&Knot>, knot: &Knot, next: Option<&Knot>) -> Vec2 {
    match (prev, next) {
        (Some(a), Some(b)) => (b.p - a.p) / (b.t - a.t),
        (Some(a), None) => (knot.p - a.p) / (knot.t - a.t),
        (None, Some(b)) => (b.p - knot.p) / (b.t - knot.t),
        (None, None) => Vec2::zeros(),
    }
}

/// Position and velocity at time `t` on the Hermite segment `k0 -> k1` with
/// tangents `m0`, `m1` (in metres per second).
pub fn hermite(k0: &Knot, m0: Vec2, k1: &Knot, m1: Vec2, t: f64) -> (Vec2, Vec2) {
    let h = k1.t - k0.t;
    let s = (t - k0.t) / h;
    let s2 = s * s;
    let s3 = s2 * s;

    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    let position = k0.p * h00 + m0 * (h10 * h) + k1.p * h01 + m1 * (h11 * h);

    let d00 = 6.0 * s2 - 6.0 * s;
    let d10 = 3.0 * s2 - 4.0 * s + 1.0;
    let d01 = -6.0 * s2 + 6.0 * s;
    let d11 = 3.0 * s2 - 2.0 * s;
    let velocity = (k0.p * d00 + k1.p * d01) / h + m0 * d10 + m1 * d11;

    (position, velocity)
}
