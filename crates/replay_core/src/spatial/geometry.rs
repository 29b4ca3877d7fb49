//! Planar helpers shared by the hull, Voronoi and pitch-control code.

use crate::coordinates::Vec2;

/// Tolerance for on-edge tests, in metres.
pub const EPS: f64 = 1e-9;

/// Z component of `(a - o) x (b - o)`; positive when `o -> a -> b` turns left.
#[inline]
pub fn cross(o: Vec2, a: Vec2, b: Vec2) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Shoelace area, positive for counter-clockwise winding.
pub fn signed_area(polygon: &[Vec2]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[(i + 1) % polygon.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

pub fn centroid(points: &[Vec2]) -> Option<Vec2> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vec2::zeros(), |acc, p| acc + p);
    Some(sum / points.len() as f64)
}

/// Keep the part of a convex polygon where `normal . p <= offset`
/// (Sutherland-Hodgman against a single half-plane).
pub fn clip_half_plane(polygon: &[Vec2], normal: Vec2, offset: f64) -> Vec<Vec2> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, &cur) in polygon.iter().enumerate() {
        let next = polygon[(i + 1) % polygon.len()];
        let dc = normal.dot(&cur) - offset;
        let dn = normal.dot(&next) - offset;
        if dc <= 0.0 {
            out.push(cur);
        }
        if (dc < 0.0 && dn > 0.0) || (dc > 0.0 && dn < 0.0) {
            let s = dc / (dc - dn);
            out.push(cur + (next - cur) * s);
        }
    }
    if out.len() < 3 {
        out.clear();
    }
    out
}

/// Half-plane of points at least as close to `site` as to `other`, as
/// `(normal, offset)` for [`clip_half_plane`].
pub fn bisector(site: Vec2, other: Vec2) -> (Vec2, f64) {
    let normal = other - site;
    let offset = (other.norm_squared() - site.norm_squared()) / 2.0;
    (normal, offset)
}

/// Point-in-polygon for a counter-clockwise convex polygon; edges count as inside.
pub fn contains_convex(polygon: &[Vec2], p: Vec2) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    polygon.iter().enumerate().all(|(i, &a)| {
        let b = polygon[(i + 1) % polygon.len()];
        let scale = (b - a).norm().max(1.0);
        cross(a, b, p) >= -EPS * scale
    })
}

fn segments_cross(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    ((d1 > EPS && d2 < -EPS) || (d1 < -EPS && d2 > EPS)) && ((d3 > EPS && d4 < -EPS) || (d3 < -EPS && d4 > EPS))
}

/// No two non-adjacent edges cross.
pub fn is_simple(polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    if n < 4 {
        return true;
    }
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[(i + 1) % n]);
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (c, d) = (polygon[j], polygon[(j + 1) % n]);
            if segments_cross(a, b, c, d) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec2> {
        vec![Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(0.0, 2.0)]
    }

    #[test]
    fn test_signed_area_winding() {
        let mut sq = square();
        assert_eq!(signed_area(&sq), 4.0);
        sq.reverse();
        assert_eq!(signed_area(&sq), -4.0);
    }

    #[test]
    fn test_clip_half_plane() {
        // Keep x <= 1.
        let clipped = clip_half_plane(&square(), Vec2::new(1.0, 0.0), 1.0);
        assert!((signed_area(&clipped) - 2.0).abs() < 1e-12);
        assert!(clip_half_plane(&square(), Vec2::new(1.0, 0.0), -1.0).is_empty());
    }

    #[test]
    fn test_bisector_keeps_nearer_side() {
        let (n, c) = bisector(Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0));
        let cell = clip_half_plane(&square(), n, c);
        assert!(contains_convex(&cell, Vec2::new(0.5, 1.0)));
        assert!(!contains_convex(&cell, Vec2::new(1.5, 1.0)));
    }

    #[test]
    fn test_is_simple() {
        assert!(is_simple(&square()));
        let bow_tie = vec![Vec2::new(0.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(2.0, 0.0), Vec2::new(0.0, 2.0)];
        assert!(!is_simple(&bow_tie));
    }
}
