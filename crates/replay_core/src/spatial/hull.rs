use serde::Serialize;

use crate::coordinates::Vec2;

use super::geometry::{contains_convex, cross, signed_area};

/// Convex hull boundary in counter-clockwise order without repeated or
/// collinear vertices. Fewer than three distinct inputs give a degenerate
/// boundary with zero area.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Hull {
    pub boundary: Vec<Vec2>,
    pub area: f64,
}

impl Hull {
    pub fn is_degenerate(&self) -> bool {
        self.boundary.len() < 3
    }

    pub fn contains(&self, p: Vec2) -> bool {
        match self.boundary.len() {
            0 => false,
            1 => (self.boundary[0] - p).norm() <= 1e-9,
            2 => {
                let (a, b) = (self.boundary[0], self.boundary[1]);
                let along = (p - a).dot(&(b - a)) / (b - a).norm_squared();
                cross(a, b, p).abs() <= 1e-9 * (b - a).norm().max(1.0) && (-1e-9..=1.0 + 1e-9).contains(&along)
            }
            _ => contains_convex(&self.boundary, p),
        }
    }
}

/// Andrew's monotone chain, O(n log n).
pub fn convex_hull(points: &[Vec2]) -> Hull {
    let mut pts: Vec<Vec2> = points.iter().copied().filter(|p| p.x.is_finite() && p.y.is_finite()).collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return Hull { boundary: pts, area: 0.0 };
    }

    let mut lower: Vec<Vec2> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Vec2> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);

    let area = signed_area(&lower).max(0.0);
    Hull { boundary: lower, area }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::geometry::is_simple;

    #[test]
    fn test_square_hull() {
        let pts = [
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(5.0, 5.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(5.0, 0.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.boundary.len(), 4);
        assert!((hull.area - 100.0).abs() < 1e-9);
        assert!(signed_area(&hull.boundary) > 0.0);
        assert!(is_simple(&hull.boundary));
        assert!(pts.iter().all(|&p| hull.contains(p)));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(convex_hull(&[]).boundary.is_empty());
        let line = convex_hull(&[Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)]);
        assert_eq!(line.boundary.len(), 2);
        assert_eq!(line.area, 0.0);
        assert!(line.contains(Vec2::new(1.0, 1.0)));
        let dup = convex_hull(&[Vec2::new(3.0, 3.0), Vec2::new(3.0, 3.0)]);
        assert_eq!(dup.boundary, vec![Vec2::new(3.0, 3.0)]);
    }
}
