//! Voronoi cells by half-plane clipping and the Delaunay graph read off
//! their shared edges. With ~23 sites the O(n^2) construction is cheaper
//! than a sweep and exact enough for analysis.

use serde::Serialize;

use crate::coordinates::{Rect, Vec2};
use crate::store::{EntityId, Team};

use super::geometry::{bisector, clip_half_plane, contains_convex, signed_area};

/// One positioned entity of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Site {
    pub entity: EntityId,
    /// `None` for the ball.
    pub team: Option<Team>,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoronoiCell {
    pub entity: EntityId,
    pub team: Option<Team>,
    pub site: Vec2,
    /// Counter-clockwise; empty when the site shares its position with a
    /// lower entity id.
    pub polygon: Vec<Vec2>,
    pub area: f64,
}

impl VoronoiCell {
    pub fn contains(&self, p: Vec2) -> bool {
        contains_convex(&self.polygon, p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelaunayEdge {
    pub a: EntityId,
    pub b: EntityId,
    pub length: f64,
    /// Both ends belong to the same team (a passing-lane candidate).
    pub same_team: bool,
}

/// Cells of every site clipped to `bounds`. Output order follows `sites`.
pub fn voronoi(sites: &[Site], bounds: Rect) -> Vec<VoronoiCell> {
    sites
        .iter()
        .map(|site| {
            let mut polygon = bounds.corners().to_vec();
            for other in sites {
                if other.entity == site.entity {
                    continue;
                }
                if other.position == site.position {
                    if other.entity < site.entity {
                        polygon.clear();
                        break;
                    }
                    continue;
                }
                let (normal, offset) = bisector(site.position, other.position);
                polygon = clip_half_plane(&polygon, normal, offset);
                if polygon.is_empty() {
                    break;
                }
            }
            let area = signed_area(&polygon).max(0.0);
            VoronoiCell { entity: site.entity, team: site.team, site: site.position, polygon, area }
        })
        .collect()
}

/// Sites whose cells share an edge of positive length. Edges are ordered by
/// `(a, b)` with `a < b`.
pub fn delaunay(cells: &[VoronoiCell]) -> Vec<DelaunayEdge> {
    let mut edges = Vec::new();
    for (i, ci) in cells.iter().enumerate() {
        for cj in &cells[i + 1..] {
            if ci.polygon.is_empty() || cj.polygon.is_empty() || !shares_edge(ci, cj) {
                continue;
            }
            let (a, b) = if ci.entity < cj.entity { (ci.entity, cj.entity) } else { (cj.entity, ci.entity) };
            edges.push(DelaunayEdge {
                a,
                b,
                length: (ci.site - cj.site).norm(),
                same_team: ci.team.is_some() && ci.team == cj.team,
            });
        }
    }
    edges.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));
    edges
}

/// Two or more of `a`'s vertices lie on the bisector of `a` and `b`, spread
/// over more than a rounding error.
fn shares_edge(a: &VoronoiCell, b: &VoronoiCell) -> bool {
    let (normal, offset) = bisector(a.site, b.site);
    let scale = normal.norm();
    if scale == 0.0 {
        return false;
    }
    let tolerance = 1e-7 * (1.0 + offset.abs() / scale);
    let on_line: Vec<Vec2> = a
        .polygon
        .iter()
        .copied()
        .filter(|p| ((normal.dot(p) - offset) / scale).abs() <= tolerance)
        .collect();
    on_line
        .iter()
        .enumerate()
        .any(|(i, p)| on_line[i + 1..].iter().any(|q| (p - q).norm() > 1e-6))
}
