use serde::Serialize;

use crate::coordinates::{Pitch, Vec2};
use crate::store::Team;

use super::geometry::centroid;
use super::hull::convex_hull;

/// Distance at which an unmarked attacker counts as not pressed at all.
pub const PRESSING_HORIZON_M: f64 = 30.0;

/// Players counted into the defensive line.
const BACK_LINE_PLAYERS: usize = 4;

/// Attacking direction and own-goal depth of a team in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Orientation {
    /// The team attacks toward positive x (defends the goal at negative x).
    pub attacks_positive_x: bool,
}

impl Orientation {
    /// Metres from the team's own goal line along the pitch length.
    pub fn depth(&self, pitch: &Pitch, x: f64) -> f64 {
        if self.attacks_positive_x {
            x + pitch.half_length()
        } else {
            pitch.half_length() - x
        }
    }

    /// True when `a` is closer to the own goal than `b`.
    pub fn deeper(&self, a: f64, b: f64) -> bool {
        if self.attacks_positive_x {
            a < b
        } else {
            a > b
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamShape {
    pub team: Team,
    pub players: usize,
    pub width_m: f64,
    pub depth_m: f64,
    pub centroid: Vec2,
    /// Mean distance to the centroid over the pitch diagonal; lower is tighter.
    pub compactness: f64,
    pub hull_area_m2: f64,
    /// Mean x of the deepest outfield players.
    pub defensive_line_x: f64,
    /// Deepest outfield player, or the ball if deeper, never past halfway.
    pub offside_line_x: f64,
    /// How closely this team's players mark the opposition, in [0, 1].
    pub pressing_intensity: f64,
    pub orientation: Orientation,
}

/// Shape of one team from its outfield positions. `opponents` are the other
/// team's outfield positions.
pub fn team_shape(
    team: Team,
    outfield: &[Vec2],
    opponents: &[Vec2],
    ball: Vec2,
    orientation: Orientation,
    pitch: &Pitch,
) -> Option<TeamShape> {
    let centre = centroid(outfield)?;

    let (mut min_x, mut max_x) = (f64::MAX, f64::MIN);
    let (mut min_y, mut max_y) = (f64::MAX, f64::MIN);
    for p in outfield {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let spread = outfield.iter().map(|p| (p - centre).norm()).sum::<f64>() / outfield.len() as f64;

    let mut by_depth: Vec<f64> = outfield.iter().map(|p| p.x).collect();
    by_depth.sort_by(|a, b| orientation.depth(pitch, *a).total_cmp(&orientation.depth(pitch, *b)));
    let back: &[f64] = &by_depth[..by_depth.len().min(BACK_LINE_PLAYERS)];
    let defensive_line_x = back.iter().sum::<f64>() / back.len() as f64;

    let deepest = by_depth[0];
    let mut offside_line_x = if orientation.deeper(ball.x, deepest) { ball.x } else { deepest };
    if !orientation.deeper(offside_line_x, 0.0) {
        offside_line_x = 0.0;
    }

    Some(TeamShape {
        team,
        players: outfield.len(),
        width_m: max_y - min_y,
        depth_m: max_x - min_x,
        centroid: centre,
        compactness: spread / pitch.diagonal(),
        hull_area_m2: convex_hull(outfield).area,
        defensive_line_x,
        offside_line_x,
        pressing_intensity: pressing_intensity(outfield, opponents),
        orientation,
    })
}

/// Mean distance from each opponent to its nearest marker, mapped linearly
/// onto [0, 1] over [`PRESSING_HORIZON_M`].
pub fn pressing_intensity(pressers: &[Vec2], opponents: &[Vec2]) -> f64 {
    if pressers.is_empty() || opponents.is_empty() {
        return 0.0;
    }
    let mean = opponents
        .iter()
        .map(|o| pressers.iter().map(|p| (p - o).norm()).fold(f64::INFINITY, f64::min))
        .sum::<f64>()
        / opponents.len() as f64;
    (1.0 - mean / PRESSING_HORIZON_M).clamp(0.0, 1.0)
}
