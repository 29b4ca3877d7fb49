//! # Pitch Coordinates
//!
//! Tracking coordinates are metres from the centre spot: x runs along the
//! pitch length, y across its width. A standard 105 x 68 pitch spans
//! x in [-52.5, 52.5] and y in [-34, 34].

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// 2-D vector in pitch metres (or metres per second for velocities).
pub type Vec2 = Vector2<f64>;

/// Penalty box depth from the goal line.
pub const PENALTY_BOX_DEPTH: f64 = 16.5;

/// Penalty box width (across the pitch).
pub const PENALTY_BOX_WIDTH: f64 = 40.3;

/// Axis-aligned rectangle in pitch metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow by `margin` metres on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    /// Corners in counter-clockwise order starting bottom-left.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.min_x, self.min_y),
            Vec2::new(self.max_x, self.min_y),
            Vec2::new(self.max_x, self.max_y),
            Vec2::new(self.min_x, self.max_y),
        ]
    }
}

/// Pitch geometry (centre-origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    pub length_m: f64,
    pub width_m: f64,
}

impl Default for Pitch {
    fn default() -> Self {
        Self { length_m: 105.0, width_m: 68.0 }
    }
}

impl Pitch {
    pub fn half_length(&self) -> f64 {
        self.length_m / 2.0
    }

    pub fn half_width(&self) -> f64 {
        self.width_m / 2.0
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(-self.half_length(), -self.half_width(), self.half_length(), self.half_width())
    }

    pub fn diagonal(&self) -> f64 {
        self.length_m.hypot(self.width_m)
    }

    pub fn contains(&self, p: Vec2) -> bool {
        self.bounds().contains(p)
    }

    pub fn clamp(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x.clamp(-self.half_length(), self.half_length()),
            p.y.clamp(-self.half_width(), self.half_width()),
        )
    }

    /// True if `p` lies inside either penalty box.
    pub fn in_penalty_box(&self, p: Vec2) -> bool {
        p.x.abs() >= self.half_length() - PENALTY_BOX_DEPTH
            && p.x.abs() <= self.half_length()
            && p.y.abs() <= PENALTY_BOX_WIDTH / 2.0
    }
}

#[inline]
pub fn mps_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

#[inline]
pub fn kmh_to_mps(kmh: f64) -> f64 {
    kmh / 3.6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_bounds_are_centre_origin() {
        let pitch = Pitch::default();
        let b = pitch.bounds();
        assert_eq!(b.min_x, -52.5);
        assert_eq!(b.max_y, 34.0);
        assert!(pitch.contains(Vec2::new(0.0, 0.0)));
        assert!(!pitch.contains(Vec2::new(53.0, 0.0)));
        assert_eq!(pitch.clamp(Vec2::new(60.0, -40.0)), Vec2::new(52.5, -34.0));
    }

    #[test]
    fn test_penalty_box() {
        let pitch = Pitch::default();
        assert!(pitch.in_penalty_box(Vec2::new(-50.0, 0.0)));
        assert!(pitch.in_penalty_box(Vec2::new(45.0, 10.0)));
        assert!(!pitch.in_penalty_box(Vec2::new(30.0, 0.0)));
        assert!(!pitch.in_penalty_box(Vec2::new(50.0, 30.0)));
    }

    #[test]
    fn test_speed_units() {
        assert!((mps_to_kmh(10.0) - 36.0).abs() < 1e-12);
        assert!((kmh_to_mps(24.0) - 6.666_666_666_666_667).abs() < 1e-9);
    }
}
