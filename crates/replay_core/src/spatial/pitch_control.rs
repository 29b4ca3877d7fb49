//! # Pitch Control
//!
//! For each grid cell, the probability that the home team reaches it first.
//!
//! ## Arrival model
//! A player keeps drifting with its current velocity for the reaction time,
//! then runs from rest toward the target with bounded acceleration up to a
//! top speed. Each team's arrival time is its fastest player's; the control
//! value is a logistic of the arrival-time difference, so equal arrival gives
//! exactly 0.5.
//!
//! ## Voronoi seed
//! The Voronoi owner of each cell is evaluated first and seeds its team's
//! minimum. The final value comes from the arrival model; the owner is kept
//! to report how often plain nearest-player ownership agrees with it.

use serde::Serialize;

use crate::config::PitchControlConfig;
use crate::coordinates::{Rect, Vec2};
use crate::store::{EntityId, Team};

use super::voronoi::VoronoiCell;

/// A player with the kinematic state the arrival model needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mover {
    pub entity: EntityId,
    pub team: Team,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Seconds for `mover` to reach `target`.
pub fn time_to_reach(mover: &Mover, target: Vec2, cfg: &PitchControlConfig) -> f64 {
    let reacted = mover.position + mover.velocity * cfg.reaction_time_s;
    let d = (target - reacted).norm();
    let (v_max, a_max) = (cfg.max_speed_mps, cfg.max_accel_mps2);
    if a_max <= 0.0 {
        return cfg.reaction_time_s + d / v_max;
    }
    let t_accel = v_max / a_max;
    let d_accel = 0.5 * a_max * t_accel * t_accel;
    let travel = if d <= d_accel {
        (2.0 * d / a_max).sqrt()
    } else {
        t_accel + (d - d_accel) / v_max
    };
    cfg.reaction_time_s + travel
}

/// Home control probability from the two teams' arrival times.
pub fn control_probability(home_s: Option<f64>, away_s: Option<f64>, sigma: f64) -> f64 {
    match (home_s, away_s) {
        (Some(h), Some(a)) => 1.0 / (1.0 + ((h - a) / sigma.max(1e-6)).exp()),
        (Some(_), None) => 1.0,
        (None, Some(_)) => 0.0,
        (None, None) => 0.5,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchControlGrid {
    pub cols: usize,
    pub rows: usize,
    pub bounds: Rect,
    /// Row-major home-team control in [0, 1]; away control is `1 - home`.
    pub home: Vec<f64>,
    /// Voronoi owner of each cell centre.
    pub owner: Vec<Option<EntityId>>,
    /// Share of cells where the Voronoi owner's team also holds the majority.
    pub voronoi_agreement: f64,
}

impl PitchControlGrid {
    pub fn cell_center(bounds: &Rect, cols: usize, rows: usize, col: usize, row: usize) -> Vec2 {
        Vec2::new(
            bounds.min_x + (col as f64 + 0.5) * bounds.width() / cols as f64,
            bounds.min_y + (row as f64 + 0.5) * bounds.height() / rows as f64,
        )
    }

    pub fn home(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.home.get(row * self.cols + col).copied()
    }

    pub fn control(&self, team: Team, col: usize, row: usize) -> Option<f64> {
        let home = self.home(col, row)?;
        Some(match team {
            Team::Home => home,
            Team::Away => 1.0 - home,
        })
    }

    /// Mean control of `team` over the pitch.
    pub fn share(&self, team: Team) -> f64 {
        if self.home.is_empty() {
            return 0.5;
        }
        let home = self.home.iter().sum::<f64>() / self.home.len() as f64;
        match team {
            Team::Home => home,
            Team::Away => 1.0 - home,
        }
    }
}

pub fn pitch_control(
    movers: &[Mover],
    cells: &[VoronoiCell],
    bounds: Rect,
    cfg: &PitchControlConfig,
) -> PitchControlGrid {
    let (cols, rows) = (cfg.grid.cols.max(1), cfg.grid.rows.max(1));
    let mut home = Vec::with_capacity(cols * rows);
    let mut owner = Vec::with_capacity(cols * rows);
    let mut agree = 0usize;

    for row in 0..rows {
        for col in 0..cols {
            let target = PitchControlGrid::cell_center(&bounds, cols, rows, col, row);
            let seed = cells.iter().find(|c| c.contains(target));
            let seed_mover = seed.and_then(|c| movers.iter().find(|m| m.entity == c.entity));

            let mut best = [None::<f64>, None::<f64>];
            if let Some(m) = seed_mover {
                best[slot(m.team)] = Some(time_to_reach(m, target, cfg));
            }
            for m in movers {
                if seed_mover.is_some_and(|s| s.entity == m.entity) {
                    continue;
                }
                let t = time_to_reach(m, target, cfg);
                let current = &mut best[slot(m.team)];
                if current.map_or(true, |b| t < b) {
                    *current = Some(t);
                }
            }

            let p = control_probability(best[0], best[1], cfg.control_sigma_s);
            if let Some(team) = seed_mover.map(|m| m.team) {
                let majority = match team {
                    Team::Home => p >= 0.5,
                    Team::Away => p <= 0.5,
                };
                if majority {
                    agree += 1;
                }
            }
            home.push(p);
            owner.push(seed.map(|c| c.entity));
        }
    }

    let voronoi_agreement = agree as f64 / (cols * rows) as f64;
    PitchControlGrid { cols, rows, bounds, home, owner, voronoi_agreement }
}

fn slot(team: Team) -> usize {
    match team {
        Team::Home => 0,
        Team::Away => 1,
    }
}
