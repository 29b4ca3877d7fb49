//! # Kinematic Derivations
//!
//! Pure functions over a [`Path`]: one interpolated sample per source frame
//! plus a short lead-in before the queried range.
//!
//! ## Gap handling
//! - Samples inside a short gap are spline-filled and count as valid.
//! - Held samples (long gap) carry the last known position but are not
//!   motion; steps touching them add no distance.
//! - The first valid frame after a held run is a gap-recovery frame: its
//!   speed is reported raw (unclamped) and flagged.

use serde::Serialize;

use crate::config::MetricsConfig;
use crate::coordinates::{Pitch, Vec2};

use super::types::{DistanceBreakdown, FrameRange, Heatmap, SeriesPoint};

/// Frames of lead-in needed before a range for acceleration.
pub const LEAD_IN_FRAMES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PathSample {
    pub frame: usize,
    pub timestamp: f64,
    pub position: Option<Vec2>,
    /// Position is a held last-known value, not observed motion.
    pub held: bool,
}

impl PathSample {
    pub fn is_valid(&self) -> bool {
        self.position.is_some() && !self.held
    }
}

/// Samples for `range` preceded by up to [`LEAD_IN_FRAMES`] lead-in samples.
#[derive(Debug, Clone)]
pub struct Path {
    pub samples: Vec<PathSample>,
    pub range: FrameRange,
}

impl Path {
    /// Offset of `range.start` inside `samples`.
    fn offset(&self) -> usize {
        self.samples.iter().position(|s| s.frame == self.range.start).unwrap_or(0)
    }

    fn in_range(&self) -> &[PathSample] {
        &self.samples[self.offset()..]
    }

    pub fn has_data(&self) -> bool {
        self.in_range().iter().any(PathSample::is_valid)
    }
}

/// Speed at one step `a -> b`, or `None` when undefined.
fn step_speed(a: &PathSample, b: &PathSample, cfg: &MetricsConfig) -> Option<(f64, bool)> {
    let (pa, pb) = (a.position?, b.position?);
    if b.held {
        return None;
    }
    let dt = b.timestamp - a.timestamp;
    if dt <= 0.0 {
        return None;
    }
    let raw = (pb - pa).norm() / dt;
    if a.held {
        Some((raw, true))
    } else {
        Some((raw.min(cfg.max_plausible_speed_mps), false))
    }
}

/// Per-frame speed over the range (m/s).
pub fn speeds(path: &Path, cfg: &MetricsConfig) -> Vec<SeriesPoint> {
    let offset = path.offset();
    (offset..path.samples.len())
        .map(|i| {
            let sample = &path.samples[i];
            let speed = i
                .checked_sub(1)
                .and_then(|prev| step_speed(&path.samples[prev], sample, cfg));
            SeriesPoint {
                frame: sample.frame,
                value: speed.map(|(v, _)| v),
                flagged: speed.is_some_and(|(_, flagged)| flagged),
            }
        })
        .collect()
}

/// Per-frame acceleration over the range (m/s^2). Undefined next to a
/// flagged or missing speed.
pub fn accelerations(path: &Path, cfg: &MetricsConfig) -> Vec<SeriesPoint> {
    let offset = path.offset();
    let speed_at = |i: usize| -> Option<f64> {
        let prev = i.checked_sub(1)?;
        match step_speed(&path.samples[prev], &path.samples[i], cfg)? {
            (v, false) => Some(v),
            (_, true) => None,
        }
    };
    (offset..path.samples.len())
        .map(|i| {
            let sample = &path.samples[i];
            let value = i.checked_sub(1).and_then(|prev| {
                let (v0, v1) = (speed_at(prev)?, speed_at(i)?);
                let dt = sample.timestamp - path.samples[prev].timestamp;
                Some((v1 - v0) / dt)
            });
            SeriesPoint { frame: sample.frame, value, flagged: false }
        })
        .collect()
}

/// Distance covered inside the range, split into intensity buckets by the
/// step speed. Only steps whose both ends lie in the range are counted, so
/// distances over adjacent ranges add up.
pub fn distance(path: &Path, cfg: &MetricsConfig) -> DistanceBreakdown {
    let mut out = DistanceBreakdown::default();
    let samples = path.in_range();
    for pair in samples.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if !(a.is_valid() && b.is_valid()) {
            continue;
        }
        let Some((speed, false)) = step_speed(a, b, cfg) else {
            continue;
        };
        let step = match (a.position, b.position) {
            (Some(pa), Some(pb)) => (pb - pa).norm(),
            _ => continue,
        };
        out.add(step, speed, cfg);
    }
    out
}

/// Contiguous runs at or above the sprint threshold lasting at least the
/// minimum duration. `frame_interval` is the duration one sample covers.
pub fn sprint_segments(
    speeds: &[SeriesPoint],
    timestamps: impl Fn(usize) -> f64,
    frame_interval: f64,
    cfg: &MetricsConfig,
) -> Vec<FrameRange> {
    let mut segments = Vec::new();
    let mut run: Option<(usize, usize)> = None;

    let close = |run: Option<(usize, usize)>, segments: &mut Vec<FrameRange>| {
        if let Some((start, end)) = run {
            let duration = timestamps(end) - timestamps(start) + frame_interval;
            if duration + 1e-9 >= cfg.min_sprint_duration_s {
                segments.push(FrameRange::new(start, end));
            }
        }
    };

    for point in speeds {
        let sprinting = !point.flagged && point.value.is_some_and(|v| v >= cfg.sprint_from_mps);
        run = match (sprinting, run) {
            (true, Some((start, _))) => Some((start, point.frame)),
            (true, None) => Some((point.frame, point.frame)),
            (false, current) => {
                close(current, &mut segments);
                None
            }
        };
    }
    close(run, &mut segments);
    segments
}

/// Occupancy grid of valid positions, normalised so the busiest cell is 1.0.
pub fn heatmap(path: &Path, pitch: &Pitch, cols: usize, rows: usize) -> Heatmap {
    let mut counts = vec![0u32; cols * rows];
    let bounds = pitch.bounds();
    let mut samples = 0;
    for sample in path.in_range().iter().filter(|s| s.is_valid()) {
        let Some(p) = sample.position.map(|p| pitch.clamp(p)) else {
            continue;
        };
        let col = (((p.x - bounds.min_x) / bounds.width()) * cols as f64) as usize;
        let row = (((p.y - bounds.min_y) / bounds.height()) * rows as f64) as usize;
        counts[row.min(rows - 1) * cols + col.min(cols - 1)] += 1;
        samples += 1;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    let cells = counts
        .iter()
        .map(|&c| if max == 0 { 0.0 } else { c as f64 / max as f64 })
        .collect();
    Heatmap { cols, rows, cells, samples }
}
