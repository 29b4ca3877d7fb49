//! Window placement and the predictive prefetch rule.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelDirection {
    #[default]
    Forward,
    Backward,
}

/// Explicit playback position owned by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Playhead {
    pub frame: usize,
    pub direction: TravelDirection,
    /// Playback rate multiplier (1.0 = real time).
    pub speed: f64,
}

impl Default for Playhead {
    fn default() -> Self {
        Self { frame: 0, direction: TravelDirection::Forward, speed: 1.0 }
    }
}

impl Playhead {
    pub fn at(frame: usize) -> Self {
        Self { frame, ..Self::default() }
    }

    /// Move `frames` in the travel direction, clamped to `[0, frame_count)`.
    pub fn advance(&mut self, frames: usize, frame_count: usize) {
        let last = frame_count.saturating_sub(1);
        self.frame = match self.direction {
            TravelDirection::Forward => self.frame.saturating_add(frames).min(last),
            TravelDirection::Backward => self.frame.saturating_sub(frames),
        };
    }

    /// Jump to `frame`, inferring the direction from the move.
    pub fn seek(&mut self, frame: usize) {
        if frame < self.frame {
            self.direction = TravelDirection::Backward;
        } else if frame > self.frame {
            self.direction = TravelDirection::Forward;
        }
        self.frame = frame;
    }
}

/// Range a window centred on `center` should cover.
///
/// Forward travel keeps `margin` frames behind the centre and the rest ahead;
/// backward travel mirrors that. Windows are shifted, not shrunk, at the
/// ends of the match.
pub fn plan_window(
    center: usize,
    direction: TravelDirection,
    frame_count: usize,
    cfg: &WindowConfig,
) -> Range<usize> {
    let size = cfg.size_frames.min(frame_count);
    if size == 0 {
        return 0..0;
    }
    let center = center.min(frame_count - 1);
    let start = match direction {
        TravelDirection::Forward => center.saturating_sub(cfg.margin_frames),
        TravelDirection::Backward => (center + cfg.margin_frames + 1).saturating_sub(size),
    };
    let start = start.min(frame_count - size);
    start..start + size
}

/// The next window to prefetch when `frame` has entered the trailing part of
/// `resident` in the direction of travel, or `None` if it has not.
pub fn prefetch_target(
    frame: usize,
    resident: &Range<usize>,
    direction: TravelDirection,
    frame_count: usize,
    cfg: &WindowConfig,
) -> Option<Range<usize>> {
    if !resident.contains(&frame) {
        return None;
    }
    let len = resident.len() as f64;
    let offset = (frame - resident.start) as f64;
    match direction {
        TravelDirection::Forward => {
            if resident.end >= frame_count || offset < len * cfg.prefetch_trigger {
                return None;
            }
            Some(plan_window(resident.end, direction, frame_count, cfg))
        }
        TravelDirection::Backward => {
            if resident.start == 0 || offset >= len * (1.0 - cfg.prefetch_trigger) {
                return None;
            }
            Some(plan_window(resident.start - 1, direction, frame_count, cfg))
        }
    }
}
