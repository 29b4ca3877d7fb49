use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::store::EntityId;

/// Inclusive frame range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

impl FrameRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, frame: usize) -> bool {
        frame >= self.start && frame <= self.end
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Cache key: one metric of one entity over one range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub entity: EntityId,
    pub metric: String,
    pub range: FrameRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub frame: usize,
    /// `None` where the metric is undefined (no sample), never zero.
    pub value: Option<f64>,
    /// Gap-recovery value, reported unclamped.
    pub flagged: bool,
}

/// Distance in metres per intensity band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DistanceBreakdown {
    pub total: f64,
    pub walk: f64,
    pub jog: f64,
    pub run: f64,
    pub sprint: f64,
    /// Everything at or above the high-intensity threshold (overlaps run and sprint).
    pub high_intensity: f64,
}

impl DistanceBreakdown {
    pub fn add(&mut self, step: f64, speed: f64, cfg: &MetricsConfig) {
        self.total += step;
        if speed >= cfg.sprint_from_mps {
            self.sprint += step;
        } else if speed >= cfg.run_from_mps {
            self.run += step;
        } else if speed >= cfg.jog_from_mps {
            self.jog += step;
        } else {
            self.walk += step;
        }
        if speed >= cfg.high_intensity_from_mps {
            self.high_intensity += step;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
    pub cols: usize,
    pub rows: usize,
    /// Row-major, `rows * cols` cells in [0, 1].
    pub cells: Vec<f64>,
    pub samples: usize,
}

impl Heatmap {
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells.get(row * self.cols + col).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Scalar(f64),
    Series(Vec<SeriesPoint>),
    Distance(DistanceBreakdown),
    Segments(Vec<FrameRange>),
    Grid(Heatmap),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[SeriesPoint]> {
        match self {
            MetricValue::Series(points) => Some(points),
            _ => None,
        }
    }

    pub fn as_distance(&self) -> Option<&DistanceBreakdown> {
        match self {
            MetricValue::Distance(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_segments(&self) -> Option<&[FrameRange]> {
        match self {
            MetricValue::Segments(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_grid(&self) -> Option<&Heatmap> {
        match self {
            MetricValue::Grid(h) => Some(h),
            _ => None,
        }
    }

    /// Rough heap footprint for cache budgeting.
    pub fn approx_bytes(&self) -> usize {
        size_of::<Self>()
            + match self {
                MetricValue::Scalar(_) | MetricValue::Distance(_) => 0,
                MetricValue::Series(points) => points.len() * size_of::<SeriesPoint>(),
                MetricValue::Segments(s) => s.len() * size_of::<FrameRange>(),
                MetricValue::Grid(h) => h.cells.len() * size_of::<f64>(),
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_buckets() {
        let cfg = MetricsConfig::default();
        let mut d = DistanceBreakdown::default();
        d.add(1.0, 1.0, &cfg);
        d.add(1.0, 3.0, &cfg);
        d.add(1.0, 5.5, &cfg);
        d.add(1.0, 8.0, &cfg);
        assert_eq!((d.walk, d.jog, d.run, d.sprint), (1.0, 1.0, 1.0, 1.0));
        assert_eq!(d.total, 4.0);
        assert_eq!(d.high_intensity, 2.0);
    }

    #[test]
    fn test_frame_range() {
        let r = FrameRange::new(3, 7);
        assert_eq!(r.len(), 5);
        assert!(r.contains(7));
        assert!(!r.contains(8));
        assert_eq!(r.to_string(), "3..=7");
    }
}
