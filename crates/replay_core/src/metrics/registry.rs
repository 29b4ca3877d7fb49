//! Named metric functions.
//!
//! A metric is a pure function of `(entity, frame range)` reading data
//! through a [`MetricContext`]. Adding a metric means registering a function;
//! the cache and the frame store never change.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::MetricsConfig;
use crate::coordinates::Pitch;
use crate::error::{QueryError, QueryResult};
use crate::interp::{Interpolator, MotionSample, SampleKind};
use crate::store::EntityId;

use super::kinematics::{self, Path, PathSample, LEAD_IN_FRAMES};
use super::types::{FrameRange, MetricValue};

pub type MetricFn = Arc<dyn Fn(&MetricContext<'_>, EntityId, FrameRange) -> QueryResult<MetricValue> + Send + Sync>;

/// Read-only inputs available to a metric function.
///
/// Reads made through [`path`](Self::path) and [`sample`](Self::sample) are
/// watched for frames of degraded windows; a result built on one is not cached.
pub struct MetricContext<'a> {
    pub interp: &'a Interpolator,
    pub config: &'a MetricsConfig,
    pub pitch: Pitch,
    degraded: AtomicBool,
}

impl<'a> MetricContext<'a> {
    pub fn new(interp: &'a Interpolator, config: &'a MetricsConfig, pitch: Pitch) -> Self {
        Self { interp, config, pitch, degraded: AtomicBool::new(false) }
    }

    /// True once any read served a substitute frame of a degraded window.
    pub fn read_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note(&self, degraded: bool) {
        if degraded {
            self.degraded.store(true, Ordering::Relaxed);
        }
    }

    /// Interpolated state of `entity` at source frame `index`.
    pub fn sample(&self, entity: EntityId, index: usize) -> QueryResult<MotionSample> {
        let result = self.interp.sample_at(entity, index);
        match &result {
            Ok(sample) => self.note(sample.degraded),
            Err(QueryError::Unavailable { .. }) => self.note(true),
            Err(_) => {}
        }
        result
    }

    /// Interpolated samples over `range` with lead-in. Fails with "no data"
    /// when the range holds no valid sample at all.
    pub fn path(&self, entity: EntityId, range: FrameRange) -> QueryResult<Path> {
        let lead_start = range.start.saturating_sub(LEAD_IN_FRAMES);
        let track = self.interp.track(entity, lead_start..=range.end)?;

        let mut samples = Vec::with_capacity(track.len());
        for point in track {
            self.note(point.degraded);
            let sample = match point.position {
                Some(p) => PathSample { frame: point.frame, timestamp: point.timestamp, position: Some(p), held: false },
                None if point.degraded => {
                    PathSample { frame: point.frame, timestamp: point.timestamp, position: None, held: false }
                }
                None => self.fill(entity, point.frame, point.timestamp)?,
            };
            samples.push(sample);
        }

        let path = Path { samples, range };
        if !path.has_data() {
            return Err(QueryError::InsufficientData { entity, start: range.start, end: range.end });
        }
        Ok(path)
    }

    fn fill(&self, entity: EntityId, frame: usize, timestamp: f64) -> QueryResult<PathSample> {
        match self.sample(entity, frame) {
            Ok(sample) => Ok(PathSample {
                frame,
                timestamp,
                position: Some(sample.position),
                held: sample.kind == SampleKind::Held || sample.stale,
            }),
            Err(e) if e.is_no_data() => Ok(PathSample { frame, timestamp, position: None, held: false }),
            Err(e) => Err(e),
        }
    }

    pub fn frame_interval(&self) -> f64 {
        self.interp.timeline().frame_interval()
    }

    pub fn timestamp(&self, frame: usize) -> f64 {
        self.interp.timeline().timestamp(frame).unwrap_or(f64::NAN)
    }
}

#[derive(Clone, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, MetricFn>,
}

impl MetricRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `speed`, `acceleration`, `distance`, `sprints`, `average_speed`,
    /// `max_speed` and `heatmap`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("speed", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            Ok(MetricValue::Series(kinematics::speeds(&path, ctx.config)))
        });
        registry.register("acceleration", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            Ok(MetricValue::Series(kinematics::accelerations(&path, ctx.config)))
        });
        registry.register("distance", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            Ok(MetricValue::Distance(kinematics::distance(&path, ctx.config)))
        });
        registry.register("sprints", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            let speeds = kinematics::speeds(&path, ctx.config);
            let segments =
                kinematics::sprint_segments(&speeds, |f| ctx.timestamp(f), ctx.frame_interval(), ctx.config);
            Ok(MetricValue::Segments(segments))
        });
        registry.register("average_speed", |ctx, entity, range| {
            let values = plausible_speeds(ctx, entity, range)?;
            Ok(MetricValue::Scalar(values.iter().sum::<f64>() / values.len() as f64))
        });
        registry.register("max_speed", |ctx, entity, range| {
            let values = plausible_speeds(ctx, entity, range)?;
            Ok(MetricValue::Scalar(values.iter().copied().fold(f64::MIN, f64::max)))
        });
        registry.register("heatmap", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            let cfg = ctx.config;
            Ok(MetricValue::Grid(kinematics::heatmap(&path, &ctx.pitch, cfg.heatmap_cols, cfg.heatmap_rows)))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&MetricContext<'_>, EntityId, FrameRange) -> QueryResult<MetricValue> + Send + Sync + 'static,
    {
        self.metrics.insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&MetricFn> {
        self.metrics.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }
}

/// Defined, unflagged speeds in range; "no data" if there are none.
fn plausible_speeds(ctx: &MetricContext<'_>, entity: EntityId, range: FrameRange) -> QueryResult<Vec<f64>> {
    let path = ctx.path(entity, range)?;
    let values: Vec<f64> = kinematics::speeds(&path, ctx.config)
        .into_iter()
        .filter(|p| !p.flagged)
        .filter_map(|p| p.value)
        .collect();
    if values.is_empty() {
        return Err(QueryError::InsufficientData { entity, start: range.start, end: range.end });
    }
    Ok(values)
}
