//! Interpolator: continuous-time position and velocity from 10 Hz samples.
//!
//! - A time exactly on a sample returns that sample unchanged.
//! - Between connected samples a cubic Hermite segment is evaluated, with
//!   Catmull-Rom tangents shared by adjoining segments, so velocity is
//!   continuous across knots.
//! - Across a detection gap longer than the threshold nothing is fabricated:
//!   the last known position is held and flagged stale.

pub mod spline;

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::Serialize;

use crate::cache::{FrameCursor, WindowedCache};
use crate::config::InterpolationConfig;
use crate::coordinates::Vec2;
use crate::error::{QueryError, QueryResult};
use crate::store::{EntityId, Team, Timeline};

pub use spline::{hermite, knot_tangent, Knot};

/// Float slack when comparing a sample spacing against the gap threshold.
const GAP_TOLERANCE_S: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Exact,
    Spline,
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionSample {
    pub position: Vec2,
    pub velocity: Vec2,
    pub kind: SampleKind,
    /// Set when the position is held across a gap.
    pub stale: bool,
    /// Source sample at or before the query time that the result is anchored on.
    pub frame: usize,
    /// A frame of a degraded range was read; the result may change once it loads.
    pub degraded: bool,
}

/// One source sample of an entity; `position` is `None` while undetected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub frame: usize,
    pub timestamp: f64,
    pub position: Option<Vec2>,
    /// Frame unavailable; `position` is `None` regardless of detection.
    pub degraded: bool,
}

pub struct Interpolator {
    cache: Arc<WindowedCache>,
    timeline: Timeline,
    roster: Arc<BTreeMap<u32, Team>>,
    config: InterpolationConfig,
}

impl Interpolator {
    pub fn new(
        cache: Arc<WindowedCache>,
        timeline: Timeline,
        roster: Arc<BTreeMap<u32, Team>>,
        config: InterpolationConfig,
    ) -> Self {
        Self { cache, timeline, roster, config }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn cache(&self) -> &Arc<WindowedCache> {
        &self.cache
    }

    pub fn roster(&self) -> &BTreeMap<u32, Team> {
        &self.roster
    }

    pub fn check_entity(&self, entity: EntityId) -> QueryResult<()> {
        match entity {
            EntityId::Ball => Ok(()),
            EntityId::Player(id) if self.roster.contains_key(&id) => Ok(()),
            EntityId::Player(_) => Err(QueryError::UnknownEntity(entity)),
        }
    }

    /// Position, velocity and sample kind of `entity` at time `t`.
    pub fn interpolate(&self, entity: EntityId, t: f64) -> QueryResult<MotionSample> {
        self.check_entity(entity)?;
        let out_of_range = || QueryError::TimeOutOfRange {
            t,
            start: self.timeline.start(),
            end: self.timeline.end(),
        };
        if !t.is_finite() || !self.timeline.contains_time(t) {
            return Err(out_of_range());
        }
        let i = self.timeline.index_at_or_before(t).ok_or_else(out_of_range)?;
        let mut cursor = FrameCursor::new(&self.cache);

        let anchor = match self.knot(&mut cursor, entity, i)? {
            Some(knot) if knot.t == t => {
                let velocity = self.tangent(&mut cursor, entity, &knot)?;
                return Ok(MotionSample {
                    position: knot.p,
                    velocity,
                    kind: SampleKind::Exact,
                    stale: false,
                    frame: i,
                    degraded: cursor.read_degraded(),
                });
            }
            Some(knot) => Some(knot),
            None => self.previous_knot(&mut cursor, entity, i, t - self.config.max_hold_s)?,
        };
        let Some(k0) = anchor else {
            if cursor.read_degraded() {
                return Err(QueryError::Unavailable { start: i, end: i + 1, reason: "window degraded".to_string() });
            }
            return Err(QueryError::InsufficientData { entity, start: i, end: i });
        };

        match self.next_knot(&mut cursor, entity, k0.frame, k0.t + self.config.gap_threshold_s)? {
            Some(k1) => {
                let m0 = self.tangent(&mut cursor, entity, &k0)?;
                let m1 = self.tangent(&mut cursor, entity, &k1)?;
                let (position, velocity) = hermite(&k0, m0, &k1, m1, t);
                Ok(MotionSample {
                    position,
                    velocity,
                    kind: SampleKind::Spline,
                    stale: false,
                    frame: i,
                    degraded: cursor.read_degraded(),
                })
            }
            None => Ok(MotionSample {
                position: k0.p,
                velocity: Vec2::zeros(),
                kind: SampleKind::Held,
                stale: true,
                frame: k0.frame,
                degraded: cursor.read_degraded(),
            }),
        }
    }

    /// Interpolated state at the timestamp of source frame `index`.
    pub fn sample_at(&self, entity: EntityId, index: usize) -> QueryResult<MotionSample> {
        let t = self.timeline.timestamp(index).ok_or(QueryError::OutOfRange {
            index,
            frame_count: self.timeline.len(),
        })?;
        self.interpolate(entity, t)
    }

    /// Raw source samples of `entity` over an inclusive frame range.
    pub fn track(&self, entity: EntityId, range: RangeInclusive<usize>) -> QueryResult<Vec<TrackPoint>> {
        self.check_entity(entity)?;
        let (start, end) = (*range.start(), *range.end());
        if start > end {
            return Err(QueryError::InvalidRange { start, end });
        }
        if end >= self.timeline.len() {
            return Err(QueryError::OutOfRange { index: end, frame_count: self.timeline.len() });
        }

        let mut cursor = FrameCursor::new(&self.cache);
        let mut points = Vec::with_capacity(end - start + 1);
        for frame in range {
            let view = cursor.frame(frame)?;
            let degraded = view.is_stale();
            points.push(TrackPoint {
                frame,
                timestamp: self.timeline.timestamps()[frame],
                position: if degraded { None } else { view.position(entity) },
                degraded,
            });
        }
        Ok(points)
    }

    /// Velocity jump across the knot at `index`, or `None` when the knot
    /// does not join two spline segments.
    pub fn velocity_discontinuity(&self, entity: EntityId, index: usize) -> QueryResult<Option<f64>> {
        self.check_entity(entity)?;
        let mut cursor = FrameCursor::new(&self.cache);
        let Some(knot) = self.knot(&mut cursor, entity, index)? else {
            return Ok(None);
        };
        let gap = self.config.gap_threshold_s;
        let prev = self.previous_connected(&mut cursor, entity, &knot, gap)?;
        let next = self.next_knot(&mut cursor, entity, knot.frame, knot.t + gap)?;
        let (Some(prev), Some(next)) = (prev, next) else {
            return Ok(None);
        };

        let m_prev = self.tangent(&mut cursor, entity, &prev)?;
        let m_knot = self.tangent(&mut cursor, entity, &knot)?;
        let m_next = self.tangent(&mut cursor, entity, &next)?;
        let (_, left) = hermite(&prev, m_prev, &knot, m_knot, knot.t);
        let (_, right) = hermite(&knot, m_knot, &next, m_next, knot.t);
        Ok(Some((left - right).norm()))
    }

    /// True when the velocity jump at `index` is within the configured epsilon.
    pub fn is_smooth_at(&self, entity: EntityId, index: usize) -> QueryResult<bool> {
        Ok(self
            .velocity_discontinuity(entity, index)?
            .map_or(true, |jump| jump <= self.config.continuity_epsilon))
    }

    fn knot(&self, cursor: &mut FrameCursor<'_>, entity: EntityId, frame: usize) -> QueryResult<Option<Knot>> {
        let position = cursor.position(frame, entity)?;
        Ok(position.map(|p| Knot { frame, t: self.timeline.timestamps()[frame], p }))
    }

    /// Latest sample strictly before `before` whose time is at least `not_before`.
    fn previous_knot(
        &self,
        cursor: &mut FrameCursor<'_>,
        entity: EntityId,
        before: usize,
        not_before: f64,
    ) -> QueryResult<Option<Knot>> {
        let ts = self.timeline.timestamps();
        for frame in (0..before).rev() {
            if ts[frame] < not_before - GAP_TOLERANCE_S {
                break;
            }
            if let Some(knot) = self.knot(cursor, entity, frame)? {
                return Ok(Some(knot));
            }
        }
        Ok(None)
    }

    /// Earliest sample strictly after `after` whose time is at most `not_after`.
    fn next_knot(
        &self,
        cursor: &mut FrameCursor<'_>,
        entity: EntityId,
        after: usize,
        not_after: f64,
    ) -> QueryResult<Option<Knot>> {
        let ts = self.timeline.timestamps();
        for frame in after + 1..ts.len() {
            if ts[frame] > not_after + GAP_TOLERANCE_S {
                break;
            }
            if let Some(knot) = self.knot(cursor, entity, frame)? {
                return Ok(Some(knot));
            }
        }
        Ok(None)
    }

    fn previous_connected(
        &self,
        cursor: &mut FrameCursor<'_>,
        entity: EntityId,
        knot: &Knot,
        gap: f64,
    ) -> QueryResult<Option<Knot>> {
        self.previous_knot(cursor, entity, knot.frame, knot.t - gap)
    }

    fn tangent(&self, cursor: &mut FrameCursor<'_>, entity: EntityId, knot: &Knot) -> QueryResult<Vec2> {
        let gap = self.config.gap_threshold_s;
        let prev = self.previous_connected(cursor, entity, knot, gap)?;
        let next = self.next_knot(cursor, entity, knot.frame, knot.t + gap)?;
        Ok(knot_tangent(prev.as_ref(), knot, next.as_ref()))
    }
}
