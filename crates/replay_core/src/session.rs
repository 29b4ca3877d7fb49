//! Match session: the query surface handed to rendering and UI consumers.
//!
//! A session owns one match. It holds no notion of a "current frame": the
//! consumer owns a [`Playhead`] and passes it to the stepping calls, and
//! every other query takes explicit indices or times.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheStatus, FrameView, MemoryBudget, Playhead, StoreLoader, WindowedCache};
use crate::config::EngineConfig;
use crate::error::{QueryError, QueryResult, SessionError};
use crate::events::{parse_events_jsonl, Event, EventFilter, EventIndex, PassNetwork};
use crate::interp::{Interpolator, MotionSample};
use crate::metrics::{FrameRange, MetricContext, MetricValue, MetricsEngine};
use crate::spatial::{SpatialAnalyzer, SpatialSnapshot};
use crate::store::{read_artifact, EntityId, FrameStore, Team, Timeline};

/// Summary of a loaded match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchInfo {
    pub match_id: String,
    pub frame_count: usize,
    pub sample_rate_hz: f64,
    pub start_s: f64,
    pub end_s: f64,
    pub home_players: Vec<u32>,
    pub away_players: Vec<u32>,
    pub events: usize,
}

impl MatchInfo {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

pub struct MatchSession {
    match_id: String,
    config: EngineConfig,
    store: Arc<FrameStore>,
    cache: Arc<WindowedCache>,
    interp: Arc<Interpolator>,
    metrics: MetricsEngine,
    spatial: SpatialAnalyzer,
    events: EventIndex,
}

impl MatchSession {
    /// Open a session with its own memory budget taken from the config.
    pub fn open(
        match_id: &str,
        store: FrameStore,
        events: Vec<Event>,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        let budget = MemoryBudget::shared(config.window.memory_budget_bytes);
        Self::open_with_budget(match_id, store, events, config, budget)
    }

    /// Open a session sharing `budget` with every other session holding it.
    pub fn open_with_budget(
        match_id: &str,
        store: FrameStore,
        events: Vec<Event>,
        config: EngineConfig,
        budget: Arc<MemoryBudget>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let events = EventIndex::build(events, store.timeline(), config.events.clone())?;

        let store = Arc::new(store);
        let loader = Arc::new(StoreLoader::new(store.clone(), config.window.load_chunk_frames));
        let cache = Arc::new(WindowedCache::new(loader, config.window.clone(), budget));
        let roster: Arc<BTreeMap<u32, Team>> = Arc::new(store.roster().clone());
        let interp = Arc::new(Interpolator::new(
            cache.clone(),
            store.timeline().clone(),
            roster,
            config.interpolation.clone(),
        ));
        let pitch = config.pitch.pitch();
        let metrics = MetricsEngine::new(interp.clone(), config.metrics.clone(), pitch);
        let spatial = SpatialAnalyzer::new(cache.clone(), store.timeline().clone(), pitch, config.spatial.clone());

        info!(
            match_id,
            frames = store.frame_count(),
            players = store.roster().len(),
            events = events.len(),
            "match session opened"
        );
        Ok(Self { match_id: match_id.to_string(), config, store, cache, interp, metrics, spatial, events })
    }

    /// Parse frame and event JSON lines, then open.
    pub fn load_jsonl<F: BufRead, E: BufRead>(
        match_id: &str,
        frames: F,
        events: Option<E>,
        config: EngineConfig,
        budget: Arc<MemoryBudget>,
    ) -> Result<Self, SessionError> {
        let store = FrameStore::load_jsonl(frames, config.pitch.sample_rate_hz)?;
        let events = match events {
            Some(reader) => parse_events_jsonl(reader)?,
            None => Vec::new(),
        };
        Self::open_with_budget(match_id, store, events, config, budget)
    }

    /// Open from a persisted frame-store artifact written for `match_id`.
    pub fn from_artifact(
        path: impl AsRef<Path>,
        match_id: &str,
        events: Vec<Event>,
        config: EngineConfig,
        budget: Arc<MemoryBudget>,
    ) -> Result<Self, SessionError> {
        let store = read_artifact(path, match_id)?;
        Self::open_with_budget(match_id, store, events, config, budget)
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn timeline(&self) -> &Timeline {
        self.store.timeline()
    }

    pub fn frame_count(&self) -> usize {
        self.store.frame_count()
    }

    pub fn info(&self) -> MatchInfo {
        let players = |team: Team| -> Vec<u32> {
            self.store.roster().iter().filter(|(_, t)| **t == team).map(|(id, _)| *id).collect()
        };
        MatchInfo {
            match_id: self.match_id.clone(),
            frame_count: self.store.frame_count(),
            sample_rate_hz: self.store.sample_rate_hz(),
            start_s: self.timeline().start(),
            end_s: self.timeline().end(),
            home_players: players(Team::Home),
            away_players: players(Team::Away),
            events: self.events.len(),
        }
    }

    // Query surface

    pub fn get_frame(&self, index: usize) -> QueryResult<FrameView> {
        self.cache.get_frame(index)
    }

    pub fn interpolate(&self, entity: EntityId, t: f64) -> QueryResult<MotionSample> {
        self.interp.interpolate(entity, t)
    }

    pub fn get_metric(&self, entity: EntityId, metric: &str, range: FrameRange) -> QueryResult<Arc<MetricValue>> {
        self.metrics.get_metric(entity, metric, range)
    }

    pub fn get_spatial_snapshot(&self, index: usize) -> QueryResult<Arc<SpatialSnapshot>> {
        self.spatial.snapshot(index)
    }

    pub fn next_event(&self, frame: usize, filter: &EventFilter) -> Option<&Event> {
        self.events.next_event(frame, filter)
    }

    pub fn previous_event(&self, frame: usize, filter: &EventFilter) -> Option<&Event> {
        self.events.previous_event(frame, filter)
    }

    pub fn get_event_context(&self, event: &Event, pre_s: f64, post_s: f64) -> FrameRange {
        self.events.event_context(event, pre_s, post_s)
    }

    pub fn pass_network(&self, filter: &EventFilter) -> PassNetwork {
        self.events.pass_network(filter)
    }

    /// Add or replace a metric. Cached values of a replaced metric are dropped.
    pub fn register_metric<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&MetricContext<'_>, EntityId, FrameRange) -> QueryResult<MetricValue> + Send + Sync + 'static,
    {
        self.metrics.register(name, f);
    }

    pub fn metrics(&self) -> &MetricsEngine {
        &self.metrics
    }

    pub fn spatial(&self) -> &SpatialAnalyzer {
        &self.spatial
    }

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    pub fn interpolator(&self) -> &Arc<Interpolator> {
        &self.interp
    }

    pub fn cache(&self) -> &Arc<WindowedCache> {
        &self.cache
    }

    /// Polled by the consumer; degraded ranges never surface as errors.
    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    // Playback

    /// Jump the playhead to `frame` and return that frame.
    pub fn seek(&self, playhead: &mut Playhead, frame: usize) -> QueryResult<FrameView> {
        let frame_count = self.frame_count();
        if frame >= frame_count {
            return Err(QueryError::OutOfRange { index: frame, frame_count });
        }
        playhead.seek(frame);
        self.cache.observe(playhead);
        debug!(match_id = %self.match_id, frame, "seek");
        self.cache.get_frame(frame)
    }

    /// Jump to the sample nearest `t`.
    pub fn seek_time(&self, playhead: &mut Playhead, t: f64) -> QueryResult<FrameView> {
        let timeline = self.timeline();
        if !t.is_finite() || !timeline.contains_time(t) {
            return Err(QueryError::TimeOutOfRange { t, start: timeline.start(), end: timeline.end() });
        }
        let index = self.store.index_at_time(t)?;
        self.seek(playhead, index)
    }

    /// Advance by `elapsed_s` of wall time at the playhead's speed.
    pub fn tick(&self, playhead: &mut Playhead, elapsed_s: f64) -> QueryResult<FrameView> {
        let frames = self.timeline().frames_for(elapsed_s * playhead.speed.max(0.0));
        playhead.advance(frames, self.frame_count());
        self.cache.observe(playhead);
        self.cache.get_frame(playhead.frame)
    }

    /// Move the playhead onto the next matching event, if any.
    pub fn seek_to_next_event(&self, playhead: &mut Playhead, filter: &EventFilter) -> QueryResult<Option<&Event>> {
        let Some(event) = self.events.next_event(playhead.frame, filter) else {
            return Ok(None);
        };
        self.seek(playhead, event.frame)?;
        Ok(Some(event))
    }

    pub fn seek_to_previous_event(
        &self,
        playhead: &mut Playhead,
        filter: &EventFilter,
    ) -> QueryResult<Option<&Event>> {
        let Some(event) = self.events.previous_event(playhead.frame, filter) else {
            return Ok(None);
        };
        self.seek(playhead, event.frame)?;
        Ok(Some(event))
    }
}

impl std::fmt::Debug for MatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("match_id", &self.match_id)
            .field("frames", &self.store.frame_count())
            .field("events", &self.events.len())
            .finish()
    }
}
