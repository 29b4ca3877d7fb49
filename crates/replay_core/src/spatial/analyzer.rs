use std::mem::size_of;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::{FrameView, WindowedCache};
use crate::config::SpatialConfig;
use crate::coordinates::{Pitch, Rect, Vec2};
use crate::error::QueryResult;
use crate::memo::{MemoCache, MemoStats};
use crate::store::{EntityId, Frame, PlayerSample, Team, Timeline};

use super::formation::{self, FormationGuess, FormationReading};
use super::hull::{convex_hull, Hull};
use super::knn::{build_index, Neighbor};
use super::pitch_control::{pitch_control, Mover, PitchControlGrid};
use super::shape::{team_shape, Orientation, TeamShape};
use super::voronoi::{delaunay, voronoi, DelaunayEdge, Site, VoronoiCell};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamGeometry {
    pub team: Team,
    /// Player left out of the outfield set, if any.
    pub goalkeeper: Option<u32>,
    pub hull: Hull,
    pub shape: Option<TeamShape>,
    pub formation: Option<FormationReading>,
}

/// Derived geometry of one frame. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialSnapshot {
    pub frame: usize,
    pub timestamp: f64,
    /// Built from a fallback frame of a degraded range.
    pub stale: bool,
    pub home: TeamGeometry,
    pub away: TeamGeometry,
    pub voronoi: Vec<VoronoiCell>,
    pub delaunay: Vec<DelaunayEdge>,
    pub pitch_control: PitchControlGrid,
}

impl SpatialSnapshot {
    pub fn team(&self, team: Team) -> &TeamGeometry {
        match team {
            Team::Home => &self.home,
            Team::Away => &self.away,
        }
    }

    pub fn cell(&self, entity: EntityId) -> Option<&VoronoiCell> {
        self.voronoi.iter().find(|c| c.entity == entity)
    }
}

/// A single-frame result together with the frame it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReading<T> {
    /// Requested frame.
    pub frame: usize,
    /// Frame the value was computed from; differs from `frame` only when stale.
    pub served: usize,
    /// Built from a fallback frame of a degraded range.
    pub stale: bool,
    pub value: T,
}

impl<T> FrameReading<T> {
    fn of(view: &FrameView, value: T) -> Self {
        Self { frame: view.requested(), served: view.index(), stale: view.is_stale(), value }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FrameReading<U> {
        FrameReading { frame: self.frame, served: self.served, stale: self.stale, value: f(self.value) }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

type SnapshotOutcome = QueryResult<Arc<SpatialSnapshot>>;
type GuessOutcome = QueryResult<Option<FormationGuess>>;

/// Per-frame geometry over the windowed cache. Snapshots are cached per
/// frame index; raw formation labels are cached separately because the
/// hysteresis reads them for many earlier frames.
pub struct SpatialAnalyzer {
    cache: Arc<WindowedCache>,
    timeline: Timeline,
    pitch: Pitch,
    config: SpatialConfig,
    snapshots: MemoCache<usize, SnapshotOutcome>,
    formations: MemoCache<(usize, Team), GuessOutcome>,
}

impl SpatialAnalyzer {
    pub fn new(cache: Arc<WindowedCache>, timeline: Timeline, pitch: Pitch, config: SpatialConfig) -> Self {
        let snapshots = MemoCache::new("snapshots", config.snapshot_cache_frames.max(1), |_| 1);
        let guesses = 2 * timeline.frames_for(config.formation.lookback_s) + config.snapshot_cache_frames;
        let formations = MemoCache::new("formations", guesses.max(1) * size_of::<FormationGuess>(), |_| {
            size_of::<FormationGuess>()
        });
        Self { cache, timeline, pitch, config, snapshots, formations }
    }

    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    pub fn pitch(&self) -> &Pitch {
        &self.pitch
    }

    /// Everything for one frame, computed once per index.
    pub fn snapshot(&self, index: usize) -> QueryResult<Arc<SpatialSnapshot>> {
        if let Some(hit) = self.snapshots.get(&index) {
            return hit;
        }
        let view = self.cache.get_frame(index)?;
        if view.is_stale() {
            // Not cached: the range may recover.
            return self.build_snapshot(index, &view).map(Arc::new);
        }
        self.snapshots.get_or_compute(index, || self.build_snapshot(index, &view).map(Arc::new))
    }

    pub fn snapshot_stats(&self) -> MemoStats {
        self.snapshots.stats()
    }

    pub fn convex_hull(&self, index: usize, team: Team) -> QueryResult<FrameReading<Hull>> {
        let view = self.cache.get_frame(index)?;
        let (outfield, _) = self.outfield(view.frame(), team);
        Ok(FrameReading::of(&view, convex_hull(&positions(&outfield))))
    }

    pub fn voronoi(&self, index: usize) -> QueryResult<FrameReading<Vec<VoronoiCell>>> {
        let view = self.cache.get_frame(index)?;
        Ok(FrameReading::of(&view, voronoi(&player_sites(view.frame()), self.voronoi_bounds())))
    }

    pub fn delaunay(&self, index: usize) -> QueryResult<FrameReading<Vec<DelaunayEdge>>> {
        Ok(self.voronoi(index)?.map(|cells| delaunay(&cells)))
    }

    /// `k` entities (players and ball) nearest to `point` at frame `index`.
    pub fn knn(&self, index: usize, point: Vec2, k: usize) -> QueryResult<FrameReading<Vec<Neighbor>>> {
        let view = self.cache.get_frame(index)?;
        let frame = view.frame();
        let mut sites = player_sites(frame);
        sites.push(Site { entity: EntityId::Ball, team: None, position: frame.ball.position() });
        let spatial_index = build_index(self.config.knn_backend, sites, self.pitch.bounds());
        Ok(FrameReading::of(&view, spatial_index.nearest(point, k)))
    }

    pub fn pitch_control(&self, index: usize) -> QueryResult<FrameReading<PitchControlGrid>> {
        let view = self.cache.get_frame(index)?;
        let cells = voronoi(&player_sites(view.frame()), self.voronoi_bounds());
        let grid = self.pitch_control_with(&view, &cells)?;
        Ok(FrameReading::of(&view, grid))
    }

    pub fn team_shape(&self, index: usize, team: Team) -> QueryResult<FrameReading<Option<TeamShape>>> {
        let view = self.cache.get_frame(index)?;
        let shape = self.shape_of(view.frame(), team);
        Ok(FrameReading::of(&view, shape))
    }

    /// Formation of `team` at `index` after hysteresis. Stale when frame
    /// `index` itself is served from a fallback.
    pub fn formation(&self, index: usize, team: Team) -> QueryResult<FrameReading<Option<FormationReading>>> {
        let view = self.cache.get_frame(index)?;
        Ok(FrameReading::of(&view, self.settled_formation(index, team)?))
    }

    fn settled_formation(&self, index: usize, team: Team) -> QueryResult<Option<FormationReading>> {
        let cfg = &self.config.formation;
        let min_frames = self.timeline.frames_for(cfg.min_duration_s);
        let lookback = self.timeline.frames_for(cfg.lookback_s);
        formation::settle(index, min_frames, lookback, |f| self.raw_formation(f, team))
    }

    /// Unsmoothed classification of a single frame.
    pub fn raw_formation(&self, index: usize, team: Team) -> QueryResult<Option<FormationGuess>> {
        let key = (index, team);
        if let Some(hit) = self.formations.get(&key) {
            return hit;
        }
        let view = self.cache.get_frame(index)?;
        let classify = || {
            let frame = view.frame();
            let orientation = self.orientation(frame, team);
            let (outfield, _) = self.outfield(frame, team);
            let depths: Vec<f64> = outfield.iter().map(|p| orientation.depth(&self.pitch, p.x as f64)).collect();
            Ok(formation::classify(&depths, &self.config.formation))
        };
        if view.is_stale() {
            return classify();
        }
        self.formations.get_or_compute(key, classify)
    }

    fn build_snapshot(&self, index: usize, view: &FrameView) -> QueryResult<SpatialSnapshot> {
        let frame = view.frame();
        let cells = voronoi(&player_sites(frame), self.voronoi_bounds());
        let edges = delaunay(&cells);
        let control = self.pitch_control_with(view, &cells)?;
        let home = self.team_geometry(index, frame, Team::Home)?;
        let away = self.team_geometry(index, frame, Team::Away)?;
        debug!(
            frame = index,
            served = view.index(),
            stale = view.is_stale(),
            cells = cells.len(),
            home_control = control.share(Team::Home),
            "spatial snapshot"
        );
        Ok(SpatialSnapshot {
            frame: index,
            timestamp: frame.timestamp,
            stale: view.is_stale(),
            home,
            away,
            voronoi: cells,
            delaunay: edges,
            pitch_control: control,
        })
    }

    fn team_geometry(&self, index: usize, frame: &Frame, team: Team) -> QueryResult<TeamGeometry> {
        let (outfield, goalkeeper) = self.outfield(frame, team);
        Ok(TeamGeometry {
            team,
            goalkeeper,
            hull: convex_hull(&positions(&outfield)),
            shape: self.shape_of(frame, team),
            formation: self.settled_formation(index, team)?,
        })
    }

    fn shape_of(&self, frame: &Frame, team: Team) -> Option<TeamShape> {
        let (outfield, _) = self.outfield(frame, team);
        let (opponents, _) = self.outfield(frame, team.opponent());
        team_shape(
            team,
            &positions(&outfield),
            &positions(&opponents),
            frame.ball.position(),
            self.orientation(frame, team),
            &self.pitch,
        )
    }

    fn pitch_control_with(&self, view: &FrameView, cells: &[VoronoiCell]) -> QueryResult<PitchControlGrid> {
        let movers = self.movers(view)?;
        Ok(pitch_control(&movers, cells, self.pitch.bounds(), &self.config.pitch_control))
    }

    /// Players with one-frame backward-difference velocities.
    fn movers(&self, view: &FrameView) -> QueryResult<Vec<Mover>> {
        let index = view.index();
        let frame = view.frame();
        let previous = match index.checked_sub(1) {
            Some(prev) => {
                let prev_view = self.cache.get_frame(prev)?;
                (!prev_view.is_stale() && prev_view.index() == prev).then_some(prev_view)
            }
            None => None,
        };
        let dt = previous.as_ref().map(|p| frame.timestamp - p.timestamp());

        Ok(frame
            .present_players()
            .map(|player| {
                let velocity = match (&previous, dt) {
                    (Some(prev), Some(dt)) if dt > 0.0 => prev
                        .player(player.id)
                        .map_or(Vec2::zeros(), |before| (player.position() - before.position()) / dt),
                    _ => Vec2::zeros(),
                };
                Mover { entity: EntityId::Player(player.id), team: player.team, position: player.position(), velocity }
            })
            .collect())
    }

    fn voronoi_bounds(&self) -> Rect {
        self.pitch.bounds().expanded(self.config.voronoi_margin_m)
    }

    /// Attacking direction inferred from where the two teams stand.
    fn orientation(&self, frame: &Frame, team: Team) -> Orientation {
        let mean_x = |t: Team| {
            let xs: Vec<f64> = frame.team_players(t).map(|p| p.x as f64).collect();
            (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
        };
        let attacks_positive_x = match (mean_x(team), mean_x(team.opponent())) {
            (Some(own), Some(other)) if own != other => own < other,
            (Some(own), None) if own != 0.0 => own < 0.0,
            _ => team == Team::Home,
        };
        Orientation { attacks_positive_x }
    }

    /// Outfield players of `team` and the excluded goalkeeper.
    fn outfield<'f>(&self, frame: &'f Frame, team: Team) -> (Vec<&'f PlayerSample>, Option<u32>) {
        let players: Vec<&PlayerSample> = frame.team_players(team).collect();
        if !self.config.exclude_goalkeeper {
            return (players, None);
        }
        let goalkeeper = if self.config.goalkeeper_ids.is_empty() {
            self.goalkeeper_by_position(frame, team, &players)
        } else {
            players.iter().find(|p| self.config.goalkeeper_ids.contains(&p.id)).map(|p| p.id)
        };
        trace!(?team, ?goalkeeper, "outfield selection");
        let outfield = players.into_iter().filter(|p| Some(p.id) != goalkeeper).collect();
        (outfield, goalkeeper)
    }

    /// The deepest player of the team, if standing in its own penalty area.
    fn goalkeeper_by_position(&self, frame: &Frame, team: Team, players: &[&PlayerSample]) -> Option<u32> {
        let orientation = self.orientation(frame, team);
        let deepest = players.iter().min_by(|a, b| {
            orientation
                .depth(&self.pitch, a.x as f64)
                .total_cmp(&orientation.depth(&self.pitch, b.x as f64))
                .then(a.id.cmp(&b.id))
        })?;
        let p = deepest.position();
        let own_half = orientation.depth(&self.pitch, p.x) < self.pitch.half_length();
        (own_half && self.pitch.in_penalty_box(p)).then_some(deepest.id)
    }
}

fn player_sites(frame: &Frame) -> Vec<Site> {
    frame
        .present_players()
        .map(|p| Site { entity: EntityId::Player(p.id), team: Some(p.team), position: p.position() })
        .collect()
}

fn positions(players: &[&PlayerSample]) -> Vec<Vec2> {
    players.iter().map(|p| p.position()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::loader::testing::OutageLoader;
    use crate::cache::{MemoryBudget, SegmentLoader, StoreLoader};
    use crate::config::{EngineConfig, WindowConfig};
    use crate::store::{BallSample, FrameStore, PLAYER_SLOTS};

    const HOME: [(f64, f64); 11] = [
        (-50.0, 0.0),
        (-35.0, -20.0),
        (-35.0, -7.0),
        (-35.0, 7.0),
        (-35.0, 20.0),
        (-20.0, -20.0),
        (-20.0, -7.0),
        (-20.0, 7.0),
        (-20.0, 20.0),
        (-5.0, -5.0),
        (-5.0, 5.0),
    ];
    const AWAY: [(f64, f64); 11] = [
        (50.0, 0.0),
        (35.0, -20.0),
        (35.0, -7.0),
        (35.0, 7.0),
        (35.0, 20.0),
        (20.0, -15.0),
        (20.0, 0.0),
        (20.0, 15.0),
        (5.0, -15.0),
        (5.0, 0.0),
        (5.0, 15.0),
    ];

    /// Home (ids 1-11, keeper 1) in a 4-4-2 drifting forward at 0.1 m/s;
    /// away (ids 12-22, keeper 12) standing in a 4-3-3.
    fn store() -> Arc<FrameStore> {
        let frames = (0..120)
            .map(|i| {
                let mut players = [None; PLAYER_SLOTS];
                for (slot, &(x, y)) in HOME.iter().enumerate() {
                    let x = x + 0.01 * i as f64;
                    players[slot] = Some(PlayerSample { id: slot as u32 + 1, team: Team::Home, x: x as f32, y: y as f32 });
                }
                for (slot, &(x, y)) in AWAY.iter().enumerate() {
                    players[11 + slot] = Some(PlayerSample { id: slot as u32 + 12, team: Team::Away, x: x as f32, y: y as f32 });
                }
                Frame { timestamp: i as f64 * 0.1, period: 1, ball: BallSample { x: 0.0, y: 0.0, z: 0.0 }, players }
            })
            .collect();
        Arc::new(FrameStore::from_frames(frames, 10.0).unwrap())
    }

    fn analyzer(config: SpatialConfig) -> SpatialAnalyzer {
        let store = store();
        let engine = EngineConfig::testing();
        let loader = Arc::new(StoreLoader::new(store.clone(), engine.window.load_chunk_frames));
        analyzer_over(store, loader, engine.window, config)
    }

    fn analyzer_over(
        store: Arc<FrameStore>,
        loader: Arc<dyn SegmentLoader>,
        window: WindowConfig,
        config: SpatialConfig,
    ) -> SpatialAnalyzer {
        let engine = EngineConfig::testing();
        let cache = Arc::new(WindowedCache::new(loader, window, MemoryBudget::shared(usize::MAX)));
        let config = SpatialConfig { pitch_control: engine.spatial.pitch_control.clone(), ..config };
        SpatialAnalyzer::new(cache, store.timeline().clone(), Pitch::default(), config)
    }

    #[test]
    fn test_goalkeeper_excluded_from_hull() {
        let analyzer = analyzer(SpatialConfig::default());
        let snapshot = analyzer.snapshot(80).unwrap();
        assert_eq!(snapshot.home.goalkeeper, Some(1));
        assert_eq!(snapshot.away.goalkeeper, Some(12));
        let hull = &snapshot.home.hull;
        assert!(hull.area > 0.0);
        assert!(!hull.contains(Vec2::new(-50.0 + 0.8, 0.0)));
        let reading = analyzer.convex_hull(80, Team::Home).unwrap();
        assert!(!reading.stale);
        assert_eq!(reading.served, 80);
        assert_eq!(*hull, reading.value);
    }

    #[test]
    fn test_configured_goalkeeper_ids() {
        let analyzer = analyzer(SpatialConfig { goalkeeper_ids: vec![2, 13], ..SpatialConfig::default() });
        let snapshot = analyzer.snapshot(10).unwrap();
        assert_eq!(snapshot.home.goalkeeper, Some(2));
        assert_eq!(snapshot.away.goalkeeper, Some(13));
        assert_eq!(snapshot.home.shape.as_ref().unwrap().players, 10);
    }

    #[test]
    fn test_formations_and_hysteresis() {
        let analyzer = analyzer(SpatialConfig::default());
        let home = analyzer.formation(80, Team::Home).unwrap().value.unwrap();
        assert_eq!(home.label, "4-4-2");
        assert!(home.settled);
        let away = analyzer.formation(80, Team::Away).unwrap().value.unwrap();
        assert_eq!(away.label, "4-3-3");

        let early = analyzer.formation(10, Team::Home).unwrap().value.unwrap();
        assert_eq!(early.label, "4-4-2");
        assert!(!early.settled);
    }

    #[test]
    fn test_snapshot_is_cached_per_frame() {
        let analyzer = analyzer(SpatialConfig::default());
        let a = analyzer.snapshot(60).unwrap();
        let b = analyzer.snapshot(60).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(analyzer.snapshot_stats().computations, 1);
        assert!(analyzer.snapshot(500).is_err());
    }

    #[test]
    fn test_voronoi_and_pitch_control() {
        let analyzer = analyzer(SpatialConfig::default());
        let snapshot = analyzer.snapshot(30).unwrap();
        assert_eq!(snapshot.voronoi.len(), 22);
        let total: f64 = snapshot.voronoi.iter().map(|c| c.area).sum();
        assert!((total - 115.0 * 78.0).abs() < 1e-6);
        assert!(!snapshot.delaunay.is_empty());

        let grid = &snapshot.pitch_control;
        assert_eq!((grid.cols, grid.rows), (12, 8));
        assert!(grid.home.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(grid.home(0, 4).unwrap() > 0.5);
        assert!(grid.home(11, 4).unwrap() < 0.5);
    }

    #[test]
    fn test_knn_includes_ball() {
        let analyzer = analyzer(SpatialConfig::default());
        let near = analyzer.knn(40, Vec2::new(0.0, 0.0), 3).unwrap().value;
        assert_eq!(near[0].entity, EntityId::Ball);
        assert_eq!(near[0].team, None);
        assert!(near.windows(2).all(|w| w[0].distance <= w[1].distance));

        let grid = self::analyzer(SpatialConfig { knn_backend: crate::config::KnnBackend::Grid, ..SpatialConfig::default() });
        assert_eq!(grid.knn(40, Vec2::new(0.0, 0.0), 3).unwrap().value, near);
    }

    #[test]
    fn test_accessors_flag_fallback_frames() {
        let store = store();
        let loader = Arc::new(OutageLoader::new(store.clone(), 60));
        let window = WindowConfig {
            size_frames: 40,
            margin_frames: 4,
            load_chunk_frames: 8,
            prefetch_workers: 0,
            max_retries: 0,
            ..WindowConfig::default()
        };
        let analyzer = analyzer_over(store, loader.clone(), window, SpatialConfig::default());
        analyzer.convex_hull(20, Team::Home).unwrap();

        let hull = analyzer.convex_hull(100, Team::Home).unwrap();
        assert!(hull.stale);
        assert_eq!(hull.frame, 100);
        assert_ne!(hull.served, 100);
        assert!(analyzer.voronoi(100).unwrap().stale);
        assert!(analyzer.delaunay(100).unwrap().stale);
        assert!(analyzer.knn(100, Vec2::zeros(), 2).unwrap().stale);
        assert!(analyzer.pitch_control(100).unwrap().stale);
        assert!(analyzer.team_shape(100, Team::Away).unwrap().stale);
        assert!(analyzer.formation(100, Team::Home).unwrap().stale);
        assert!(analyzer.snapshot(100).unwrap().stale);

        loader.restore();
        analyzer.cache.clear_degraded();
        let hull = analyzer.convex_hull(100, Team::Home).unwrap();
        assert!(!hull.stale);
        assert_eq!(hull.served, 100);
        assert!(!analyzer.snapshot(100).unwrap().stale);
    }
}
