use std::mem::size_of;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::MetricsConfig;
use crate::coordinates::Pitch;
use crate::error::{QueryError, QueryResult};
use crate::interp::Interpolator;
use crate::memo::{MemoCache, MemoStats};
use crate::store::EntityId;

use super::registry::{MetricContext, MetricFn, MetricRegistry};
use super::types::{FrameRange, MetricKey, MetricValue};

/// Cached outcome; a "no data" result is cached like any other. Outcomes that
/// read a degraded window are returned but never cached.
type Outcome = Result<Arc<MetricValue>, QueryError>;

fn weigh(outcome: &Outcome) -> usize {
    size_of::<MetricKey>()
        + match outcome {
            Ok(value) => value.approx_bytes(),
            Err(_) => size_of::<QueryError>(),
        }
}

/// Computes registered metrics on demand and memoises each
/// `(entity, metric, range)` result. Identical concurrent requests share
/// one computation.
pub struct MetricsEngine {
    interp: Arc<Interpolator>,
    registry: MetricRegistry,
    cache: MemoCache<MetricKey, Outcome>,
    config: MetricsConfig,
    pitch: Pitch,
}

impl MetricsEngine {
    pub fn new(interp: Arc<Interpolator>, config: MetricsConfig, pitch: Pitch) -> Self {
        Self::with_registry(interp, MetricRegistry::with_builtins(), config, pitch)
    }

    pub fn with_registry(
        interp: Arc<Interpolator>,
        registry: MetricRegistry,
        config: MetricsConfig,
        pitch: Pitch,
    ) -> Self {
        let cache = MemoCache::new("metrics", config.cache_budget_bytes, weigh);
        Self { interp, registry, cache, config, pitch }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Add or replace a metric. Cached results of a replaced metric are dropped.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&MetricContext<'_>, EntityId, FrameRange) -> QueryResult<MetricValue> + Send + Sync + 'static,
    {
        if self.registry.get(name).is_some() {
            self.cache.clear();
        }
        self.registry.register(name, f);
    }

    pub fn get_metric(&self, entity: EntityId, metric: &str, range: FrameRange) -> QueryResult<Arc<MetricValue>> {
        let f = self.validate(entity, metric, range)?.clone();
        let key = MetricKey { entity, metric: metric.to_string(), range };
        self.cache.get_or_compute_if(key, || {
            debug!(%entity, metric, %range, "computing metric");
            let ctx = MetricContext::new(&self.interp, &self.config, self.pitch);
            let mut outcome = f(&ctx, entity, range).map(Arc::new);
            let degraded = ctx.read_degraded();
            if degraded {
                // Frames were missing, not the entity.
                if matches!(&outcome, Err(e) if e.is_no_data()) {
                    outcome = Err(QueryError::Unavailable {
                        start: range.start,
                        end: range.end + 1,
                        reason: "window degraded".to_string(),
                    });
                }
                debug!(%entity, metric, %range, "metric read a degraded window; not cached");
            }
            if let Err(e) = &outcome {
                if !e.is_no_data() {
                    warn!(%entity, metric, %range, error = %e, "metric failed");
                }
            }
            (outcome, !degraded)
        })
    }

    /// The same metric for many entities, computed in parallel.
    pub fn compute_batch(
        &self,
        entities: &[EntityId],
        metric: &str,
        range: FrameRange,
    ) -> Vec<(EntityId, QueryResult<Arc<MetricValue>>)> {
        entities
            .par_iter()
            .map(|&entity| (entity, self.get_metric(entity, metric, range)))
            .collect()
    }

    pub fn is_cached(&self, entity: EntityId, metric: &str, range: FrameRange) -> bool {
        self.cache.contains(&MetricKey { entity, metric: metric.to_string(), range })
    }

    /// Number of metric computations actually run.
    pub fn computations(&self) -> u64 {
        self.cache.computations()
    }

    pub fn cache_stats(&self) -> MemoStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn validate(&self, entity: EntityId, metric: &str, range: FrameRange) -> QueryResult<&MetricFn> {
        let f = self
            .registry
            .get(metric)
            .ok_or_else(|| QueryError::UnknownMetric(metric.to_string()))?;
        if range.is_empty() {
            return Err(QueryError::InvalidRange { start: range.start, end: range.end });
        }
        let frame_count = self.interp.timeline().len();
        if range.end >= frame_count {
            return Err(QueryError::OutOfRange { index: range.end, frame_count });
        }
        self.interp.check_entity(entity)?;
        Ok(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::loader::testing::OutageLoader;
    use crate::cache::{MemoryBudget, SegmentLoader, StoreLoader, WindowedCache};
    use crate::config::{InterpolationConfig, WindowConfig};
    use crate::store::{BallSample, Frame, FrameStore, PlayerSample, Team, PLAYER_SLOTS};
    use std::sync::Barrier;
    use std::thread;

    /// Player 7 walks x = 10 * i / 99 over 100 frames; player 8 is absent
    /// between frames 40 and 70.
    fn store() -> Arc<FrameStore> {
        let frames = (0..100)
            .map(|i| {
                let mut players = [None; PLAYER_SLOTS];
                players[0] = Some(PlayerSample { id: 7, team: Team::Home, x: (10.0 * i as f64 / 99.0) as f32, y: 0.0 });
                if !(40..70).contains(&i) {
                    players[1] = Some(PlayerSample { id: 8, team: Team::Home, x: 1.0, y: 1.0 });
                }
                players[11] = Some(PlayerSample { id: 20, team: Team::Away, x: 5.0, y: 5.0 });
                Frame { timestamp: i as f64 * 0.1, period: 1, ball: BallSample { x: 0.0, y: 0.0, z: 0.0 }, players }
            })
            .collect();
        Arc::new(FrameStore::from_frames(frames, 10.0).unwrap())
    }

    fn engine() -> MetricsEngine {
        let store = store();
        let window = WindowConfig { size_frames: 40, margin_frames: 4, load_chunk_frames: 8, ..WindowConfig::default() };
        let loader = Arc::new(StoreLoader::new(store.clone(), 8));
        engine_over(store, loader, window)
    }

    fn engine_over(store: Arc<FrameStore>, loader: Arc<dyn SegmentLoader>, window: WindowConfig) -> MetricsEngine {
        let cache = Arc::new(WindowedCache::new(loader, window, MemoryBudget::shared(usize::MAX)));
        let interp = Arc::new(Interpolator::new(
            cache,
            store.timeline().clone(),
            Arc::new(store.roster().clone()),
            InterpolationConfig::default(),
        ));
        MetricsEngine::new(interp, MetricsConfig::default(), Pitch::default())
    }

    #[test]
    fn test_linear_walk() {
        let engine = engine();
        let range = FrameRange::new(0, 99);
        let speed = engine.get_metric(EntityId::Player(7), "speed", range).unwrap();
        let series = speed.as_series().unwrap();
        assert_eq!(series[0].value, None);
        assert!(series[1..].iter().all(|p| (p.value.unwrap() - 1.0101).abs() < 1e-3));

        let distance = engine.get_metric(EntityId::Player(7), "distance", range).unwrap();
        assert!((distance.as_distance().unwrap().total - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_results_are_cached() {
        let engine = engine();
        let range = FrameRange::new(10, 50);
        let a = engine.get_metric(EntityId::Player(7), "max_speed", range).unwrap();
        let b = engine.get_metric(EntityId::Player(7), "max_speed", range).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.computations(), 1);
        assert!(engine.is_cached(EntityId::Player(7), "max_speed", range));
    }

    #[test]
    fn test_concurrent_requests_compute_once() {
        let engine = Arc::new(engine());
        let barrier = Arc::new(Barrier::new(6));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.get_metric(EntityId::Player(7), "distance", FrameRange::new(0, 99)).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(engine.computations(), 1);
    }

    #[test]
    fn test_no_data_inside_long_gap() {
        let engine = engine();
        let err = engine.get_metric(EntityId::Player(8), "average_speed", FrameRange::new(50, 60)).unwrap_err();
        assert!(err.is_no_data());
        // Cached as well.
        let _ = engine.get_metric(EntityId::Player(8), "average_speed", FrameRange::new(50, 60));
        assert_eq!(engine.computations(), 1);
    }

    #[test]
    fn test_validation_precedes_computation() {
        let engine = engine();
        assert!(matches!(
            engine.get_metric(EntityId::Player(7), "teleports", FrameRange::new(0, 5)),
            Err(QueryError::UnknownMetric(_))
        ));
        assert!(matches!(
            engine.get_metric(EntityId::Player(7), "speed", FrameRange::new(5, 2)),
            Err(QueryError::InvalidRange { start: 5, end: 2 })
        ));
        assert!(matches!(
            engine.get_metric(EntityId::Player(7), "speed", FrameRange::new(0, 100)),
            Err(QueryError::OutOfRange { index: 100, .. })
        ));
        assert!(matches!(
            engine.get_metric(EntityId::Player(42), "speed", FrameRange::new(0, 5)),
            Err(QueryError::UnknownEntity(_))
        ));
        assert_eq!(engine.computations(), 0);
    }

    #[test]
    fn test_custom_metric_and_batch() {
        let mut engine = engine();
        engine.register("samples", |ctx, entity, range| {
            let path = ctx.path(entity, range)?;
            let valid = path.samples.iter().filter(|s| s.frame >= range.start && s.is_valid()).count();
            Ok(MetricValue::Scalar(valid as f64))
        });
        let entities = [EntityId::Player(7), EntityId::Player(8), EntityId::Player(20)];
        let results = engine.compute_batch(&entities, "samples", FrameRange::new(0, 99));
        assert_eq!(results.len(), 3);
        let by_entity = |e: EntityId| results.iter().find(|(id, _)| *id == e).unwrap().1.clone().unwrap();
        assert_eq!(by_entity(EntityId::Player(7)).as_scalar(), Some(100.0));
        assert_eq!(by_entity(EntityId::Player(8)).as_scalar(), Some(70.0));
    }

    #[test]
    fn test_degraded_window_result_is_not_cached() {
        let store = store();
        let loader = Arc::new(OutageLoader::new(store.clone(), 50));
        let window = WindowConfig {
            size_frames: 40,
            margin_frames: 4,
            load_chunk_frames: 8,
            prefetch_workers: 0,
            max_retries: 0,
            ..WindowConfig::default()
        };
        let engine = engine_over(store, loader.clone(), window);
        engine.interp.cache().get_frame(10).unwrap();

        let player = EntityId::Player(7);
        let range = FrameRange::new(70, 90);
        let err = engine.get_metric(player, "distance", range).unwrap_err();
        assert!(matches!(err, QueryError::Unavailable { .. }));
        assert!(!err.is_no_data());
        assert!(!engine.is_cached(player, "distance", range));

        loader.restore();
        engine.interp.cache().clear_degraded();
        let distance = engine.get_metric(player, "distance", range).unwrap();
        assert!((distance.as_distance().unwrap().total - 20.0 * 10.0 / 99.0).abs() < 1e-3);
        assert!(engine.is_cached(player, "distance", range));
        assert_eq!(engine.computations(), 2);
    }
}
