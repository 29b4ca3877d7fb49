mod common;

use once_cell::sync::Lazy;
use proptest::prelude::*;

use common::MatchBuilder;
use replay_core::config::EventConfig;
use replay_core::spatial::convex_hull;
use replay_core::spatial::geometry::is_simple;
use replay_core::store::Timeline;
use replay_core::{
    EngineConfig, EntityId, Event, EventFilter, EventIndex, EventType, FrameRange, MatchSession, SampleKind, Team,
    Vec2,
};

const FRAMES: usize = 300;

/// Player 5 wanders on a Lissajous path, player 6 teleports every 50 frames
/// and vanishes for three seconds in the middle.
static SESSION: Lazy<MatchSession> = Lazy::new(|| {
    let builder = MatchBuilder::new(FRAMES)
        .player(5, Team::Home, |i| {
            let t = i as f64 / 10.0;
            Some((20.0 * (0.11 * t).sin(), 15.0 * (0.07 * t).cos()))
        })
        .player(6, Team::Home, |i| {
            if (140..170).contains(&i) {
                return None;
            }
            let jump = (i / 50) as f64 * 30.0;
            Some((-45.0 + jump * 0.5 + 0.02 * i as f64, -10.0))
        })
        .stationary(30, Team::Away, 10.0, 10.0);
    MatchSession::open("properties", builder.store(), Vec::new(), EngineConfig::testing()).expect("session opens")
});

fn point() -> impl Strategy<Value = Vec2> {
    (-52.5f64..52.5, -34.0f64..34.0).prop_map(|(x, y)| Vec2::new(x, y))
}

fn total_distance(entity: EntityId, start: usize, end: usize) -> f64 {
    SESSION
        .get_metric(entity, "distance", FrameRange::new(start, end))
        .map(|v| v.as_distance().map_or(0.0, |d| d.total))
        .unwrap_or(0.0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn hull_is_simple_and_contains_inputs(points in prop::collection::vec(point(), 0..30)) {
        let hull = convex_hull(&points);
        prop_assert!(hull.area >= 0.0);
        prop_assert!(is_simple(&hull.boundary));
        for p in &points {
            prop_assert!(hull.contains(*p), "{:?} outside {:?}", p, hull.boundary);
        }
    }

    #[test]
    fn distance_is_additive(a in 0usize..FRAMES, b in 0usize..FRAMES, c in 0usize..FRAMES, wanderer in any::<bool>()) {
        let mut cut = [a, b, c];
        cut.sort_unstable();
        let [start, mid, end] = cut;
        let entity = if wanderer { EntityId::Player(5) } else { EntityId::Player(6) };
        let whole = total_distance(entity, start, end);
        let parts = total_distance(entity, start, mid) + total_distance(entity, mid, end);
        prop_assert!((whole - parts).abs() < 1e-6, "{} != {}", whole, parts);
    }

    #[test]
    fn interpolation_on_samples_is_exact(index in 0usize..FRAMES, wanderer in any::<bool>()) {
        let entity = if wanderer { EntityId::Player(5) } else { EntityId::Player(6) };
        let view = SESSION.get_frame(index).unwrap();
        if let Some(position) = view.position(entity) {
            let sample = SESSION.interpolate(entity, view.timestamp()).unwrap();
            prop_assert_eq!(sample.kind, SampleKind::Exact);
            prop_assert_eq!(sample.position, position);
        }
    }

    #[test]
    fn speed_stays_plausible_outside_gap_recovery(start in 0usize..FRAMES - 1, len in 1usize..120) {
        let end = (start + len).min(FRAMES - 1);
        let limit = SESSION.config().metrics.max_plausible_speed_mps;
        for entity in [EntityId::Player(5), EntityId::Player(6)] {
            let Ok(speed) = SESSION.get_metric(entity, "speed", FrameRange::new(start, end)) else {
                continue;
            };
            for point in speed.as_series().unwrap() {
                if let (Some(v), false) = (point.value, point.flagged) {
                    prop_assert!(v <= limit + 1e-9, "{} m/s at frame {}", v, point.frame);
                }
            }
        }
    }

    #[test]
    fn next_and_previous_are_inverse(
        mut frames in prop::collection::vec(0usize..500, 1..60),
        kinds in prop::collection::vec(0usize..3, 60),
        at in 0usize..500,
    ) {
        const KINDS: [EventType; 3] = [EventType::Pass, EventType::Shot, EventType::Tackle];
        frames.sort_unstable();
        let events: Vec<Event> = frames
            .iter()
            .zip(&kinds)
            .map(|(&f, &k)| Event::new(f, f as f64 / 10.0, KINDS[k]))
            .collect();
        let timeline = Timeline::new((0..500).map(|i| i as f64 / 10.0).collect(), 10.0);
        let index = EventIndex::build(events.clone(), &timeline, EventConfig::default()).unwrap();

        for kind in KINDS {
            let filter = EventFilter::of_type(kind);
            if events.iter().any(|e| e.frame == at && e.kind == kind) {
                continue;
            }
            let Some(next) = index.next_event(at, &filter) else {
                continue;
            };
            let expected = events.iter().filter(|e| e.kind == kind && e.frame <= at).last();
            let back = index.previous_event(next.frame, &filter);
            prop_assert_eq!(back, expected);
        }
    }
}
