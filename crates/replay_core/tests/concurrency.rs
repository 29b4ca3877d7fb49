mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{noisy_lineups, walk_and_gap};
use replay_core::cache::MemoryBudget;
use replay_core::{EngineConfig, EntityId, FrameRange, MatchSession, Playhead, TravelDirection};

#[test]
fn identical_metric_requests_compute_once() {
    let session = Arc::new(common::session(&walk_and_gap()));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let session = session.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                session.get_metric(EntityId::Player(7), "heatmap", FrameRange::new(0, 99)).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(session.metrics().computations(), 1);
    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn batch_export_shares_the_cache() {
    let session = common::session(&noisy_lineups(80, 0.2, 11));
    let entities: Vec<EntityId> = (1..=22).map(EntityId::Player).collect();
    let range = FrameRange::new(0, 79);
    let results = session.metrics().compute_batch(&entities, "distance", range);
    assert_eq!(results.len(), 22);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    let computed = session.metrics().computations();

    session.get_metric(EntityId::Player(5), "distance", range).unwrap();
    assert_eq!(session.metrics().computations(), computed);
}

#[test]
fn sequential_playback_stays_ahead_of_the_window() {
    let session = common::session(&noisy_lineups(400, 0.1, 5));
    let mut playhead = Playhead::default();
    playhead.speed = 4.0;
    session.seek(&mut playhead, 0).unwrap();

    let mut last = 0;
    while playhead.frame < session.frame_count() - 1 {
        let view = session.tick(&mut playhead, 0.1).unwrap();
        assert!(!view.is_stale());
        assert!(view.index() > last);
        last = view.index();
        session.cache().wait_idle(Duration::from_secs(1));
    }
    let status = session.cache_status();
    assert!(status.prefetches_started > 0);
    assert!(status.degraded.is_empty());
}

#[test]
fn backward_seek_changes_direction() {
    let session = common::session(&noisy_lineups(200, 0.1, 9));
    let mut playhead = Playhead::default();
    session.seek(&mut playhead, 150).unwrap();
    session.seek(&mut playhead, 120).unwrap();
    assert_eq!(playhead.direction, TravelDirection::Backward);
    let view = session.tick(&mut playhead, 1.0).unwrap();
    assert_eq!(view.index(), 110);
    assert!(session.seek(&mut playhead, 200).is_err());
    assert_eq!(playhead.frame, 110);
}

#[test]
fn sessions_share_one_memory_budget() {
    let budget = MemoryBudget::shared(usize::MAX);
    let open = |id: &str| {
        MatchSession::open_with_budget(id, walk_and_gap().store(), Vec::new(), EngineConfig::testing(), budget.clone())
            .unwrap()
    };
    let first = open("first");
    let second = open("second");

    first.get_frame(10).unwrap();
    let after_first = budget.used();
    assert!(after_first > 0);
    second.get_frame(10).unwrap();
    assert!(budget.used() > after_first);

    drop(first);
    drop(second);
    assert_eq!(budget.used(), 0);
}
