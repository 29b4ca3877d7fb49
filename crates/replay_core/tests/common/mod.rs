//! Synthetic matches shared by the integration tests.

#![allow(dead_code)]

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use replay_core::store::{BallSample, PLAYER_SLOTS};
use replay_core::{EngineConfig, Frame, FrameStore, MatchSession, PlayerSample, Team};

pub const SAMPLE_RATE_HZ: f64 = 10.0;

/// Home 4-4-2 shape (ids 1..=11, goalkeeper 1), attacking +x.
pub const HOME_442: [(f64, f64); 11] = [
    (-50.0, 0.0),
    (-35.0, -24.0),
    (-35.0, -8.0),
    (-35.0, 8.0),
    (-35.0, 24.0),
    (-18.0, -24.0),
    (-18.0, -8.0),
    (-18.0, 8.0),
    (-18.0, 24.0),
    (-4.0, -8.0),
    (-4.0, 8.0),
];

/// Away 4-3-3 shape (ids 12..=22, goalkeeper 12), attacking -x.
pub const AWAY_433: [(f64, f64); 11] = [
    (50.0, 0.0),
    (35.0, -24.0),
    (35.0, -8.0),
    (35.0, 8.0),
    (35.0, 24.0),
    (20.0, -15.0),
    (20.0, 0.0),
    (20.0, 15.0),
    (6.0, -20.0),
    (6.0, 0.0),
    (6.0, 20.0),
];

/// Frame-by-frame description of a synthetic match.
pub struct MatchBuilder {
    frames: usize,
    players: Vec<(u32, Team, Box<dyn Fn(usize) -> Option<(f64, f64)>>)>,
    ball: Box<dyn Fn(usize) -> (f64, f64)>,
}

impl MatchBuilder {
    pub fn new(frames: usize) -> Self {
        Self { frames, players: Vec::new(), ball: Box::new(|_| (0.0, 0.0)) }
    }

    /// Add a player whose position at frame `i` is `path(i)`; `None` is absent.
    pub fn player(mut self, id: u32, team: Team, path: impl Fn(usize) -> Option<(f64, f64)> + 'static) -> Self {
        self.players.push((id, team, Box::new(path)));
        self
    }

    pub fn stationary(self, id: u32, team: Team, x: f64, y: f64) -> Self {
        self.player(id, team, move |_| Some((x, y)))
    }

    pub fn ball(mut self, path: impl Fn(usize) -> (f64, f64) + 'static) -> Self {
        self.ball = Box::new(path);
        self
    }

    /// Both full line-ups standing in their base shapes.
    pub fn full_lineups(mut self) -> Self {
        for (slot, &(x, y)) in HOME_442.iter().enumerate() {
            self = self.stationary(slot as u32 + 1, Team::Home, x, y);
        }
        for (slot, &(x, y)) in AWAY_433.iter().enumerate() {
            self = self.stationary(slot as u32 + 12, Team::Away, x, y);
        }
        self
    }

    pub fn frames(&self) -> Vec<Frame> {
        (0..self.frames)
            .map(|i| {
                let mut players = [None; PLAYER_SLOTS];
                for (slot, (id, team, path)) in self.players.iter().enumerate().take(PLAYER_SLOTS) {
                    players[slot] = path(i).map(|(x, y)| PlayerSample { id: *id, team: *team, x: x as f32, y: y as f32 });
                }
                let (bx, by) = (self.ball)(i);
                Frame {
                    timestamp: i as f64 / SAMPLE_RATE_HZ,
                    period: 1,
                    ball: BallSample { x: bx as f32, y: by as f32, z: 0.0 },
                    players,
                }
            })
            .collect()
    }

    pub fn store(&self) -> FrameStore {
        FrameStore::from_frames(self.frames(), SAMPLE_RATE_HZ).expect("synthetic match is valid")
    }
}

/// 100 frames; player 7 walks from (0, 0) to (10, 0), player 8 disappears
/// for two seconds (frames 40..60), player 20 stands still.
pub fn walk_and_gap() -> MatchBuilder {
    MatchBuilder::new(100)
        .player(7, Team::Home, |i| Some((10.0 * i as f64 / 99.0, 0.0)))
        .player(8, Team::Home, |i| (!(40..60).contains(&i)).then_some((-10.0 + 0.05 * i as f64, 5.0)))
        .stationary(20, Team::Away, 15.0, -5.0)
}

/// Full line-ups with seeded positional noise around their base shapes.
pub fn noisy_lineups(frames: usize, sigma_m: f64, seed: u64) -> MatchBuilder {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sigma_m).expect("sigma is positive");
    let mut jitter: Vec<Vec<(f64, f64)>> = Vec::with_capacity(22);
    for _ in 0..22 {
        jitter.push((0..frames).map(|_| (noise.sample(&mut rng), noise.sample(&mut rng))).collect());
    }
    let mut builder = MatchBuilder::new(frames).ball(|i| (-20.0 + 0.2 * i as f64, 3.0));
    for (slot, &(x, y)) in HOME_442.iter().chain(AWAY_433.iter()).enumerate() {
        let team = if slot < 11 { Team::Home } else { Team::Away };
        let offsets = jitter[slot].clone();
        builder = builder.player(slot as u32 + 1, team, move |i| Some((x + offsets[i].0, y + offsets[i].1)));
    }
    builder
}

pub fn session(builder: &MatchBuilder) -> MatchSession {
    MatchSession::open("synthetic", builder.store(), Vec::new(), EngineConfig::testing())
        .expect("session opens")
}
