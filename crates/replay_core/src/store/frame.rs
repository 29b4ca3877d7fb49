use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coordinates::Vec2;

/// Fixed number of player slots in every frame (11 per side).
pub const PLAYER_SLOTS: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Home,
    Away,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Home => Team::Away,
            Team::Away => Team::Home,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Home => write!(f, "home"),
            Team::Away => write!(f, "away"),
        }
    }
}

/// Tracked entity. Orders the ball first, then players by ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    Ball,
    Player(u32),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Ball => write!(f, "ball"),
            EntityId::Player(id) => write!(f, "player {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub id: u32,
    pub team: Team,
    pub x: f32,
    pub y: f32,
}

impl PlayerSample {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x as f64, self.y as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl BallSample {
    /// Ground-plane position; height is not interpolated.
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x as f64, self.y as f64)
    }
}

/// One validated tracking sample. `None` slots are explicit "absent" markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub period: u8,
    pub ball: BallSample,
    pub players: [Option<PlayerSample>; PLAYER_SLOTS],
}

impl Frame {
    pub fn player(&self, id: u32) -> Option<&PlayerSample> {
        self.players.iter().flatten().find(|p| p.id == id)
    }

    pub fn position(&self, entity: EntityId) -> Option<Vec2> {
        match entity {
            EntityId::Ball => Some(self.ball.position()),
            EntityId::Player(id) => self.player(id).map(PlayerSample::position),
        }
    }

    pub fn present_players(&self) -> impl Iterator<Item = &PlayerSample> {
        self.players.iter().flatten()
    }

    pub fn team_players(&self, team: Team) -> impl Iterator<Item = &PlayerSample> {
        self.present_players().filter(move |p| p.team == team)
    }

    pub fn present_count(&self) -> usize {
        self.present_players().count()
    }
}
