use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::coordinates::Vec2;
use crate::error::FormatError;
use crate::store::Team;

/// Detail key carrying the game state an event happened in
/// (for example `open_play` or `set_piece`).
pub const GAME_STATE_KEY: &str = "game_state";
pub const RECEIVER_KEY: &str = "receiver_id";
pub const SUCCESSFUL_KEY: &str = "successful";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    KickOff,
    Pass,
    Shot,
    Goal,
    Save,
    Tackle,
    Interception,
    Clearance,
    Foul,
    Card,
    Offside,
    Corner,
    FreeKick,
    ThrowIn,
    GoalKick,
    Penalty,
    Substitution,
    PeriodStart,
    PeriodEnd,
    #[serde(other)]
    Other,
}

impl EventType {
    /// Stoppages and goals: the moments an operator usually jumps between.
    pub fn is_highlight(self) -> bool {
        matches!(self, EventType::Goal | EventType::Shot | EventType::Penalty | EventType::Card)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "other".to_string());
        f.write_str(&name)
    }
}

/// One match event, as handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub frame: usize,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, alias = "playerId")]
    pub player_id: Option<u32>,
    #[serde(default)]
    pub team: Option<Team>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(frame: usize, timestamp: f64, kind: EventType) -> Self {
        Self { frame, timestamp, kind, player_id: None, team: None, x: None, y: None, details: BTreeMap::new() }
    }

    pub fn with_player(mut self, id: u32, team: Team) -> Self {
        self.player_id = Some(id);
        self.team = Some(team);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn position(&self) -> Option<Vec2> {
        Some(Vec2::new(self.x?, self.y?))
    }

    pub fn game_state(&self) -> Option<&str> {
        self.details.get(GAME_STATE_KEY).and_then(|v| v.as_str())
    }

    /// Intended receiver of a pass.
    pub fn receiver_id(&self) -> Option<u32> {
        self.details
            .get(RECEIVER_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|id| u32::try_from(id).ok())
    }

    /// Missing or non-boolean outcomes count as unsuccessful.
    pub fn successful(&self) -> bool {
        self.details.get(SUCCESSFUL_KEY).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// Parse one event per non-blank line.
pub fn parse_events_jsonl<R: BufRead>(reader: R) -> Result<Vec<Event>, FormatError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FormatError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event =
            serde_json::from_str(&line).map_err(|e| FormatError::Parse { line: idx + 1, message: e.to_string() })?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_event_record() {
        let input = r#"{"frame": 120, "timestamp": 12.0, "type": "shot", "playerId": 9, "team": "home", "x": 40.0, "y": -3.5, "details": {"game_state": "open_play", "xg": 0.12}}
{"frame": 130, "timestamp": 13.0, "type": "bicycle_kick"}"#;
        let events = parse_events_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventType::Shot);
        assert_eq!(events[0].player_id, Some(9));
        assert_eq!(events[0].game_state(), Some("open_play"));
        assert_eq!(events[0].position(), Some(Vec2::new(40.0, -3.5)));
        assert_eq!(events[1].kind, EventType::Other);
        assert_eq!(events[1].position(), None);
    }

    #[test]
    fn test_display_uses_wire_name() {
        assert_eq!(EventType::FreeKick.to_string(), "free_kick");
        assert_eq!(EventType::Goal.to_string(), "goal");
    }
}
