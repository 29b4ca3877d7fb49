use serde::{Deserialize, Serialize};

use crate::coordinates::Rect;
use crate::store::Team;

use super::event::{Event, EventType};

/// Conjunction of optional predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Any of these types; `None` for all types.
    pub kinds: Option<Vec<EventType>>,
    pub team: Option<Team>,
    pub player: Option<u32>,
    /// Events without a location never match a zone.
    pub zone: Option<Rect>,
    pub game_state: Option<String>,
}

impl EventFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(kind: EventType) -> Self {
        Self { kinds: Some(vec![kind]), ..Self::default() }
    }

    pub fn of_types(kinds: impl IntoIterator<Item = EventType>) -> Self {
        let mut kinds: Vec<EventType> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self { kinds: Some(kinds), ..Self::default() }
    }

    pub fn team(mut self, team: Team) -> Self {
        self.team = Some(team);
        self
    }

    pub fn player(mut self, id: u32) -> Self {
        self.player = Some(id);
        self
    }

    pub fn zone(mut self, zone: Rect) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn game_state(mut self, state: impl Into<String>) -> Self {
        self.game_state = Some(state.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&event.kind)) && self.matches_compound(event)
    }

    /// Everything except the type predicate, which the index answers from
    /// its per-type buckets.
    pub(crate) fn matches_compound(&self, event: &Event) -> bool {
        if self.team.is_some() && event.team != self.team {
            return false;
        }
        if self.player.is_some() && event.player_id != self.player {
            return false;
        }
        if let Some(zone) = &self.zone {
            if !event.position().is_some_and(|p| zone.contains(p)) {
                return false;
            }
        }
        if let Some(state) = &self.game_state {
            if event.game_state() != Some(state.as_str()) {
                return false;
            }
        }
        true
    }
}
