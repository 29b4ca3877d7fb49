//! Pass network: who passes to whom, built from pass events.
//!
//! The receiver and outcome of a pass are read from event details
//! (`receiver_id`, `successful`). Passes without a receiver still count
//! towards volume and completion, but add no edge.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::coordinates::Vec2;
use crate::store::Team;

use super::event::{Event, EventType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassNode {
    pub player_id: u32,
    pub team: Option<Team>,
    pub passes_made: u32,
    pub passes_received: u32,
    /// Mean location of this player's passes, when any carried one.
    pub mean_position: Option<Vec2>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassEdge {
    pub passer: u32,
    pub receiver: u32,
    pub passes: u32,
    pub successful: u32,
}

/// Directed passer → receiver graph. Nodes are sorted by player id and
/// edges by `(passer, receiver)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassNetwork {
    pub nodes: Vec<PassNode>,
    pub edges: Vec<PassEdge>,
    /// Pass events with a known passer.
    pub passes: u32,
    pub successful: u32,
}

struct NodeAcc {
    team: Option<Team>,
    made: u32,
    received: u32,
    position_sum: Vec2,
    positions: u32,
}

impl NodeAcc {
    fn new() -> Self {
        Self { team: None, made: 0, received: 0, position_sum: Vec2::zeros(), positions: 0 }
    }
}

impl PassNetwork {
    /// Build from events; anything other than a pass with a passer is ignored.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut nodes: BTreeMap<u32, NodeAcc> = BTreeMap::new();
        let mut edges: BTreeMap<(u32, u32), PassEdge> = BTreeMap::new();
        let mut passes = 0;
        let mut successful = 0;

        for event in events.into_iter().filter(|e| e.kind == EventType::Pass) {
            let Some(passer) = event.player_id else { continue };
            let ok = event.successful();
            passes += 1;
            successful += u32::from(ok);

            let node = nodes.entry(passer).or_insert_with(NodeAcc::new);
            node.team = node.team.or(event.team);
            node.made += 1;
            if let Some(p) = event.position() {
                node.position_sum += p;
                node.positions += 1;
            }

            let Some(receiver) = event.receiver_id() else { continue };
            let target = nodes.entry(receiver).or_insert_with(NodeAcc::new);
            target.received += 1;
            // A receiver is a teammate of the passer unless stated otherwise.
            target.team = target.team.or(event.team);

            let edge = edges
                .entry((passer, receiver))
                .or_insert(PassEdge { passer, receiver, passes: 0, successful: 0 });
            edge.passes += 1;
            edge.successful += u32::from(ok);
        }

        let nodes = nodes
            .into_iter()
            .map(|(player_id, acc)| PassNode {
                player_id,
                team: acc.team,
                passes_made: acc.made,
                passes_received: acc.received,
                mean_position: (acc.positions > 0).then(|| acc.position_sum / acc.positions as f64),
            })
            .collect();
        Self { nodes, edges: edges.into_values().collect(), passes, successful }
    }

    pub fn is_empty(&self) -> bool {
        self.passes == 0
    }

    pub fn node(&self, player_id: u32) -> Option<&PassNode> {
        self.nodes
            .binary_search_by_key(&player_id, |n| n.player_id)
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn edge(&self, passer: u32, receiver: u32) -> Option<&PassEdge> {
        self.edges
            .binary_search_by_key(&(passer, receiver), |e| (e.passer, e.receiver))
            .ok()
            .map(|i| &self.edges[i])
    }

    /// Successful share of all passes, 0 with no passes.
    pub fn completion_rate(&self) -> f64 {
        if self.passes == 0 {
            return 0.0;
        }
        self.successful as f64 / self.passes as f64
    }

    /// Player on the most distinct edges, in either direction. Ties go to
    /// the lowest id.
    pub fn most_connected(&self) -> Option<&PassNode> {
        let mut degree: BTreeMap<u32, u32> = self.nodes.iter().map(|n| (n.player_id, 0)).collect();
        for edge in &self.edges {
            *degree.entry(edge.passer).or_default() += 1;
            *degree.entry(edge.receiver).or_default() += 1;
        }
        let (&id, _) = degree.iter().rev().max_by_key(|(_, d)| **d)?;
        self.node(id)
    }

    /// Passes made per player, including players who only received.
    pub fn pass_volume(&self) -> BTreeMap<u32, u32> {
        self.nodes.iter().map(|n| (n.player_id, n.passes_made)).collect()
    }

    /// Distinct edges over the possible directed pairs among the nodes.
    pub fn density(&self) -> f64 {
        let n = self.nodes.len();
        if n < 2 {
            return 0.0;
        }
        self.edges.len() as f64 / (n * (n - 1)) as f64
    }

    /// Share of connected player pairs that pass both ways.
    pub fn reciprocity(&self) -> f64 {
        let mut pairs = BTreeSet::new();
        let mut both_ways = 0;
        for edge in self.edges.iter().filter(|e| e.passer != e.receiver) {
            let pair = (edge.passer.min(edge.receiver), edge.passer.max(edge.receiver));
            if pairs.insert(pair) && self.edge(edge.receiver, edge.passer).is_some() {
                both_ways += 1;
            }
        }
        if pairs.is_empty() {
            return 0.0;
        }
        both_ways as f64 / pairs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{RECEIVER_KEY, SUCCESSFUL_KEY};

    fn pass(frame: usize, from: u32, to: Option<u32>, ok: bool) -> Event {
        let mut e = Event::new(frame, frame as f64 / 10.0, EventType::Pass)
            .with_player(from, Team::Home)
            .at(from as f64, 0.0)
            .with_detail(SUCCESSFUL_KEY, ok);
        if let Some(to) = to {
            e = e.with_detail(RECEIVER_KEY, to);
        }
        e
    }

    #[test]
    fn test_edges_and_counts() {
        let events = [
            pass(1, 4, Some(8), true),
            pass(2, 8, Some(4), true),
            pass(3, 4, Some(8), false),
            pass(4, 4, Some(10), true),
            pass(5, 10, None, false),
            Event::new(6, 0.6, EventType::Shot).with_player(10, Team::Home),
        ];
        let network = PassNetwork::from_events(&events);

        assert_eq!(network.passes, 5);
        assert_eq!(network.successful, 3);
        assert!((network.completion_rate() - 0.6).abs() < 1e-12);
        assert_eq!(network.edge(4, 8), Some(&PassEdge { passer: 4, receiver: 8, passes: 2, successful: 1 }));
        assert_eq!(network.edge(8, 4).map(|e| e.passes), Some(1));
        assert!(network.edge(10, 4).is_none());
        assert_eq!(network.edges.len(), 3);

        let ids: Vec<u32> = network.nodes.iter().map(|n| n.player_id).collect();
        assert_eq!(ids, vec![4, 8, 10]);
        let four = network.node(4).unwrap();
        assert_eq!((four.passes_made, four.passes_received), (3, 1));
        assert_eq!(four.mean_position, Some(Vec2::new(4.0, 0.0)));
        assert_eq!(network.pass_volume(), BTreeMap::from([(4, 3), (8, 1), (10, 1)]));
    }

    #[test]
    fn test_connectivity_summaries() {
        let events = [pass(1, 4, Some(8), true), pass(2, 8, Some(4), true), pass(3, 4, Some(10), true)];
        let network = PassNetwork::from_events(&events);
        assert_eq!(network.most_connected().map(|n| n.player_id), Some(4));
        assert!((network.density() - 3.0 / 6.0).abs() < 1e-12);
        assert!((network.reciprocity() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_network() {
        let none: [Event; 0] = [];
        let network = PassNetwork::from_events(&none);
        assert!(network.is_empty());
        assert_eq!(network.completion_rate(), 0.0);
        assert!(network.most_connected().is_none());
        assert_eq!(network.density(), 0.0);
        assert_eq!(network.reciprocity(), 0.0);
    }

    #[test]
    fn test_details_from_json() {
        let line = r#"{"frame": 3, "timestamp": 0.3, "type": "pass", "playerId": 5, "details": {"receiver_id": 9, "successful": true}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.receiver_id(), Some(9));
        assert!(event.successful());
        assert!(!Event::new(0, 0.0, EventType::Pass).successful());
    }
}
