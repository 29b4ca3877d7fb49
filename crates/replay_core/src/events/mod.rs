//! Event Index: frame-ordered match events with per-type lookup,
//! filtered stepping and context windows, plus the pass network built
//! from them.

pub mod event;
pub mod filter;
pub mod index;
pub mod network;

pub use event::{parse_events_jsonl, Event, EventType, GAME_STATE_KEY, RECEIVER_KEY, SUCCESSFUL_KEY};
pub use filter::EventFilter;
pub use index::EventIndex;
pub use network::{PassEdge, PassNetwork, PassNode};
