//! # replay_core - Football Tracking Replay Engine
//!
//! Loads one match of 10 Hz player and ball tracking plus its event list and
//! answers low-latency queries for a replay viewer.
//!
//! ## Features
//! - Validated, immutable frame store with a bit-exact persisted artifact
//! - Sliding, prefetched frame windows under a process-wide memory budget
//! - Gap-aware spline interpolation of positions and velocities
//! - Cached kinematic metrics from a registry of pure functions
//! - Per-frame geometry: hulls, Voronoi, pitch control, formations
//! - Event stepping, context windows and pass networks

// Geometry helpers take many scalar parameters by design of the formulas
#![allow(clippy::too_many_arguments)]
// Cache value types nest Arc/Result
#![allow(clippy::type_complexity)]

pub mod cache;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod events;
pub mod interp;
pub mod memo;
pub mod metrics;
pub mod session;
pub mod spatial;
pub mod store;

pub use cache::{CacheStatus, FrameView, MemoryBudget, Playhead, TravelDirection, WindowedCache};
pub use config::EngineConfig;
pub use coordinates::{Pitch, Rect, Vec2};
pub use error::{ArtifactError, ConfigError, FormatError, LoadError, QueryError, QueryResult, SessionError};
pub use events::{Event, EventFilter, EventIndex, EventType, PassNetwork};
pub use interp::{Interpolator, MotionSample, SampleKind};
pub use metrics::{FrameRange, MetricValue, MetricsEngine};
pub use session::{MatchInfo, MatchSession};
pub use spatial::{FrameReading, SpatialAnalyzer, SpatialSnapshot};
pub use store::{EntityId, Frame, FrameStore, PlayerSample, Team};

/// Crate version, recorded in artifact sidecars.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
