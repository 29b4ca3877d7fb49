//! Metrics Engine
//!
//! Derived per-entity statistics computed lazily over frame ranges and cached
//! by `(entity, metric, range)`. Metrics are plain functions in a
//! [`MetricRegistry`]; the engine owns validation, caching and batching.

pub mod engine;
pub mod kinematics;
pub mod registry;
pub mod types;

pub use engine::MetricsEngine;
pub use kinematics::{Path, PathSample, LEAD_IN_FRAMES};
pub use registry::{MetricContext, MetricFn, MetricRegistry};
pub use types::{DistanceBreakdown, FrameRange, Heatmap, MetricKey, MetricValue, SeriesPoint};
