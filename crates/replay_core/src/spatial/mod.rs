//! Spatial Analyzer
//!
//! Geometry of a single frame: team hulls, Voronoi cells and their Delaunay
//! dual, nearest-neighbour queries, pitch control, formations and team
//! shape. [`SpatialAnalyzer`] reads frames through the windowed cache and
//! caches one [`SpatialSnapshot`] per frame index.

pub mod analyzer;
pub mod formation;
pub mod geometry;
pub mod hull;
pub mod knn;
pub mod pitch_control;
pub mod shape;
pub mod voronoi;

pub use analyzer::{FrameReading, SpatialAnalyzer, SpatialSnapshot, TeamGeometry};
pub use formation::{classify, FormationGuess, FormationReading, FormationTemplate, CATALOG};
pub use hull::{convex_hull, Hull};
pub use knn::{build_index, GridIndex, LinearScan, Neighbor, SpatialIndex};
pub use pitch_control::{pitch_control, time_to_reach, Mover, PitchControlGrid};
pub use shape::{team_shape, Orientation, TeamShape, PRESSING_HORIZON_M};
pub use voronoi::{delaunay, voronoi, DelaunayEdge, Site, VoronoiCell};
