//! k-nearest-neighbour queries behind a [`SpatialIndex`] trait.
//!
//! Results are ordered by distance, ties broken by ascending entity id, so
//! every backend returns the same list for the same input.

use std::cmp::Ordering;

use serde::Serialize;

use crate::config::KnnBackend;
use crate::coordinates::{Rect, Vec2};
use crate::store::{EntityId, Team};

use super::voronoi::Site;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub entity: EntityId,
    pub distance: f64,
    pub team: Option<Team>,
}

fn by_distance_then_id(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance.total_cmp(&b.distance).then(a.entity.cmp(&b.entity))
}

pub trait SpatialIndex: Send + Sync {
    /// Up to `k` sites nearest to `point`.
    fn nearest(&self, point: Vec2, k: usize) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scans every site; the right choice for a single frame's ~23 entities.
pub struct LinearScan {
    sites: Vec<Site>,
}

impl LinearScan {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }
}

impl SpatialIndex for LinearScan {
    fn nearest(&self, point: Vec2, k: usize) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = self
            .sites
            .iter()
            .map(|s| Neighbor { entity: s.entity, distance: (s.position - point).norm(), team: s.team })
            .collect();
        all.sort_by(by_distance_then_id);
        all.truncate(k);
        all
    }

    fn len(&self) -> usize {
        self.sites.len()
    }
}

/// Uniform bucket grid searched ring by ring outwards from the query cell.
pub struct GridIndex {
    sites: Vec<Site>,
    bounds: Rect,
    cell: f64,
    cols: usize,
    rows: usize,
    buckets: Vec<Vec<usize>>,
}

impl GridIndex {
    pub const DEFAULT_CELL_M: f64 = 10.0;

    pub fn new(sites: Vec<Site>, bounds: Rect, cell: f64) -> Self {
        let cell = if cell > 0.0 { cell } else { Self::DEFAULT_CELL_M };
        let cols = ((bounds.width() / cell).ceil() as usize).max(1);
        let rows = ((bounds.height() / cell).ceil() as usize).max(1);
        let mut index = Self { sites, bounds, cell, cols, rows, buckets: vec![Vec::new(); cols * rows] };
        for i in 0..index.sites.len() {
            let (c, r) = index.cell_of(index.sites[i].position);
            index.buckets[r * cols + c].push(i);
        }
        index
    }

    fn cell_of(&self, p: Vec2) -> (usize, usize) {
        let c = ((p.x - self.bounds.min_x) / self.cell).floor().max(0.0) as usize;
        let r = ((p.y - self.bounds.min_y) / self.cell).floor().max(0.0) as usize;
        (c.min(self.cols - 1), r.min(self.rows - 1))
    }

    fn neighbor(&self, i: usize, point: Vec2) -> Neighbor {
        let s = &self.sites[i];
        Neighbor { entity: s.entity, distance: (s.position - point).norm(), team: s.team }
    }
}

impl SpatialIndex for GridIndex {
    fn nearest(&self, point: Vec2, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.sites.is_empty() {
            return Vec::new();
        }
        // Sites outside the grid were clamped into edge cells, so the ring
        // bound only holds for queries inside it.
        if !self.bounds.contains(point) || self.sites.iter().any(|s| !self.bounds.contains(s.position)) {
            let mut all: Vec<Neighbor> = (0..self.sites.len()).map(|i| self.neighbor(i, point)).collect();
            all.sort_by(by_distance_then_id);
            all.truncate(k);
            return all;
        }

        let (qc, qr) = self.cell_of(point);
        let max_ring = self.cols.max(self.rows);
        let mut found: Vec<Neighbor> = Vec::new();
        for ring in 0..=max_ring {
            let (c0, c1) = (qc as isize - ring as isize, qc as isize + ring as isize);
            let (r0, r1) = (qr as isize - ring as isize, qr as isize + ring as isize);
            for r in r0..=r1 {
                for c in c0..=c1 {
                    let on_ring = r == r0 || r == r1 || c == c0 || c == c1;
                    if !on_ring || c < 0 || r < 0 || c >= self.cols as isize || r >= self.rows as isize {
                        continue;
                    }
                    for &i in &self.buckets[r as usize * self.cols + c as usize] {
                        found.push(self.neighbor(i, point));
                    }
                }
            }
            if found.len() >= k {
                found.sort_by(by_distance_then_id);
                // Anything beyond this ring is at least `ring * cell` away.
                if found[k - 1].distance < ring as f64 * self.cell {
                    break;
                }
            }
        }
        found.sort_by(by_distance_then_id);
        found.truncate(k);
        found
    }

    fn len(&self) -> usize {
        self.sites.len()
    }
}

pub fn build_index(backend: KnnBackend, sites: Vec<Site>, bounds: Rect) -> Box<dyn SpatialIndex> {
    match backend {
        KnnBackend::Linear => Box::new(LinearScan::new(sites)),
        KnnBackend::Grid => Box::new(GridIndex::new(sites, bounds, GridIndex::DEFAULT_CELL_M)),
    }
}
