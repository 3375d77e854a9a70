//! Lane pools and the scroll-lane selection heuristic
//!
//! Three independent pools exist per viewport: scrolling lanes for general
//! traffic, plus static-top and static-bottom lanes. Scroll lanes track the
//! horizontal extent (`free_at_x`) at which the last spawned bullet's tail
//! sits; static lanes track the simulation time at which they free up.

use rand::{Rng, RngCore};

/// Scrolling lane pool with x-extent occupancy
///
/// `free_at_x[lane]` is the x coordinate of the tail of the newest bullet in
/// that lane; it shrinks every frame as the bullet travels left. A new
/// bullet spawning at the right edge would overlap unless that tail (plus
/// the safety gap) has already cleared the edge.
#[derive(Debug, Default)]
pub struct ScrollLanePool {
    free_at_x: Vec<f32>,
    reserved_edge_lanes: usize,
    reserve_threshold: usize,
    tie_epsilon: f32,
}

impl ScrollLanePool {
    pub fn new(lanes: usize, reserved_edge_lanes: usize, reserve_threshold: usize, tie_epsilon: f32) -> Self {
        Self {
            free_at_x: vec![0.0; lanes],
            reserved_edge_lanes,
            reserve_threshold,
            tie_epsilon,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.free_at_x.len()
    }

    /// Rebuild for a new lane count; all occupancy is forgotten
    pub fn resize(&mut self, lanes: usize) {
        self.free_at_x.clear();
        self.free_at_x.resize(lanes, 0.0);
    }

    pub fn clear(&mut self) {
        self.free_at_x.fill(0.0);
    }

    /// Per-frame advance: every tail travels `dx` pixels to the left
    pub fn advance(&mut self, dx: f32) {
        for extent in &mut self.free_at_x {
            *extent = (*extent - dx).max(0.0);
        }
    }

    /// Interior lane range; the outermost lanes are kept clear when the
    /// pool is large enough to afford it
    fn interior(&self) -> std::ops::Range<usize> {
        let lanes = self.free_at_x.len();
        if lanes > self.reserve_threshold {
            self.reserved_edge_lanes..lanes - self.reserved_edge_lanes
        } else {
            0..lanes
        }
    }

    /// Greedy collision-avoiding selection over the interior lanes.
    ///
    /// Finds the minimum tail extent, collects every lane tied with it
    /// (within `tie_epsilon`) and picks one uniformly at random. Returns
    /// `None` when even the clearest lane would still overlap a bullet
    /// entering at `viewport_width` once the safety gap is added; no-lane
    /// is a drop, never a retry.
    pub fn select(
        &mut self,
        viewport_width: f32,
        text_width: f32,
        safe_gap: f32,
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        let range = self.interior();
        if range.is_empty() {
            return None;
        }

        let min_extent = self.free_at_x[range.clone()]
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min);
        if min_extent + safe_gap > viewport_width {
            return None;
        }

        let candidates: Vec<usize> = range
            .filter(|&lane| self.free_at_x[lane] <= min_extent + self.tie_epsilon)
            .collect();
        let lane = candidates[rng.random_range(0..candidates.len())];
        self.free_at_x[lane] = viewport_width + text_width;
        Some(lane)
    }
}

/// Which end a static pool fills from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    TopDown,
    BottomUp,
}

/// Static (pinned) lane pool with time-based occupancy
#[derive(Debug)]
pub struct StaticLanePool {
    free_at_ms: Vec<u64>,
    order: ScanOrder,
}

impl StaticLanePool {
    pub fn new(lanes: usize, order: ScanOrder) -> Self {
        Self {
            free_at_ms: vec![0; lanes],
            order,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.free_at_ms.len()
    }

    pub fn resize(&mut self, lanes: usize) {
        self.free_at_ms.clear();
        self.free_at_ms.resize(lanes, 0);
    }

    pub fn clear(&mut self) {
        self.free_at_ms.fill(0);
    }

    /// First free lane in scan order, occupied until `now + duration`.
    /// The returned index counts from the pool's own end (0 is the topmost
    /// lane for a top pool, the bottommost for a bottom pool).
    pub fn allocate(&mut self, now_ms: u64, duration_ms: u64) -> Option<usize> {
        let lanes = self.free_at_ms.len();
        let scan: Box<dyn Iterator<Item = usize>> = match self.order {
            ScanOrder::TopDown => Box::new(0..lanes),
            ScanOrder::BottomUp => Box::new((0..lanes).rev()),
        };
        for lane in scan {
            if self.free_at_ms[lane] <= now_ms {
                self.free_at_ms[lane] = now_ms + duration_ms;
                // normalize so callers always see "distance from my edge"
                return Some(match self.order {
                    ScanOrder::TopDown => lane,
                    ScanOrder::BottomUp => lanes - 1 - lane,
                });
            }
        }
        None
    }
}
