//! Frame simulation and lane allocator
//!
//! Runs once per render frame on the host's tight loop: advances lane
//! occupancy, spawns due annotations from the shared buffer (through a
//! monotone read cursor), retires finished bullets and assembles the draw
//! list. Never blocks and never performs I/O; the segment loader feeds the
//! buffer independently on the async scheduler.

pub mod bullet;
pub mod lanes;
pub mod snapshot;

use std::sync::Arc;

use rand::{RngCore, SeedableRng, rngs::StdRng};
use tracing::{debug, trace};

use crate::buffer::SharedBuffer;
use crate::config::BarrageConfig;
use crate::engine::bullet::ActiveBullet;
use crate::engine::lanes::{ScanOrder, ScrollLanePool, StaticLanePool};
use crate::engine::snapshot::DrawList;
use crate::model::{AnnotationItem, BulletMode};
use crate::source::{MeasuredText, TextMeasurer};

/// Host-reported inputs for one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    /// Current playback offset in milliseconds
    pub timeline_ms: u64,
    /// Wall time since the previous frame, in milliseconds
    pub delta_ms: f32,
    pub is_playing: bool,
    pub viewport_width: f32,
    pub viewport_height: f32,
}

/// Per-frame overlay simulation
///
/// Generic over the host's measurement service; the engine stores and emits
/// its opaque paintables without ever looking inside.
pub struct BarrageEngine<M: TextMeasurer> {
    buffer: SharedBuffer,
    config: BarrageConfig,
    measurer: Option<Arc<M>>,
    /// Monotone read index into the shared buffer; moves backwards only via
    /// an explicit reseek
    cursor: usize,
    enabled: bool,
    viewport_width: f32,
    viewport_height: f32,
    scroll_lanes: ScrollLanePool,
    top_lanes: StaticLanePool,
    bottom_lanes: StaticLanePool,
    active: Vec<ActiveBullet<M::Paint>>,
    snapshot: DrawList<M::Paint>,
    rng: Box<dyn RngCore + Send>,
}

impl<M: TextMeasurer> BarrageEngine<M> {
    /// Wire the engine to a loader's buffer (`SegmentLoader::buffer()`)
    pub fn new(buffer: SharedBuffer, config: BarrageConfig) -> Self {
        let scroll_lanes = ScrollLanePool::new(
            1,
            config.reserved_edge_lanes,
            config.reserve_threshold,
            config.tie_epsilon,
        );
        Self {
            buffer,
            config,
            measurer: None,
            cursor: 0,
            enabled: true,
            viewport_width: 0.0,
            viewport_height: 0.0,
            scroll_lanes,
            top_lanes: StaticLanePool::new(1, ScanOrder::TopDown),
            bottom_lanes: StaticLanePool::new(1, ScanOrder::BottomUp),
            active: Vec::new(),
            snapshot: DrawList::default(),
            rng: Box::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the lane tie-break randomness (deterministic in tests)
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = rng;
        self
    }

    /// Attach the text measurement service; until one is present every
    /// frame is a no-op
    pub fn set_measurer(&mut self, measurer: Arc<M>) {
        self.measurer = Some(measurer);
    }

    /// Overlay on/off. Disabled frames keep the previous snapshot.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Advance the simulation by one frame and return the draw list.
    ///
    /// Steps run in fixed order: no-op guard, scroll-lane advance, spawn
    /// pass, bullet advance/retire, snapshot assembly. Spawning is capped
    /// per frame so catch-up after a stall stays bounded.
    pub fn tick(&mut self, frame: &FrameInput) -> &DrawList<M::Paint> {
        if !self.enabled || !frame.is_playing || self.measurer.is_none() {
            return &self.snapshot;
        }

        self.apply_viewport(frame.viewport_width, frame.viewport_height);
        self.scroll_lanes
            .advance(self.config.scroll_speed * frame.delta_ms);
        self.spawn_due(frame);
        self.advance_and_retire(frame);
        self.snapshot.rebuild(&self.active, self.config.opacity);
        &self.snapshot
    }

    /// Explicit reseek: clear all bullets and lane occupancy, rebuild pools
    /// for the current viewport and binary-search the cursor to the first
    /// item scheduled at or after `timeline_ms`
    pub fn reset(&mut self, timeline_ms: u64) {
        self.active.clear();
        self.snapshot.clear();
        self.rebuild_pools();
        self.cursor = self.buffer.read().first_at_or_after(timeline_ms);
        debug!(
            "danmaku: engine reset to {}ms, cursor at {}",
            timeline_ms, self.cursor
        );
    }

    /// A height change resizes the lane pools and forgets occupancy;
    /// bullets already in flight keep their positions
    fn apply_viewport(&mut self, width: f32, height: f32) {
        self.viewport_width = width;
        if height != self.viewport_height {
            self.viewport_height = height;
            self.rebuild_pools();
        }
    }

    fn rebuild_pools(&mut self) {
        let lanes = self.config.lane_count(self.viewport_height);
        self.scroll_lanes.resize(lanes);
        self.top_lanes.resize(lanes);
        self.bottom_lanes.resize(lanes);
        trace!("danmaku: lane pools rebuilt with {} lanes", lanes);
    }

    /// Consume due items from the cursor, spawning at most
    /// `max_spawn_per_frame` of them. Stale items (older than the catch-up
    /// threshold) are dropped without counting against the cap; items denied
    /// a lane are consumed anyway, never retried.
    fn spawn_due(&mut self, frame: &FrameInput) {
        let Some(measurer) = self.measurer.clone() else {
            return;
        };
        let buffer = Arc::clone(&self.buffer);
        let buffer = buffer.read();

        let mut attempts = 0;
        while attempts < self.config.max_spawn_per_frame {
            let Some(item) = buffer.get(self.cursor) else {
                break;
            };
            if item.scheduled_at_ms > frame.timeline_ms {
                break;
            }
            self.cursor += 1;

            if item.scheduled_at_ms + self.config.stale_threshold_ms < frame.timeline_ms {
                trace!(
                    "danmaku: dropping stale item scheduled at {}ms (now {}ms)",
                    item.scheduled_at_ms, frame.timeline_ms
                );
                continue;
            }

            attempts += 1;
            let measured = measurer.measure(&item.text, &item.style());
            self.dispatch(item, measured, frame);
        }
    }

    fn dispatch(&mut self, item: &AnnotationItem, measured: MeasuredText<M::Paint>, frame: &FrameInput) {
        match item.mode {
            BulletMode::Scroll => {
                let Some(lane) = self.scroll_lanes.select(
                    frame.viewport_width,
                    measured.width,
                    self.config.safe_gap,
                    &mut *self.rng,
                ) else {
                    trace!("danmaku: no free scroll lane, dropping item");
                    return;
                };
                self.active.push(ActiveBullet {
                    mode: BulletMode::Scroll,
                    lane,
                    x: frame.viewport_width,
                    y: lane as f32 * self.config.line_height,
                    width: measured.width,
                    velocity: self.config.scroll_speed,
                    spawned_at_ms: frame.timeline_ms,
                    paint: measured.paint,
                });
            }
            BulletMode::StaticTop => {
                let Some(lane) = self
                    .top_lanes
                    .allocate(frame.timeline_ms, self.config.static_duration_ms)
                else {
                    trace!("danmaku: no free top lane, dropping item");
                    return;
                };
                self.active.push(ActiveBullet {
                    mode: BulletMode::StaticTop,
                    lane,
                    x: (frame.viewport_width - measured.width) / 2.0,
                    y: lane as f32 * self.config.line_height,
                    width: measured.width,
                    velocity: 0.0,
                    spawned_at_ms: frame.timeline_ms,
                    paint: measured.paint,
                });
            }
            BulletMode::StaticBottom => {
                let Some(lane) = self
                    .bottom_lanes
                    .allocate(frame.timeline_ms, self.config.static_duration_ms)
                else {
                    trace!("danmaku: no free bottom lane, dropping item");
                    return;
                };
                self.active.push(ActiveBullet {
                    mode: BulletMode::StaticBottom,
                    lane,
                    x: (frame.viewport_width - measured.width) / 2.0,
                    y: frame.viewport_height - (lane as f32 + 1.0) * self.config.line_height,
                    width: measured.width,
                    velocity: 0.0,
                    spawned_at_ms: frame.timeline_ms,
                    paint: measured.paint,
                });
            }
        }
    }

    fn advance_and_retire(&mut self, frame: &FrameInput) {
        let static_duration_ms = self.config.static_duration_ms;
        for bullet in &mut self.active {
            bullet.advance(frame.delta_ms);
        }
        self.active
            .retain(|b| !b.is_retired(frame.timeline_ms, static_duration_ms));
    }
}
