//! Engine configuration and timeline arithmetic
//!
//! Every tuned constant lives here so hosts can persist and adjust them.
//! The defaults are the values the engine was tuned with; correctness only
//! depends on them being internally consistent, not on the exact numbers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeline span covered by one annotation segment (6 minutes)
pub const SEGMENT_DURATION_MS: u64 = 360_000;

/// Start prefetching the next segment this far before the boundary
pub const PRELOAD_DISTANCE_MS: u64 = 60_000;

/// First retry cooldown after a failed segment fetch
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Retry cooldown cap (5 minutes)
pub const RETRY_MAX_DELAY_MS: u64 = 300_000;

/// Tuning knobs for the loader and the frame simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrageConfig {
    /// Timeline span of one segment, in ms
    pub segment_duration_ms: u64,
    /// Prefetch the next segment when less than this remains in the current one
    pub preload_distance_ms: u64,
    /// Base of the exponential retry backoff, in ms
    pub retry_base_delay_ms: u64,
    /// Backoff cap, in ms
    pub retry_max_delay_ms: u64,
    /// Items scheduled earlier than `now - stale_threshold_ms` are dropped
    /// at spawn time instead of bursting onto the screen after a stall
    pub stale_threshold_ms: u64,
    /// Upper bound on spawn attempts per frame (bounds catch-up cost)
    pub max_spawn_per_frame: usize,
    /// On-screen lifetime of static (top/bottom) bullets, in ms
    pub static_duration_ms: u64,
    /// Scroll velocity in pixels per millisecond
    pub scroll_speed: f32,
    /// Height of one lane in pixels
    pub line_height: f32,
    /// Minimum horizontal clearance between bullets sharing a lane
    pub safe_gap: f32,
    /// Reserve this many lanes at each edge of the scroll pool...
    pub reserved_edge_lanes: usize,
    /// ...but only when the pool has more lanes than this
    pub reserve_threshold: usize,
    /// Lanes within this many pixels of the minimum extent tie for selection
    pub tie_epsilon: f32,
    /// Overlay opacity applied to every draw item
    pub opacity: f32,
}

impl Default for BarrageConfig {
    fn default() -> Self {
        Self {
            segment_duration_ms: SEGMENT_DURATION_MS,
            preload_distance_ms: PRELOAD_DISTANCE_MS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RETRY_MAX_DELAY_MS,
            stale_threshold_ms: 5_000,
            max_spawn_per_frame: 10,
            static_duration_ms: 4_000,
            scroll_speed: 0.15,
            line_height: 32.0,
            safe_gap: 12.0,
            reserved_edge_lanes: 2,
            reserve_threshold: 6,
            tie_epsilon: 1.0,
            opacity: 1.0,
        }
    }
}

impl BarrageConfig {
    /// Segment index for a timeline position: `max(1, ceil(t / duration))`
    pub fn segment_index(&self, timeline_ms: u64) -> u32 {
        segment_index(timeline_ms, self.segment_duration_ms)
    }

    /// Cooldown before a segment that failed `retry_count` times becomes
    /// eligible again: `min(base * 2^(retry_count - 1), cap)`
    pub fn retry_cooldown(&self, retry_count: u32) -> Duration {
        let shift = retry_count.saturating_sub(1).min(63);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Lane count for a viewport height, never below one
    pub fn lane_count(&self, viewport_height: f32) -> usize {
        ((viewport_height / self.line_height).floor() as usize).max(1)
    }
}

/// Segment index for a timeline position with an explicit duration
pub fn segment_index(timeline_ms: u64, segment_duration_ms: u64) -> u32 {
    (timeline_ms.div_ceil(segment_duration_ms)).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_index_monotonic() {
        assert_eq!(segment_index(0, SEGMENT_DURATION_MS), 1);
        assert_eq!(segment_index(1, SEGMENT_DURATION_MS), 1);
        assert_eq!(segment_index(359_999, SEGMENT_DURATION_MS), 1);
        assert_eq!(segment_index(360_000, SEGMENT_DURATION_MS), 1);
        assert_eq!(segment_index(360_001, SEGMENT_DURATION_MS), 2);
        assert_eq!(segment_index(720_001, SEGMENT_DURATION_MS), 3);

        let mut last = 0;
        for t in (0..2_000_000).step_by(17_777) {
            let idx = segment_index(t, SEGMENT_DURATION_MS);
            assert!(idx >= last, "segment index regressed at t={t}");
            last = idx;
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = BarrageConfig::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| config.retry_cooldown(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);

        // Strictly increasing up to the cap, never beyond it
        assert_eq!(config.retry_cooldown(9).as_millis(), 256_000);
        assert_eq!(config.retry_cooldown(10).as_millis(), 300_000);
        assert_eq!(config.retry_cooldown(50).as_millis(), 300_000);
        assert_eq!(config.retry_cooldown(u32::MAX).as_millis(), 300_000);
    }

    #[test]
    fn test_lane_count_floor_and_minimum() {
        let config = BarrageConfig::default();
        assert_eq!(config.lane_count(320.0), 10);
        assert_eq!(config.lane_count(330.0), 10);
        assert_eq!(config.lane_count(31.0), 1);
        assert_eq!(config.lane_count(0.0), 1);
    }
}
