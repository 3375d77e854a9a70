//! In-flight bullet lifecycle

use crate::model::BulletMode;

/// One materialized, positioned, renderable bullet
#[derive(Debug, Clone)]
pub struct ActiveBullet<P> {
    pub mode: BulletMode,
    pub lane: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    /// Pixels per millisecond; zero for static modes
    pub velocity: f32,
    /// Timeline position at spawn
    pub spawned_at_ms: u64,
    /// Pre-measured paintable from the host's measurement service
    pub paint: P,
}

impl<P> ActiveBullet<P> {
    /// Integrate one frame of horizontal motion
    pub fn advance(&mut self, delta_ms: f32) {
        self.x -= self.velocity * delta_ms;
    }

    /// Whether this bullet has finished its on-screen lifetime
    pub fn is_retired(&self, now_ms: u64, static_duration_ms: u64) -> bool {
        match self.mode {
            BulletMode::Scroll => self.x + self.width < 0.0,
            BulletMode::StaticTop | BulletMode::StaticBottom => {
                now_ms > self.spawned_at_ms + static_duration_ms
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet(mode: BulletMode) -> ActiveBullet<()> {
        ActiveBullet {
            mode,
            lane: 0,
            x: 100.0,
            y: 0.0,
            width: 50.0,
            velocity: if mode == BulletMode::Scroll { 0.15 } else { 0.0 },
            spawned_at_ms: 1_000,
            paint: (),
        }
    }

    #[test]
    fn test_scroll_retires_fully_off_screen() {
        let mut b = bullet(BulletMode::Scroll);
        // 100px left to travel plus its own width
        b.advance(900.0); // 135px
        assert!(!b.is_retired(0, 4_000)); // x = -35, tail still visible
        b.advance(800.0); // another 120px
        assert!(b.is_retired(0, 4_000)); // x = -155, tail past the edge
    }

    #[test]
    fn test_static_retires_after_display_duration() {
        let b = bullet(BulletMode::StaticTop);
        assert!(!b.is_retired(5_000, 4_000));
        assert!(b.is_retired(5_001, 4_000));
    }

    #[test]
    fn test_static_bullets_do_not_move() {
        let mut b = bullet(BulletMode::StaticBottom);
        b.advance(10_000.0);
        assert_eq!(b.x, 100.0);
    }
}
