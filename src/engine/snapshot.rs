//! Per-frame render snapshot handed to the host

use crate::engine::bullet::ActiveBullet;
use crate::model::BulletMode;

/// One paintable at a position
#[derive(Debug, Clone)]
pub struct DrawItem<P> {
    pub paint: P,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub opacity: f32,
}

/// Flat draw list, scrolling bullets first
#[derive(Debug, Clone)]
pub struct DrawList<P> {
    pub items: Vec<DrawItem<P>>,
}

impl<P> Default for DrawList<P> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<P> DrawList<P> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

impl<P: Clone> DrawList<P> {
    /// Rebuild from the active set. Scrolling bullets are emitted before
    /// static ones so pinned comments layer on top; within each group the
    /// order is spawn order, which is stable frame to frame.
    pub(crate) fn rebuild(&mut self, active: &[ActiveBullet<P>], opacity: f32) {
        self.items.clear();
        let scroll_first = active
            .iter()
            .filter(|b| b.mode == BulletMode::Scroll)
            .chain(active.iter().filter(|b| b.mode != BulletMode::Scroll));
        for bullet in scroll_first {
            self.items.push(DrawItem {
                paint: bullet.paint.clone(),
                x: bullet.x,
                y: bullet.y,
                width: bullet.width,
                opacity,
            });
        }
    }
}
