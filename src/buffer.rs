//! Time-ordered annotation buffer shared between loader and simulation
//!
//! The loader is the sole writer (append-and-resort per ingested segment);
//! the simulation is the sole reader, holding only an index cursor into the
//! sequence, never a copied snapshot. Segments may arrive out of order or
//! be re-fetched, so ingestion always restores global timestamp order.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::model::AnnotationItem;

/// Shared handle to the ordered buffer (loader writes, engine reads)
pub type SharedBuffer = Arc<RwLock<OrderedBuffer>>;

/// Single growing sequence of annotations, sorted by `scheduled_at_ms`
#[derive(Debug, Default)]
pub struct OrderedBuffer {
    items: Vec<AnnotationItem>,
}

impl OrderedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a cleaned segment into the buffer, restoring timestamp order.
    /// The sort is stable, so equal timestamps keep arrival order.
    pub fn ingest(&mut self, mut items: Vec<AnnotationItem>) {
        if items.is_empty() {
            return;
        }
        self.items.append(&mut items);
        self.items.sort_by_key(|item| item.scheduled_at_ms);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AnnotationItem> {
        self.items.get(index)
    }

    /// Index of the first item with `scheduled_at_ms >= timeline_ms`
    /// (the reseek cursor)
    pub fn first_at_or_after(&self, timeline_ms: u64) -> usize {
        self.items
            .partition_point(|item| item.scheduled_at_ms < timeline_ms)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Fresh shared buffer for wiring a loader/engine pair
pub fn shared_buffer() -> SharedBuffer {
    Arc::new(RwLock::new(OrderedBuffer::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scroll_item;

    #[test]
    fn test_out_of_order_ingestion_stays_sorted() {
        let mut buffer = OrderedBuffer::new();
        buffer.ingest(vec![scroll_item(400_000, "b"), scroll_item(500_000, "c")]);
        buffer.ingest(vec![scroll_item(100, "a"), scroll_item(720_500, "d")]);
        buffer.ingest(vec![scroll_item(450_000, "bc")]);

        let times: Vec<u64> = (0..buffer.len())
            .map(|i| buffer.get(i).unwrap().scheduled_at_ms)
            .collect();
        assert_eq!(times, vec![100, 400_000, 450_000, 500_000, 720_500]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut buffer = OrderedBuffer::new();
        buffer.ingest(vec![scroll_item(1_000, "first")]);
        buffer.ingest(vec![scroll_item(1_000, "second")]);
        assert_eq!(buffer.get(0).unwrap().text, "first");
        assert_eq!(buffer.get(1).unwrap().text, "second");
    }

    #[test]
    fn test_first_at_or_after() {
        let mut buffer = OrderedBuffer::new();
        buffer.ingest(vec![
            scroll_item(100, "a"),
            scroll_item(500, "b"),
            scroll_item(1_500, "c"),
            scroll_item(3_000, "d"),
        ]);
        assert_eq!(buffer.first_at_or_after(0), 0);
        assert_eq!(buffer.first_at_or_after(100), 0);
        assert_eq!(buffer.first_at_or_after(1_000), 2);
        assert_eq!(buffer.first_at_or_after(1_500), 2);
        assert_eq!(buffer.first_at_or_after(9_999), 4);
    }
}
