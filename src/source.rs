//! Boundary traits implemented by the host
//!
//! The engine never talks to the network or the text shaper directly; it
//! consumes these seams. `DanmakuSource` wraps the annotation backend
//! (fetch, group-key resolution, cleaning, connectivity) and `TextMeasurer`
//! wraps shaping/measurement, returning an opaque paintable the host's
//! renderer knows how to draw.

use anyhow::Result;

use crate::model::{AnnotationItem, FilterLevel, RawAnnotationItem, TextStyle};

/// Annotation backend for one or more media timelines
pub trait DanmakuSource: Send + Sync + 'static {
    /// Fetch the raw items of one segment of one timeline
    fn fetch_segment(
        &self,
        timeline_id: u64,
        group_key: &str,
        segment_index: u32,
    ) -> impl Future<Output = Result<Vec<RawAnnotationItem>>> + Send;

    /// Resolve the grouping key (e.g. the sub-stream of a multi-part video)
    /// for a timeline. Failure is treated exactly like a fetch failure.
    fn resolve_group_key(&self, timeline_id: u64) -> impl Future<Output = Result<String>> + Send;

    /// Cleaning/filtering transform applied to every fetched batch.
    /// Synchronous and pure; policy content is the host's business.
    fn clean_items(&self, raw: Vec<RawAnnotationItem>, level: FilterLevel)
    -> Vec<AnnotationItem>;

    /// Connectivity signal; fetches are skipped entirely while offline
    fn is_offline(&self) -> bool;
}

/// Measured text plus the paintable the renderer will draw
#[derive(Debug, Clone)]
pub struct MeasuredText<P> {
    /// Advance width in pixels
    pub width: f32,
    /// Pre-shaped artifact, opaque to the engine
    pub paint: P,
}

/// Text shaping/measurement service
///
/// `Paint` is whatever the host renderer paints (a shaped glyph run, a
/// texture handle). The engine only stores and returns it.
pub trait TextMeasurer: Send + Sync {
    type Paint: Clone + Send;

    fn measure(&self, text: &str, style: &TextStyle) -> MeasuredText<Self::Paint>;
}
