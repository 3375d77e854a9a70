//! barrage - bullet-comment (danmaku) streaming and overlay engine
//!
//! Two cooperating components wired through one shared, time-ordered buffer:
//!
//! - [`SegmentLoader`] lazily fetches time-bucketed annotation segments for
//!   the current playback position, with prefetch-ahead, a single-flight
//!   guard and per-segment exponential-backoff retry. It is the sole writer
//!   of the buffer and runs on the host's async scheduler.
//! - [`BarrageEngine`] runs once per render frame: it reads the buffer
//!   through its own monotone cursor, spawns due items into screen lanes,
//!   advances and retires in-flight bullets and emits a [`DrawList`]
//!   snapshot for the host to paint. It never blocks and never awaits.
//!
//! The network client, connectivity signal, cleaning transform and text
//! measurement are host collaborators behind the [`DanmakuSource`] and
//! [`TextMeasurer`] traits. Nothing in here is fatal to the host; the worst
//! failure mode is an empty overlay.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod loader;
pub mod model;
pub mod source;

pub use buffer::{OrderedBuffer, SharedBuffer, shared_buffer};
pub use config::BarrageConfig;
pub use engine::snapshot::{DrawItem, DrawList};
pub use engine::{BarrageEngine, FrameInput};
pub use loader::SegmentLoader;
pub use model::{AnnotationItem, BulletMode, FilterLevel, RawAnnotationItem, SizeClass, TextStyle};
pub use source::{DanmakuSource, MeasuredText, TextMeasurer};
