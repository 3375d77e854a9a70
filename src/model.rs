//! Data model for bullet-comment annotations
//!
//! Raw items come off the wire per segment; the cleaning transform supplied
//! by the host turns them into `AnnotationItem`s before they enter the
//! ordered buffer. Items are consumed strictly in ascending `scheduled_at_ms`
//! order and are never individually addressed after ingestion.

use serde::{Deserialize, Serialize};

/// How a bullet moves (or doesn't) across the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulletMode {
    /// Right-to-left scrolling comment (general traffic)
    Scroll,
    /// Pinned at the top, centered, fixed display duration
    StaticTop,
    /// Pinned at the bottom, centered, fixed display duration
    StaticBottom,
}

/// Text size bucket chosen by the comment author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeClass {
    Small,
    #[default]
    Normal,
    Large,
}

/// Host-controlled strictness passed to the cleaning transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterLevel {
    /// No filtering beyond structural cleanup
    Off,
    /// Default moderation level
    #[default]
    Standard,
    /// Aggressive filtering
    Strict,
}

/// One annotation as fetched, before cleaning
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnnotationItem {
    /// Position on the media timeline (milliseconds) at which it appears
    pub scheduled_at_ms: u64,
    pub text: String,
    /// 0xAARRGGBB; None means the renderer's default
    pub color_argb: Option<u32>,
    #[serde(default)]
    pub size_class: SizeClass,
    pub mode: BulletMode,
}

/// One cleaned annotation, ready for the ordered buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationItem {
    /// Timeline position in milliseconds. Immutable once fetched.
    pub scheduled_at_ms: u64,
    pub text: String,
    pub color_argb: Option<u32>,
    pub size_class: SizeClass,
    pub mode: BulletMode,
}

impl AnnotationItem {
    /// Style parameters handed to the measurement service
    pub fn style(&self) -> TextStyle {
        TextStyle {
            size_class: self.size_class,
            color_argb: self.color_argb,
        }
    }
}

/// Style inputs for text measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub size_class: SizeClass,
    pub color_argb: Option<u32>,
}

#[cfg(test)]
pub(crate) fn scroll_item(scheduled_at_ms: u64, text: &str) -> AnnotationItem {
    AnnotationItem {
        scheduled_at_ms,
        text: text.to_string(),
        color_argb: None,
        size_class: SizeClass::Normal,
        mode: BulletMode::Scroll,
    }
}
