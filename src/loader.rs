//! Segment loader - fetches time-bucketed annotation segments on demand
//!
//! This module provides:
//! - Position-driven segment fetching with a prefetch-ahead window
//! - Per-segment retry state with exponential-backoff cooldowns
//! - A single-flight guard (overlapping reports are dropped, not queued)
//! - Merge ingestion into the shared ordered buffer
//!
//! ## Architecture
//! SegmentLoader is the SINGLE WRITER of the ordered buffer. The frame
//! simulation reads the same buffer through its own cursor and never blocks
//! on the loader. Backoff is a pure eligibility computation checked against
//! `now` on each position report; no timer callbacks are scheduled, so there
//! is nothing to leak or cancel besides the state map itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::buffer::SharedBuffer;
use crate::config::BarrageConfig;
use crate::model::FilterLevel;
use crate::source::DanmakuSource;

/// Fetch lifecycle of one segment index
///
/// Created on first reference. `pending` while a fetch is outstanding;
/// `loaded` after success, and also after failure for the duration of the
/// cooldown (treating "currently failing" as "temporarily loaded" keeps a
/// hot retry loop off the position-report path). When the cooldown expires
/// the segment becomes eligible again; the retry counter survives so
/// consecutive failures keep backing off.
#[derive(Debug, Clone, Default)]
struct SegmentState {
    loaded: bool,
    pending: bool,
    retry_count: u32,
    next_eligible_at: Option<Instant>,
}

impl SegmentState {
    fn fetchable(&self) -> bool {
        !self.pending && !self.loaded
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    timeline_id: Option<u64>,
    group_key: Option<String>,
    filter_level: FilterLevel,
    segments: HashMap<u32, SegmentState>,
}

/// Lazily fetches annotation segments for the attached timeline
///
/// `Arc`-share it between the host's position ticks; `report_position` may
/// suspend on network I/O and is safe to call from any task.
pub struct SegmentLoader<S: DanmakuSource> {
    source: Arc<S>,
    config: BarrageConfig,
    buffer: SharedBuffer,
    state: Mutex<LoaderState>,
    /// Single-flight guard: at most one outstanding fetch, module-wide
    in_flight: AtomicBool,
}

impl<S: DanmakuSource> SegmentLoader<S> {
    pub fn new(source: Arc<S>, config: BarrageConfig) -> Self {
        Self {
            source,
            config,
            buffer: crate::buffer::shared_buffer(),
            state: Mutex::new(LoaderState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Shared buffer handle for wiring up a `BarrageEngine`
    pub fn buffer(&self) -> SharedBuffer {
        Arc::clone(&self.buffer)
    }

    /// Switch to a new media timeline, dropping all previous state
    pub fn attach(&self, timeline_id: u64) {
        self.reset();
        self.state.lock().timeline_id = Some(timeline_id);
        info!("danmaku: attached timeline {}", timeline_id);
    }

    /// Drop the buffer, all segment/retry state and the in-flight flag
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.timeline_id = None;
            state.group_key = None;
            state.segments.clear();
        }
        self.buffer.write().clear();
        self.in_flight.store(false, Ordering::Release);
        debug!("danmaku: loader reset");
    }

    /// Filter strictness forwarded to the cleaning transform on every ingest
    pub fn set_filter_level(&self, level: FilterLevel) {
        self.state.lock().filter_level = level;
    }

    /// Segment indexes whose data is currently in the buffer
    pub fn loaded_segments(&self) -> Vec<u32> {
        let state = self.state.lock();
        let mut loaded: Vec<u32> = state
            .segments
            .iter()
            .filter(|(_, s)| s.loaded && s.next_eligible_at.is_none())
            .map(|(ix, _)| *ix)
            .collect();
        loaded.sort_unstable();
        loaded
    }

    /// React to a playback-position report (coarse ticks and seeks, not
    /// every frame): fetch the current segment if missing, or prefetch the
    /// next one near a boundary. At most one segment is fetched per call.
    pub async fn report_position(&self, timeline_ms: u64) {
        self.report_position_at(timeline_ms, Instant::now()).await;
    }

    pub(crate) async fn report_position_at(&self, timeline_ms: u64, now: Instant) {
        if self.source.is_offline() {
            trace!("danmaku: offline, skipping segment check at {}ms", timeline_ms);
            return;
        }

        let Some((timeline_id, segment)) = self.pick_target(timeline_ms, now) else {
            return;
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("danmaku: fetch already in flight, dropping report for segment {}", segment);
            return;
        }

        self.mark_pending(timeline_id, segment);
        match self.fetch_and_ingest(timeline_id, segment).await {
            Ok(kept) => {
                self.mark_loaded(timeline_id, segment);
                info!(
                    "danmaku: segment {} of timeline {} loaded ({} items after cleaning)",
                    segment, timeline_id, kept
                );
            }
            Err(e) => {
                let (retry_count, cooldown_ms) = self.mark_failed(timeline_id, segment, now);
                error!(
                    "danmaku: segment {} of timeline {} failed (attempt {}): {}; retrying in {}ms",
                    segment, timeline_id, retry_count, e, cooldown_ms
                );
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }

    /// Decide which segment (if any) this report should fetch.
    /// Also expires elapsed cooldowns, making failed segments eligible again.
    fn pick_target(&self, timeline_ms: u64, now: Instant) -> Option<(u64, u32)> {
        let mut state = self.state.lock();
        let timeline_id = state.timeline_id?;

        for segment in state.segments.values_mut() {
            if segment.loaded && segment.next_eligible_at.is_some_and(|at| now >= at) {
                segment.loaded = false;
                segment.next_eligible_at = None;
            }
        }

        let current = self.config.segment_index(timeline_ms);
        if state
            .segments
            .get(&current)
            .is_none_or(SegmentState::fetchable)
        {
            return Some((timeline_id, current));
        }

        let segment_end = current as u64 * self.config.segment_duration_ms;
        if segment_end.saturating_sub(timeline_ms) < self.config.preload_distance_ms {
            let next = current + 1;
            if state
                .segments
                .get(&next)
                .is_none_or(SegmentState::fetchable)
            {
                return Some((timeline_id, next));
            }
        }

        None
    }

    async fn fetch_and_ingest(&self, timeline_id: u64, segment: u32) -> Result<usize> {
        let (group_key, filter_level) = {
            let state = self.state.lock();
            (state.group_key.clone(), state.filter_level)
        };

        let group_key = match group_key {
            Some(key) => key,
            None => {
                let key = self.source.resolve_group_key(timeline_id).await?;
                let mut state = self.state.lock();
                // a reset may have switched timelines while we were suspended
                if state.timeline_id == Some(timeline_id) {
                    state.group_key = Some(key.clone());
                }
                key
            }
        };

        let raw = self.source.fetch_segment(timeline_id, &group_key, segment).await?;
        let fetched = raw.len();
        let cleaned = self.source.clean_items(raw, filter_level);
        let kept = cleaned.len();

        // holding the state lock across the ingest serializes against
        // reset/attach: a fetch that outlived its timeline must not land in
        // the new timeline's buffer
        let state = self.state.lock();
        if state.timeline_id != Some(timeline_id) {
            debug!(
                "danmaku: discarding segment {} fetched for detached timeline {}",
                segment, timeline_id
            );
            return Ok(0);
        }
        debug!(
            "danmaku: segment {} fetched {} raw items, {} kept",
            segment, fetched, kept
        );
        self.buffer.write().ingest(cleaned);
        Ok(kept)
    }

    fn mark_pending(&self, timeline_id: u64, segment: u32) {
        let mut state = self.state.lock();
        if state.timeline_id != Some(timeline_id) {
            return;
        }
        let entry = state.segments.entry(segment).or_default();
        entry.pending = true;
        entry.loaded = false;
    }

    fn mark_loaded(&self, timeline_id: u64, segment: u32) {
        let mut state = self.state.lock();
        // stale completion after a timeline switch; the new map owns nothing
        // about this fetch
        if state.timeline_id != Some(timeline_id) {
            return;
        }
        let entry = state.segments.entry(segment).or_default();
        entry.pending = false;
        entry.loaded = true;
        entry.retry_count = 0;
        entry.next_eligible_at = None;
    }

    fn mark_failed(&self, timeline_id: u64, segment: u32, now: Instant) -> (u32, u64) {
        let mut state = self.state.lock();
        if state.timeline_id != Some(timeline_id) {
            return (0, 0);
        }
        let entry = state.segments.entry(segment).or_default();
        entry.pending = false;
        entry.loaded = true;
        entry.retry_count += 1;
        let cooldown = self.config.retry_cooldown(entry.retry_count);
        entry.next_eligible_at = Some(now + cooldown);
        (entry.retry_count, cooldown.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnnotationItem, BulletMode, RawAnnotationItem, SizeClass};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn raw(scheduled_at_ms: u64, text: &str) -> RawAnnotationItem {
        RawAnnotationItem {
            scheduled_at_ms,
            text: text.to_string(),
            color_argb: None,
            size_class: SizeClass::Normal,
            mode: BulletMode::Scroll,
        }
    }

    /// Scriptable source: per-segment payloads, failure toggle, offline
    /// toggle and an optional gate that holds fetches open.
    struct TestSource {
        segments: HashMap<u32, Vec<RawAnnotationItem>>,
        fetch_log: Mutex<Vec<u32>>,
        resolve_calls: AtomicUsize,
        fail: AtomicBool,
        offline: AtomicBool,
        gate: Option<Semaphore>,
    }

    impl TestSource {
        fn new(segments: HashMap<u32, Vec<RawAnnotationItem>>) -> Self {
            Self {
                segments,
                fetch_log: Mutex::new(Vec::new()),
                resolve_calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                offline: AtomicBool::new(false),
                gate: None,
            }
        }

        fn gated(segments: HashMap<u32, Vec<RawAnnotationItem>>) -> Self {
            let mut source = Self::new(segments);
            source.gate = Some(Semaphore::new(0));
            source
        }

        fn fetch_log(&self) -> Vec<u32> {
            self.fetch_log.lock().clone()
        }
    }

    impl DanmakuSource for TestSource {
        async fn fetch_segment(
            &self,
            _timeline_id: u64,
            group_key: &str,
            segment_index: u32,
        ) -> Result<Vec<RawAnnotationItem>> {
            assert_eq!(group_key, "part-1");
            self.fetch_log.lock().push(segment_index);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail.load(Ordering::Acquire) {
                anyhow::bail!("simulated network failure");
            }
            Ok(self.segments.get(&segment_index).cloned().unwrap_or_default())
        }

        async fn resolve_group_key(&self, _timeline_id: u64) -> Result<String> {
            self.resolve_calls.fetch_add(1, Ordering::AcqRel);
            if self.fail.load(Ordering::Acquire) {
                anyhow::bail!("simulated resolve failure");
            }
            Ok("part-1".to_string())
        }

        fn clean_items(
            &self,
            raw: Vec<RawAnnotationItem>,
            level: FilterLevel,
        ) -> Vec<AnnotationItem> {
            raw.into_iter()
                .filter(|item| level == FilterLevel::Off || item.text != "blocked")
                .map(|item| AnnotationItem {
                    scheduled_at_ms: item.scheduled_at_ms,
                    text: item.text,
                    color_argb: item.color_argb,
                    size_class: item.size_class,
                    mode: item.mode,
                })
                .collect()
        }

        fn is_offline(&self) -> bool {
            self.offline.load(Ordering::Acquire)
        }
    }

    fn loader_with(
        segments: HashMap<u32, Vec<RawAnnotationItem>>,
    ) -> (Arc<TestSource>, SegmentLoader<TestSource>) {
        let source = Arc::new(TestSource::new(segments));
        let loader = SegmentLoader::new(Arc::clone(&source), BarrageConfig::default());
        loader.attach(7);
        (source, loader)
    }

    #[tokio::test]
    async fn test_segment_and_prefetch_scenario() {
        let (source, loader) = loader_with(HashMap::from([
            (1, vec![raw(100, "early")]),
            (2, vec![raw(400_000, "late")]),
        ]));

        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1]);

        // 500ms from the boundary: inside the preload window
        loader.report_position(359_500).await;
        assert_eq!(source.fetch_log(), vec![1, 2]);

        // both loaded, nothing left to do
        loader.report_position(359_500).await;
        assert_eq!(source.fetch_log(), vec![1, 2]);
        assert_eq!(loader.loaded_segments(), vec![1, 2]);

        let buffer = loader.buffer();
        let buffer = buffer.read();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get(0).unwrap().scheduled_at_ms, 100);
        assert_eq!(buffer.get(1).unwrap().scheduled_at_ms, 400_000);
    }

    #[tokio::test]
    async fn test_no_prefetch_outside_window() {
        let (source, loader) = loader_with(HashMap::from([(1, vec![])]));
        loader.report_position(100_000).await;
        loader.report_position(200_000).await;
        // 160s remain in segment 1, well outside the 60s window
        assert_eq!(source.fetch_log(), vec![1]);
    }

    #[tokio::test]
    async fn test_single_flight_drops_overlapping_reports() {
        let source = Arc::new(TestSource::gated(HashMap::from([(1, vec![])])));
        let loader = Arc::new(SegmentLoader::new(
            Arc::clone(&source),
            BarrageConfig::default(),
        ));
        loader.attach(7);

        let background = Arc::clone(&loader);
        let first = tokio::spawn(async move { background.report_position(0).await });

        // let the first report reach the gated fetch
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.fetch_log(), vec![1]);

        // overlapping report for the same segment is dropped, not queued
        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1]);

        // even a report wanting a different segment is dropped by the guard
        loader.report_position(720_000).await;
        assert_eq!(source.fetch_log(), vec![1]);

        source.gate.as_ref().unwrap().add_permits(1);
        first.await.unwrap();
        assert_eq!(source.fetch_log(), vec![1]);
        assert_eq!(loader.loaded_segments(), vec![1]);
    }

    #[tokio::test]
    async fn test_stale_fetch_after_timeline_switch_is_discarded() {
        let source = Arc::new(TestSource::gated(HashMap::from([(1, vec![raw(5, "old")])])));
        let loader = Arc::new(SegmentLoader::new(
            Arc::clone(&source),
            BarrageConfig::default(),
        ));
        loader.attach(7);

        let background = Arc::clone(&loader);
        let first = tokio::spawn(async move { background.report_position(0).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.fetch_log(), vec![1]);

        // switch media while the fetch is still in flight
        loader.attach(8);
        source.gate.as_ref().unwrap().add_permits(1);
        first.await.unwrap();

        // the old timeline's items never reach the new buffer
        assert!(loader.buffer().read().is_empty());
        assert_eq!(loader.loaded_segments(), Vec::<u32>::new());

        // the new timeline fetches its own copy of segment 1
        source.gate.as_ref().unwrap().add_permits(1);
        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1, 1]);
        assert_eq!(loader.buffer().read().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_cooldown_then_recovery() {
        let (source, loader) = loader_with(HashMap::from([(1, vec![raw(5, "hi")])]));
        source.fail.store(true, Ordering::Release);

        let t0 = Instant::now();
        loader.report_position_at(0, t0).await;
        assert_eq!(source.fetch_log().len(), 0); // failed at resolve, before fetch
        assert_eq!(loader.loaded_segments(), Vec::<u32>::new());

        // cooling down: immediate retry is suppressed
        loader.report_position_at(0, t0 + Duration::from_millis(500)).await;
        assert_eq!(source.resolve_calls.load(Ordering::Acquire), 1);

        // first cooldown is 1s; past it the segment is eligible again
        loader
            .report_position_at(0, t0 + Duration::from_millis(1_100))
            .await;
        assert_eq!(source.resolve_calls.load(Ordering::Acquire), 2);

        // second failure backs off for 2s
        let t1 = t0 + Duration::from_millis(1_100);
        loader
            .report_position_at(0, t1 + Duration::from_millis(1_500))
            .await;
        assert_eq!(source.resolve_calls.load(Ordering::Acquire), 2);

        source.fail.store(false, Ordering::Release);
        loader
            .report_position_at(0, t1 + Duration::from_millis(2_100))
            .await;
        assert_eq!(source.fetch_log(), vec![1]);
        assert_eq!(loader.loaded_segments(), vec![1]);
        assert_eq!(loader.buffer().read().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_skips_without_touching_retry_state() {
        let (source, loader) = loader_with(HashMap::from([(1, vec![])]));
        source.offline.store(true, Ordering::Release);

        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), Vec::<u32>::new());
        assert!(loader.state.lock().segments.is_empty());

        source.offline.store(false, Ordering::Release);
        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1]);
    }

    #[tokio::test]
    async fn test_group_key_resolved_once_per_timeline() {
        let (source, loader) = loader_with(HashMap::from([(1, vec![]), (2, vec![])]));
        loader.report_position(0).await;
        loader.report_position(359_500).await;
        assert_eq!(source.fetch_log(), vec![1, 2]);
        assert_eq!(source.resolve_calls.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_filter_level_forwarded_to_cleaning() {
        let (_, loader) = loader_with(HashMap::from([(
            1,
            vec![raw(5, "fine"), raw(6, "blocked")],
        )]));
        loader.report_position(0).await;
        let texts: Vec<String> = {
            let buffer = loader.buffer();
            let buffer = buffer.read();
            (0..buffer.len())
                .map(|i| buffer.get(i).unwrap().text.clone())
                .collect()
        };
        assert_eq!(texts, vec!["fine"]);
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let (source, loader) = loader_with(HashMap::from([(1, vec![raw(5, "hi")])]));
        loader.report_position(0).await;
        assert_eq!(loader.buffer().read().len(), 1);

        loader.reset();
        assert!(loader.buffer().read().is_empty());
        assert_eq!(loader.loaded_segments(), Vec::<u32>::new());

        // detached: reports are inert until a new timeline is attached
        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1]);

        loader.attach(8);
        loader.report_position(0).await;
        assert_eq!(source.fetch_log(), vec![1, 1]);
    }
}
