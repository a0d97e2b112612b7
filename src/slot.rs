//! Shared frame slots.
//!
//! A `Slot` is one cell of an input's ring buffer: the most recent raw frame
//! for a stream plus a cache of derived (converted/rescaled) views. Exactly
//! one input writes it; the downstream stages it fans out to each hold one
//! reference per cycle and release it with [`Slot::unref`]. The reference
//! count reaching zero is the only signal that the input may overwrite the
//! cell. The view cache and the metadata bag are guarded independently so a
//! slow conversion in one consumer does not block metadata writes from
//! another.

use crate::convert::{self, ConvertError};
use crate::frame::{PixelFormat, ScaleFilter, VideoFrame};
use serde_json::{Map, Value};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Lock helper that survives poisoning: a panicked stage thread must not
/// take the whole pipeline down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Committed identity of the last frame passed through [`Slot::reset`].
#[derive(Default)]
struct Committed {
    width: u32,
    height: u32,
    pts: i64,
    dts: i64,
    fresh: bool,
}

struct CachedView {
    frame: VideoFrame,
    filter: ScaleFilter,
}

/// A view of the slot's frame, either the raw source or a cached
/// conversion. Holds the corresponding lock for its lifetime.
pub struct FrameView<'a>(ViewGuard<'a>);

enum ViewGuard<'a> {
    Source(MutexGuard<'a, VideoFrame>),
    Cached(MutexGuard<'a, Vec<CachedView>>, usize),
}

impl Deref for FrameView<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        match &self.0 {
            ViewGuard::Source(guard) => guard,
            ViewGuard::Cached(guard, idx) => &guard[*idx].frame,
        }
    }
}

/// One ring cell of a stream's frame buffer.
pub struct Slot {
    stream_id: u16,
    stream_name: String,
    /// Downstream fan-out depth: how many stage invocations reference this
    /// slot per cycle. Precomputed from graph topology.
    stage_count: usize,

    source: Mutex<VideoFrame>,
    committed: Mutex<Committed>,
    views: Mutex<Vec<CachedView>>,
    meta: Mutex<Map<String, Value>>,

    refs: AtomicUsize,
    in_flight: Mutex<bool>,
    freed: Condvar,
}

impl Slot {
    pub fn new(stream_id: u16, stream_name: impl Into<String>, stage_count: usize) -> Self {
        Self {
            stream_id,
            stream_name: stream_name.into(),
            stage_count,
            source: Mutex::new(VideoFrame::empty()),
            committed: Mutex::new(Committed::default()),
            views: Mutex::new(Vec::new()),
            meta: Mutex::new(Map::new()),
            refs: AtomicUsize::new(0),
            in_flight: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn reference_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Writable access to the raw frame. Only the owning input may call this,
    /// and only while the slot is free.
    pub fn source_mut(&self) -> MutexGuard<'_, VideoFrame> {
        lock(&self.source)
    }

    /// True from `reset()` until the cycle's last reference is released;
    /// while set, the owning input must not overwrite this cell.
    pub fn pending(&self) -> bool {
        *lock(&self.in_flight)
    }

    /// Wait up to `timeout` for the slot to become free. Returns whether it
    /// is free; the bounded wait lets the caller re-check its run flag.
    pub fn wait_free(&self, timeout: Duration) -> bool {
        let guard = lock(&self.in_flight);
        if !*guard {
            return true;
        }
        let (guard, _) = self
            .freed
            .wait_timeout_while(guard, timeout, |busy| *busy)
            .unwrap_or_else(|e| e.into_inner());
        !*guard
    }

    /// Commit the freshly written raw frame: compute freshness against the
    /// previous committed identity, drop stale derived views, arm the
    /// reference count and mark the slot in flight.
    pub fn reset(&self) {
        // Same lock order as `frame`: views before source.
        let mut views = lock(&self.views);
        let source = lock(&self.source);
        let mut committed = lock(&self.committed);
        if source.width != committed.width
            || source.height != committed.height
            || source.pts <= committed.pts
            || source.dts <= committed.dts
        {
            committed.width = source.width;
            committed.height = source.height;
            committed.fresh = true;
            views.clear();
        }
        committed.pts = source.pts;
        committed.dts = source.dts;
        drop(committed);
        drop(source);
        drop(views);

        self.refs.store(self.stage_count, Ordering::Release);
        *lock(&self.in_flight) = true;
    }

    /// Release one consumer reference. The reference that drives the count
    /// to zero clears the per-cycle metadata and freshness and wakes the
    /// input waiting to reuse this ring position.
    pub fn unref(&self) {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                lock(&self.committed).fresh = false;
                lock(&self.meta).clear();
                *lock(&self.in_flight) = false;
                self.freed.notify_one();
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!(
                    stream = self.stream_name,
                    "slot unref underflow: a consumer released twice"
                );
            }
        }
    }

    /// Whether the current frame is semantically new relative to the one
    /// before it (dimension change or non-increasing timestamps).
    pub fn fresh(&self) -> bool {
        lock(&self.committed).fresh
    }

    /// A view of the frame in the requested format and size, computed and
    /// cached on first request and recomputed in place once the raw frame's
    /// identity has advanced. `format: None` returns the raw frame as-is.
    /// A zero dimension is derived from the source aspect ratio.
    pub fn frame(
        &self,
        format: Option<PixelFormat>,
        width: u32,
        height: u32,
        filter: ScaleFilter,
    ) -> Result<FrameView<'_>, ConvertError> {
        // Lock order: views before source. The input only takes `source`,
        // and only while no consumer holds a reference.
        let mut views = lock(&self.views);
        let source = lock(&self.source);

        let format = match format {
            None => return Ok(FrameView(ViewGuard::Source(source))),
            Some(f)
                if f == source.format
                    && ((width == 0 && height == 0)
                        || (width == source.width && height == source.height)) =>
            {
                return Ok(FrameView(ViewGuard::Source(source)));
            }
            Some(f) => f,
        };

        let (width, height) = convert::resolve_dims(source.width, source.height, width, height);

        if let Some(idx) = views.iter().position(|v| {
            v.frame.format == format && v.frame.width == width && v.frame.height == height
        }) {
            if views[idx].frame.frame_no != source.frame_no {
                let filter = views[idx].filter;
                convert::convert_into(&source, &mut views[idx].frame, filter)?;
            }
            drop(source);
            return Ok(FrameView(ViewGuard::Cached(views, idx)));
        }

        let frame = convert::convert(&source, format, width, height, filter)?;
        views.push(CachedView { frame, filter });
        drop(source);
        let idx = views.len() - 1;
        Ok(FrameView(ViewGuard::Cached(views, idx)))
    }

    /// Mutate the per-cycle metadata object scoped to `stage_type`,
    /// creating it on first access. Cleared when the cycle's last
    /// reference is released.
    pub fn update_meta(&self, stage_type: &str, f: impl FnOnce(&mut Map<String, Value>)) {
        let mut meta = lock(&self.meta);
        let entry = meta
            .entry(stage_type.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(obj) = entry {
            f(obj);
        }
    }

    /// The whole metadata bag for this cycle.
    pub fn meta(&self) -> Map<String, Value> {
        lock(&self.meta).clone()
    }

    /// Deep copy for output handoff, so the shared slot can be released
    /// before delivery happens.
    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            stream_id: self.stream_id,
            stream_name: self.stream_name.clone(),
            fresh: self.fresh(),
            frame: lock(&self.source).clone(),
            meta: self.meta(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_view_count(&self) -> usize {
        lock(&self.views).len()
    }
}

/// Detached copy of a slot's state, owned by an output's sender thread.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub stream_id: u16,
    pub stream_name: String,
    pub fresh: bool,
    pub frame: VideoFrame,
    pub meta: Map<String, Value>,
}

/// Shared lookup from routing records to slots, handed to every consumer
/// stage of a pipeline.
#[derive(Clone)]
pub struct SlotTable {
    streams: Arc<Vec<Vec<Arc<Slot>>>>,
}

impl SlotTable {
    pub fn new(streams: Vec<Vec<Arc<Slot>>>) -> Self {
        Self {
            streams: Arc::new(streams),
        }
    }

    pub fn get(&self, stream: u16, slot: u8) -> Option<&Arc<Slot>> {
        self.streams.get(stream as usize)?.get(slot as usize)
    }
}
