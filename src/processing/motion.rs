//! Motion detection by frame differencing.
//!
//! Compares a downscaled grayscale view of each frame against the previous
//! frame of the same stream and reports the mean absolute luma difference
//! into the slot's metadata. A fresh frame (stream discontinuity) resets
//! the reference, so a restarted source never diffs against stale content.

use super::Transform;
use crate::frame::{PixelFormat, ScaleFilter, VideoFrame};
use crate::slot::Slot;
use std::collections::HashMap;

pub struct MotionTransform {
    /// Mean absolute luma difference (0..255) that counts as motion.
    threshold: f64,
    /// Analysis raster width; height follows the source aspect.
    width: u32,
    filter: ScaleFilter,
    /// When set, frames without motion are not forwarded.
    gate: bool,
    previous: HashMap<u16, VideoFrame>,
}

impl MotionTransform {
    pub fn new(threshold: f64, width: u32, filter: ScaleFilter, gate: bool) -> Self {
        Self {
            threshold,
            width: width.max(2),
            filter,
            gate,
            previous: HashMap::new(),
        }
    }

    fn level(previous: &VideoFrame, current: &VideoFrame) -> Option<f64> {
        if previous.width != current.width
            || previous.height != current.height
            || previous.data.is_empty()
        {
            return None;
        }
        let total: u64 = previous
            .data
            .iter()
            .zip(&current.data)
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        Some(total as f64 / current.data.len() as f64)
    }
}

impl Transform for MotionTransform {
    fn process(&mut self, slot: &Slot) -> bool {
        let stream = slot.stream_id();
        if slot.fresh() {
            self.previous.remove(&stream);
        }

        let view = match slot.frame(Some(PixelFormat::Gray8), self.width, 0, self.filter) {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(stream = slot.stream_name(), error = %e, "motion view failed");
                return false;
            }
        };

        let level = self
            .previous
            .get(&stream)
            .and_then(|prev| Self::level(prev, &view))
            .unwrap_or(0.0);
        let triggered = level >= self.threshold;

        let current: VideoFrame = view.clone();
        drop(view);
        self.previous.insert(stream, current);

        slot.update_meta("motion", |obj| {
            obj.insert("level".into(), level.into());
            obj.insert("triggered".into(), triggered.into());
        });
        if triggered {
            tracing::debug!(stream = slot.stream_name(), level, "motion detected");
        }

        !self.gate || triggered
    }
}
