//! Log delivery: one structured event line per frame.

use super::Delivery;
use crate::slot::SlotSnapshot;
use serde_json::Value;

/// Writes each delivered frame as a structured log event. Useful as a
/// wiring check and as a lightweight event feed.
#[derive(Default)]
pub struct LogDelivery;

impl Delivery for LogDelivery {
    fn open(&mut self) -> bool {
        true
    }

    fn close(&mut self) {}

    fn send(&mut self, snapshot: &SlotSnapshot) -> bool {
        let meta = Value::Object(snapshot.meta.clone());
        tracing::info!(
            target: "framesight::events",
            stream = snapshot.stream_name,
            frame = snapshot.frame.frame_no,
            pts = snapshot.frame.pts,
            width = snapshot.frame.width,
            height = snapshot.frame.height,
            fresh = snapshot.fresh,
            meta = %meta,
            "frame delivered"
        );
        true
    }
}
