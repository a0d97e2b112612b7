//! Output stages: delivery at the edge of the graph.
//!
//! An [`OutputStage`] splits its work across two threads. The stage thread
//! pops routing records, takes a deep [`SlotSnapshot`] of successful frames
//! and releases the slot immediately, so a slow sink never holds up the
//! ring. A second sender thread owns the [`Delivery`] and works through the
//! snapshot backlog, retrying failed sends at the configured interval or
//! dropping them when no interval is set.

mod disk;
mod log;

pub use disk::DiskDelivery;
pub use log::LogDelivery;

use crate::convert;
use crate::error::Result;
use crate::frame::{PixelFormat, ScaleFilter};
use crate::queue::{Queue, QueueSender, RouteMsg, POLL_TIMEOUT};
use crate::slot::{SlotSnapshot, SlotTable};
use crate::stage::{Stage, StageCtl};
use image::ImageEncoder;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A sink for finished frames. Runs entirely on the sender thread.
pub trait Delivery: Send {
    fn open(&mut self) -> bool;

    fn close(&mut self);

    /// Deliver one snapshot. Returning `false` requests a retry (or a
    /// drop, when the stage has no resend interval).
    fn send(&mut self, snapshot: &SlotSnapshot) -> bool;
}

pub struct OutputStage {
    name: String,
    queue: Queue<RouteMsg>,
    slots: SlotTable,
    /// Retry failed sends at this interval; zero drops them.
    resend_interval: Duration,
    delivery: Option<Box<dyn Delivery>>,
    snap_tx: Option<QueueSender<SlotSnapshot>>,
    sender_ctl: Option<StageCtl>,
    sender: Option<JoinHandle<Box<dyn Delivery>>>,
}

impl OutputStage {
    pub fn new(
        name: impl Into<String>,
        queue: Queue<RouteMsg>,
        slots: SlotTable,
        resend_interval: Duration,
        delivery: Box<dyn Delivery>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            slots,
            resend_interval,
            delivery: Some(delivery),
            snap_tx: None,
            sender_ctl: None,
            sender: None,
        }
    }

    fn spawn_sender(&mut self, mut delivery: Box<dyn Delivery>) -> bool {
        let snaps: Queue<SlotSnapshot> = Queue::new();
        self.snap_tx = Some(snaps.sender());
        let ctl = StageCtl::new();
        self.sender_ctl = Some(ctl.clone());
        let resend = self.resend_interval;
        let name = self.name.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("{name}-sender"))
            .spawn(move || {
                while ctl.active() {
                    let Some(snapshot) = snaps.recv_timeout(POLL_TIMEOUT) else {
                        continue;
                    };
                    while !delivery.send(&snapshot) {
                        if resend.is_zero() {
                            tracing::warn!(
                                output = name,
                                stream = snapshot.stream_name,
                                frame = snapshot.frame.frame_no,
                                "delivery failed, frame dropped"
                            );
                            break;
                        }
                        tracing::warn!(
                            output = name,
                            stream = snapshot.stream_name,
                            "delivery failed, retrying"
                        );
                        ctl.sleep(resend);
                        if !ctl.active() {
                            break;
                        }
                    }
                }
                delivery.close();
                delivery
            });

        match spawned {
            Ok(handle) => {
                self.sender = Some(handle);
                true
            }
            Err(e) => {
                tracing::error!(output = self.name, error = %e, "failed to spawn sender thread");
                self.snap_tx = None;
                self.sender_ctl = None;
                false
            }
        }
    }
}

impl Stage for OutputStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> bool {
        let Some(mut delivery) = self.delivery.take() else {
            return false;
        };
        if !delivery.open() {
            tracing::error!(output = self.name, "delivery failed to open");
            self.delivery = Some(delivery);
            return false;
        }
        self.spawn_sender(delivery)
    }

    fn task(&mut self, _ctl: &StageCtl) {
        let Some(msg) = self.queue.recv_timeout(POLL_TIMEOUT) else {
            return;
        };
        let Some(slot) = self.slots.get(msg.stream, msg.slot) else {
            tracing::error!(
                stage = self.name,
                stream = msg.stream,
                slot = msg.slot,
                "routing record names an unknown slot"
            );
            return;
        };

        if msg.ok {
            let snapshot = slot.snapshot();
            if let Some(tx) = &self.snap_tx {
                tx.put(snapshot);
            }
        }
        slot.unref();
    }

    fn stop(&mut self) {
        if let Some(ctl) = self.sender_ctl.take() {
            ctl.deactivate();
        }
        self.snap_tx = None;
        if let Some(handle) = self.sender.take() {
            match handle.join() {
                Ok(delivery) => self.delivery = Some(delivery),
                Err(_) => {
                    tracing::error!(output = self.name, "sender thread panicked");
                }
            }
        }
    }
}

/// JPEG encoder with per-stream conflation: repeated sends of the same
/// picture reuse the previously encoded bytes.
pub struct JpegEncoder {
    quality: u8,
    /// Encode at most this wide; zero keeps the source size.
    width: u32,
    format: PixelFormat,
    cache: HashMap<u16, (u64, Arc<Vec<u8>>)>,
}

impl JpegEncoder {
    pub fn new(quality: u8, width: u32, format: Option<PixelFormat>) -> Self {
        let format = match format {
            Some(PixelFormat::Gray8) => PixelFormat::Gray8,
            Some(other) if other != PixelFormat::Rgb24 => {
                tracing::warn!(?other, "format not encodable as JPEG, using rgb24");
                PixelFormat::Rgb24
            }
            _ => PixelFormat::Rgb24,
        };
        Self {
            quality: quality.clamp(1, 100),
            width,
            format,
            cache: HashMap::new(),
        }
    }

    pub fn encode(&mut self, snapshot: &SlotSnapshot) -> Result<Arc<Vec<u8>>> {
        if let Some((frame_no, bytes)) = self.cache.get(&snapshot.stream_id) {
            if *frame_no == snapshot.frame.frame_no {
                return Ok(bytes.clone());
            }
        }

        let source = &snapshot.frame;
        let converted;
        let frame = if source.format == self.format && (self.width == 0 || self.width == source.width)
        {
            source
        } else {
            converted = convert::convert(source, self.format, self.width, 0, ScaleFilter::Bilinear)?;
            &converted
        };

        let color = match self.format {
            PixelFormat::Gray8 => image::ExtendedColorType::L8,
            _ => image::ExtendedColorType::Rgb8,
        };
        let mut buf = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, self.quality)
            .write_image(&frame.data, frame.width, frame.height, color)?;

        let bytes = Arc::new(buf);
        self.cache
            .insert(snapshot.stream_id, (source.frame_no, bytes.clone()));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoFrame;
    use crate::slot::Slot;
    use crossbeam_channel::{unbounded, Sender};

    struct Capture {
        tx: Sender<SlotSnapshot>,
        /// Fail this many sends before succeeding.
        fail_first: usize,
        closes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Delivery for Capture {
        fn open(&mut self) -> bool {
            true
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn send(&mut self, snapshot: &SlotSnapshot) -> bool {
            if self.fail_first > 0 {
                self.fail_first -= 1;
                return false;
            }
            let _ = self.tx.send(snapshot.clone());
            true
        }
    }

    fn slot_table() -> (SlotTable, Arc<Slot>) {
        let slot = Arc::new(Slot::new(0, "cam", 1));
        {
            let mut source = slot.source_mut();
            *source = VideoFrame::new(PixelFormat::Rgb24, 4, 4);
            source.pts = 10;
            source.dts = 10;
            source.frame_no = 1;
        }
        (SlotTable::new(vec![vec![slot.clone()]]), slot)
    }

    fn run_one(
        resend: Duration,
        fail_first: usize,
        msg: RouteMsg,
    ) -> (Vec<SlotSnapshot>, Arc<Slot>) {
        let (tx, rx) = unbounded();
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (slots, slot) = slot_table();
        slot.reset();
        let queue = Queue::new();
        queue.put(msg);

        let mut stage = OutputStage::new(
            "out",
            queue,
            slots,
            resend,
            Box::new(Capture {
                tx,
                fail_first,
                closes: closes.clone(),
            }),
        );
        assert!(stage.start());
        let ctl = StageCtl::new();
        stage.task(&ctl);
        // Slot released by the stage thread before delivery completes.
        assert_eq!(slot.reference_count(), 0);

        let mut delivered = Vec::new();
        while let Ok(snapshot) = rx.recv_timeout(Duration::from_millis(500)) {
            delivered.push(snapshot);
        }
        stage.stop();
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        (delivered, slot)
    }

    #[test]
    fn ok_record_is_snapshotted_and_delivered() {
        let (delivered, _slot) = run_one(
            Duration::ZERO,
            0,
            RouteMsg { stream: 0, slot: 0, ok: true },
        );
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].stream_name, "cam");
        assert_eq!(delivered[0].frame.frame_no, 1);
    }

    #[test]
    fn failed_record_is_released_without_delivery() {
        let (delivered, _slot) = run_one(
            Duration::ZERO,
            0,
            RouteMsg { stream: 0, slot: 0, ok: false },
        );
        assert!(delivered.is_empty());
    }

    #[test]
    fn resend_interval_retries_until_success() {
        let (delivered, _slot) = run_one(
            Duration::from_millis(10),
            2,
            RouteMsg { stream: 0, slot: 0, ok: true },
        );
        assert_eq!(delivered.len(), 1);
    }

    #[test]
    fn zero_interval_drops_failed_delivery() {
        let (delivered, _slot) = run_one(
            Duration::ZERO,
            1,
            RouteMsg { stream: 0, slot: 0, ok: true },
        );
        assert!(delivered.is_empty());
    }

    #[test]
    fn encoder_conflates_by_frame_no() {
        let (_, slot) = slot_table();
        slot.reset();
        let snapshot = slot.snapshot();

        let mut encoder = JpegEncoder::new(80, 0, None);
        let first = encoder.encode(&snapshot).unwrap();
        assert!(!first.is_empty());
        let second = encoder.encode(&snapshot).unwrap();
        // Same picture: same encoded buffer, not a re-encode.
        assert!(Arc::ptr_eq(&first, &second));

        let mut advanced = snapshot.clone();
        advanced.frame.frame_no = 2;
        let third = encoder.encode(&advanced).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn encoder_scales_and_grayscales() {
        let (_, slot) = slot_table();
        let snapshot = slot.snapshot();
        let mut encoder = JpegEncoder::new(80, 2, Some(PixelFormat::Gray8));
        let bytes = encoder.encode(&snapshot).unwrap();
        // JPEG magic
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
