//! Input stages: one producer thread per video stream.
//!
//! An [`InputStage`] drives a [`FrameSource`] through a ring of shared
//! slots. Each produced frame is committed with `reset()` and announced to
//! every downstream processing queue as a routing record. Live sources
//! never wait for consumers: when the next ring slot is still referenced
//! the frame is decoded into a scratch buffer and dropped, and the first
//! frame after every (re)open is dropped so a stale keyframe is not
//! published. Finite sources instead wait for the slot to come free.

mod pattern;
mod y4m;

pub use pattern::PatternSource;
pub use y4m::Y4mSource;

use crate::frame::VideoFrame;
use crate::queue::{QueueSender, RouteMsg, POLL_TIMEOUT};
use crate::slot::Slot;
use crate::stage::{Stage, StageCtl};
use std::sync::Arc;
use std::time::Duration;

/// Pause before reopening a source that ended or changed format.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(3);

/// Outcome of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete frame was written into the buffer.
    Frame,
    /// Nothing available yet; try again.
    Again,
    /// The stream ended.
    Eof,
    /// The stream's format or geometry changed; reopen to pick it up.
    Changed,
    /// The stream carries data this source cannot decode.
    Unsupported,
    /// Transient read failure.
    Error,
}

/// A decodable video source. Implementations pace themselves: `read`
/// blocks (bounded) until the next frame is due.
pub trait FrameSource: Send {
    fn open(&mut self) -> bool;

    fn close(&mut self);

    /// Decode the next frame into `frame` (format, geometry, timestamps
    /// and data; the caller assigns the picture number).
    fn read(&mut self, frame: &mut VideoFrame) -> ReadStatus;
}

/// Producer stage: source → slot ring → routing fan-out.
pub struct InputStage {
    name: String,
    stream_id: u16,
    live: bool,
    source: Box<dyn FrameSource>,
    ring: Vec<Arc<Slot>>,
    outs: Vec<QueueSender<RouteMsg>>,
    cursor: usize,
    frame_no: u64,
    drop_first: bool,
    /// Drop-decode target while the ring is saturated.
    scratch: VideoFrame,
}

impl InputStage {
    pub fn new(
        name: impl Into<String>,
        stream_id: u16,
        live: bool,
        source: Box<dyn FrameSource>,
        ring: Vec<Arc<Slot>>,
        outs: Vec<QueueSender<RouteMsg>>,
    ) -> Self {
        Self {
            name: name.into(),
            stream_id,
            live,
            source,
            ring,
            outs,
            cursor: 0,
            frame_no: 0,
            drop_first: false,
            scratch: VideoFrame::empty(),
        }
    }

    /// Close, back off, reopen. A failed reopen finishes the stage.
    fn restart(&mut self, ctl: &StageCtl) {
        self.source.close();
        ctl.sleep(RESTART_BACKOFF);
        if !ctl.active() {
            return;
        }
        if self.source.open() {
            tracing::info!(input = self.name, "source reopened");
            self.drop_first = self.live;
        } else {
            tracing::error!(input = self.name, "source reopen failed, finishing");
            ctl.deactivate();
        }
    }

    fn publish(&mut self) {
        let slot = &self.ring[self.cursor];
        slot.reset();
        for out in &self.outs {
            out.put(RouteMsg {
                stream: self.stream_id,
                slot: self.cursor as u8,
                ok: true,
            });
        }
        self.cursor = (self.cursor + 1) % self.ring.len();
    }
}

impl Stage for InputStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> bool {
        self.drop_first = self.live;
        self.cursor = 0;
        self.source.open()
    }

    fn task(&mut self, ctl: &StageCtl) {
        let slot_free = if self.live {
            // Never stall a live source: decode into scratch and drop.
            !self.ring[self.cursor].pending()
        } else {
            if !self.ring[self.cursor].wait_free(POLL_TIMEOUT) {
                return;
            }
            true
        };

        let status = if slot_free {
            let mut frame = self.ring[self.cursor].source_mut();
            self.source.read(&mut frame)
        } else {
            self.source.read(&mut self.scratch)
        };

        match status {
            ReadStatus::Frame => {
                if !slot_free {
                    tracing::trace!(input = self.name, "ring saturated, frame dropped");
                    return;
                }
                if self.drop_first {
                    self.drop_first = false;
                    tracing::debug!(input = self.name, "first frame after open dropped");
                    return;
                }
                self.frame_no += 1;
                self.ring[self.cursor].source_mut().frame_no = self.frame_no;
                self.publish();
            }
            ReadStatus::Again => {}
            ReadStatus::Eof => {
                if self.live {
                    tracing::warn!(input = self.name, "live source ended, restarting");
                    self.restart(ctl);
                } else {
                    tracing::info!(input = self.name, "end of stream");
                    ctl.deactivate();
                }
            }
            ReadStatus::Changed => {
                tracing::warn!(input = self.name, "source format changed, restarting");
                self.restart(ctl);
            }
            ReadStatus::Unsupported => {
                tracing::debug!(input = self.name, "unsupported data skipped");
            }
            ReadStatus::Error => {
                tracing::warn!(input = self.name, "read error, frame skipped");
            }
        }
    }

    fn stop(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::queue::Queue;

    /// Source that replays a fixed script of outcomes.
    struct Scripted {
        script: Vec<ReadStatus>,
        pos: usize,
        opens: usize,
        open_ok: bool,
        pts: i64,
    }

    impl Scripted {
        fn new(script: Vec<ReadStatus>) -> Self {
            Self {
                script,
                pos: 0,
                opens: 0,
                open_ok: true,
                pts: 0,
            }
        }
    }

    impl FrameSource for Scripted {
        fn open(&mut self) -> bool {
            self.opens += 1;
            self.open_ok
        }

        fn close(&mut self) {}

        fn read(&mut self, frame: &mut VideoFrame) -> ReadStatus {
            let status = self.script.get(self.pos).copied().unwrap_or(ReadStatus::Eof);
            self.pos += 1;
            if status == ReadStatus::Frame {
                frame.reformat(PixelFormat::Gray8, 4, 4);
                self.pts += 100;
                frame.pts = self.pts;
                frame.dts = self.pts;
            }
            status
        }
    }

    fn ring(depth: usize, fanout: usize) -> Vec<Arc<Slot>> {
        (0..depth).map(|_| Arc::new(Slot::new(0, "s", fanout))).collect()
    }

    fn drain(queue: &Queue<RouteMsg>) -> Vec<RouteMsg> {
        let mut msgs = Vec::new();
        while let Some(msg) = queue.recv_timeout(Duration::from_millis(1)) {
            msgs.push(msg);
        }
        msgs
    }

    #[test]
    fn frames_round_robin_and_fan_out() {
        let ring = ring(2, 1);
        let q1 = Queue::new();
        let q2 = Queue::new();
        let mut stage = InputStage::new(
            "in",
            3,
            false,
            Box::new(Scripted::new(vec![ReadStatus::Frame; 3])),
            ring.clone(),
            vec![q1.sender(), q2.sender()],
        );
        let ctl = StageCtl::new();
        assert!(stage.start());

        stage.task(&ctl);
        stage.task(&ctl);
        // Free the first slot so the third frame can land there again.
        ring[0].unref();
        stage.task(&ctl);

        let msgs = drain(&q1);
        assert_eq!(
            msgs.iter().map(|m| m.slot).collect::<Vec<_>>(),
            vec![0, 1, 0]
        );
        assert!(msgs.iter().all(|m| m.stream == 3 && m.ok));
        assert_eq!(drain(&q2).len(), 3);

        // Picture numbers are monotone across the ring.
        assert_eq!(ring[0].source_mut().frame_no, 3);
        assert_eq!(ring[1].source_mut().frame_no, 2);
    }

    #[test]
    fn finite_source_finishes_on_eof() {
        let q = Queue::new();
        let mut stage = InputStage::new(
            "in",
            0,
            false,
            Box::new(Scripted::new(vec![ReadStatus::Frame, ReadStatus::Eof])),
            ring(2, 1),
            vec![q.sender()],
        );
        let ctl = StageCtl::new();
        assert!(stage.start());
        stage.task(&ctl);
        assert!(ctl.active());
        stage.task(&ctl);
        assert!(!ctl.active());
        assert_eq!(drain(&q).len(), 1);
    }

    #[test]
    fn live_source_drops_first_frame_after_open() {
        let q = Queue::new();
        let mut stage = InputStage::new(
            "in",
            0,
            true,
            Box::new(Scripted::new(vec![ReadStatus::Frame; 3])),
            ring(3, 1),
            vec![q.sender()],
        );
        let ctl = StageCtl::new();
        assert!(stage.start());
        stage.task(&ctl); // dropped
        stage.task(&ctl);
        stage.task(&ctl);
        assert_eq!(drain(&q).len(), 2);
    }

    #[test]
    fn live_source_drops_when_ring_saturated() {
        let ring = ring(1, 1);
        let q = Queue::new();
        let mut stage = InputStage::new(
            "in",
            0,
            true,
            Box::new(Scripted::new(vec![ReadStatus::Frame; 4])),
            ring.clone(),
            vec![q.sender()],
        );
        let ctl = StageCtl::new();
        assert!(stage.start());
        stage.task(&ctl); // drop-first
        stage.task(&ctl); // published, slot now in flight
        stage.task(&ctl); // saturated: decoded and dropped
        stage.task(&ctl); // still saturated
        assert_eq!(drain(&q).len(), 1);
        assert!(ring[0].pending());
        // The published frame is intact despite the drops.
        assert_eq!(ring[0].source_mut().frame_no, 1);
    }

    #[test]
    fn transient_errors_skip_the_cycle() {
        let q = Queue::new();
        let mut stage = InputStage::new(
            "in",
            0,
            false,
            Box::new(Scripted::new(vec![
                ReadStatus::Error,
                ReadStatus::Unsupported,
                ReadStatus::Again,
                ReadStatus::Frame,
            ])),
            ring(2, 1),
            vec![q.sender()],
        );
        let ctl = StageCtl::new();
        assert!(stage.start());
        for _ in 0..4 {
            stage.task(&ctl);
        }
        assert!(ctl.active());
        assert_eq!(drain(&q).len(), 1);
    }

    #[test]
    fn failed_open_reported() {
        let mut source = Scripted::new(vec![]);
        source.open_ok = false;
        let mut stage = InputStage::new("in", 0, false, Box::new(source), ring(1, 1), vec![]);
        assert!(!stage.start());
    }
}
