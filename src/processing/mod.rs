//! Processing stages: analysis between inputs and outputs.
//!
//! A [`ProcessingStage`] pops routing records from its inbound queue,
//! resolves the slot, runs its [`Transform`], and forwards the record to
//! every out-edge with the success flag updated. Records whose upstream
//! already failed are forwarded as failed without running the transform.
//! Every popped record releases exactly one slot reference, success or not,
//! so the ring's accounting always balances.

mod motion;
mod passthrough;

pub use motion::MotionTransform;
pub use passthrough::PassthroughTransform;

use crate::queue::{Queue, QueueSender, RouteMsg, POLL_TIMEOUT};
use crate::slot::{Slot, SlotTable};
use crate::stage::{Stage, StageCtl};

/// One analysis step over a shared slot. May request derived views and
/// write results into the slot's metadata bag. Returns whether downstream
/// stages should treat the frame as good.
pub trait Transform: Send {
    fn process(&mut self, slot: &Slot) -> bool;
}

pub struct ProcessingStage {
    name: String,
    queue: Queue<RouteMsg>,
    slots: SlotTable,
    outs: Vec<QueueSender<RouteMsg>>,
    transform: Box<dyn Transform>,
}

impl ProcessingStage {
    pub fn new(
        name: impl Into<String>,
        queue: Queue<RouteMsg>,
        slots: SlotTable,
        outs: Vec<QueueSender<RouteMsg>>,
        transform: Box<dyn Transform>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            slots,
            outs,
            transform,
        }
    }
}

impl Stage for ProcessingStage {
    fn name(&self) -> &str {
        &self.name
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

        let ok = msg.ok && self.transform.process(slot);

        for out in &self.outs {
            out.put(RouteMsg { ok, ..msg });
        }
        slot.unref();
    }
}
