//! Passthrough transform for wiring checks and load shaping.

use super::Transform;
use crate::slot::Slot;
use std::time::Duration;

/// Forwards every record unchanged, optionally delayed or dropped.
pub struct PassthroughTransform {
    delay: Duration,
    drop: bool,
}

impl PassthroughTransform {
    pub fn new(delay_ms: u64, drop: bool) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            drop,
        }
    }
}

impl Transform for PassthroughTransform {
    fn process(&mut self, _slot: &Slot) -> bool {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        !self.drop
    }
}
