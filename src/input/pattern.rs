//! Synthetic test-pattern source.
//!
//! Generates an RGB gradient that slides one pixel per frame, so frame
//! differencing downstream always sees motion. Paces itself to the
//! configured rate and can stop after a fixed frame count.

use super::{FrameSource, ReadStatus};
use crate::frame::{PixelFormat, VideoFrame};
use std::time::{Duration, Instant};

/// 90 kHz timestamps, the usual MPEG timebase.
const TIMEBASE: u64 = 90_000;

pub struct PatternSource {
    width: u32,
    height: u32,
    fps: u32,
    /// Stop after this many frames; `None` runs until terminated.
    limit: Option<u64>,
    produced: u64,
    next_due: Option<Instant>,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, fps: u32, limit: Option<u64>) -> Self {
        Self {
            width: width.max(2),
            height: height.max(2),
            fps: fps.max(1),
            limit,
            produced: 0,
            next_due: None,
        }
    }

    fn render(&self, frame: &mut VideoFrame) {
        frame.reformat(PixelFormat::Rgb24, self.width, self.height);
        let shift = self.produced as u32;
        let w = self.width;
        for y in 0..self.height {
            for x in 0..w {
                let i = ((y * w + x) * 3) as usize;
                frame.data[i] = ((x + shift) * 255 / w) as u8;
                frame.data[i + 1] = (y * 255 / self.height) as u8;
                frame.data[i + 2] = ((x + shift) ^ y) as u8;
            }
        }
        frame.pts = (self.produced * TIMEBASE / self.fps as u64) as i64;
        frame.dts = frame.pts;
    }
}

impl FrameSource for PatternSource {
    fn open(&mut self) -> bool {
        self.produced = 0;
        self.next_due = None;
        true
    }

    fn close(&mut self) {}

    fn read(&mut self, frame: &mut VideoFrame) -> ReadStatus {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return ReadStatus::Eof;
            }
        }

        // Pace to the configured rate, bounded by one frame interval.
        let interval = Duration::from_secs(1) / self.fps;
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);

        self.render(frame);
        self.produced += 1;
        ReadStatus::Frame
    }
}
