//! Disk delivery: JPEG + metadata artifacts per frame.
//!
//! Each delivered frame becomes a directory
//! `<root>/<stream>/<timestamp>-<frame_no>/` holding `frame.jpg` and a
//! `meta.json` with the frame identity and the cycle's metadata bag.

use super::{Delivery, JpegEncoder};
use crate::frame::PixelFormat;
use crate::slot::SlotSnapshot;
use chrono::{Local, Utc};
use serde_json::json;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.3f";

pub struct DiskDelivery {
    root: PathBuf,
    /// Name artifact directories in local time instead of UTC.
    local_time: bool,
    encoder: JpegEncoder,
}

impl DiskDelivery {
    pub fn new(
        root: PathBuf,
        local_time: bool,
        quality: u8,
        width: u32,
        format: Option<PixelFormat>,
    ) -> Self {
        Self {
            root,
            local_time,
            encoder: JpegEncoder::new(quality, width, format),
        }
    }

    fn artifact_dir(&self, snapshot: &SlotSnapshot) -> PathBuf {
        let timestamp = if self.local_time {
            Local::now().format(TIMESTAMP_FORMAT).to_string()
        } else {
            Utc::now().format(TIMESTAMP_FORMAT).to_string()
        };
        self.root
            .join(&snapshot.stream_name)
            .join(format!("{timestamp}-{}", snapshot.frame.frame_no))
    }

    fn write(&mut self, snapshot: &SlotSnapshot) -> crate::error::Result<()> {
        let jpeg = self.encoder.encode(snapshot)?;
        let dir = self.artifact_dir(snapshot);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("frame.jpg"), jpeg.as_slice())?;

        let meta = json!({
            "stream": snapshot.stream_name,
            "frame_no": snapshot.frame.frame_no,
            "pts": snapshot.frame.pts,
            "dts": snapshot.frame.dts,
            "width": snapshot.frame.width,
            "height": snapshot.frame.height,
            "fresh": snapshot.fresh,
            "meta": snapshot.meta,
        });
        std::fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&meta)?)?;
        Ok(())
    }
}

impl Delivery for DiskDelivery {
    fn open(&mut self) -> bool {
        match std::fs::create_dir_all(&self.root) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "cannot create output root");
                false
            }
        }
    }

    fn close(&mut self) {}

    fn send(&mut self, snapshot: &SlotSnapshot) -> bool {
        match self.write(snapshot) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    root = %self.root.display(),
                    stream = snapshot.stream_name,
                    error = %e,
                    "artifact write failed"
                );
                false
            }
        }
    }
}
