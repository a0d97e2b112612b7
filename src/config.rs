//! Declarative pipeline description.
//!
//! A single JSON document describes every pipeline the daemon runs. Each
//! pipeline names its input, processing and output nodes; nodes select
//! their concrete implementation by a `type` tag and wire themselves to
//! downstream nodes through `out` name lists. Structural validation beyond
//! what serde expresses lives in [`crate::graph`].
//!
//! ```json
//! {
//!   "pipeline": [{
//!     "name": "front-door",
//!     "input": [{
//!       "name": "cam0", "type": "y4m", "path": "/data/door.y4m",
//!       "live": true, "out": ["motion"]
//!     }],
//!     "processing": [{
//!       "name": "motion", "type": "motion", "threshold": 12.0,
//!       "out": ["archive"]
//!     }],
//!     "output": [{
//!       "name": "archive", "type": "disk", "root": "/var/framesight"
//!     }]
//!   }]
//! }
//! ```

use crate::error::{FramesightError, Result};
use crate::frame::{PixelFormat, ScaleFilter};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level document: the set of pipelines to run.
#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub pipeline: Vec<PipelineConfig>,
}

impl RootConfig {
    /// Load and parse the pipeline description from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FramesightError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let root: RootConfig = serde_json::from_str(&text).map_err(|e| {
            FramesightError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        if root.pipeline.is_empty() {
            return Err(FramesightError::Config(
                "pipeline description defines no pipelines".into(),
            ));
        }
        Ok(root)
    }
}

/// One pipeline: a named DAG of stage nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub input: Vec<InputNode>,
    #[serde(default)]
    pub processing: Vec<ProcessingNode>,
    #[serde(default)]
    pub output: Vec<OutputNode>,
}

/// A producer node: one video stream.
#[derive(Debug, Clone, Deserialize)]
pub struct InputNode {
    pub name: String,
    /// Live sources drop frames instead of pacing the producer; finite
    /// sources wait for a free slot.
    #[serde(default)]
    pub live: bool,
    /// Downstream processing nodes fed by this stream.
    pub out: Vec<String>,
    #[serde(flatten)]
    pub source: SourceConfig,
}

/// Concrete frame source selected by the `type` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic moving-gradient generator.
    Pattern {
        #[serde(default = "default_pattern_width")]
        width: u32,
        #[serde(default = "default_pattern_height")]
        height: u32,
        #[serde(default = "default_fps")]
        fps: u32,
        /// Stop after this many frames; `None` runs until terminated.
        #[serde(default)]
        frames: Option<u64>,
    },
    /// YUV4MPEG2 file reader.
    Y4m {
        path: PathBuf,
        /// Loop the file when it ends instead of reporting end of stream.
        /// Only meaningful together with `live`.
        #[serde(default)]
        repeat: bool,
    },
}

fn default_pattern_width() -> u32 {
    320
}

fn default_pattern_height() -> u32 {
    240
}

fn default_fps() -> u32 {
    25
}

/// An analysis node between inputs and outputs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingNode {
    pub name: String,
    /// Downstream processing or output nodes.
    pub out: Vec<String>,
    #[serde(flatten)]
    pub transform: TransformConfig,
}

/// Concrete transform selected by the `type` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Forwards every record, optionally delayed or unconditionally
    /// dropped. Exists for wiring tests and load shaping.
    Passthrough {
        #[serde(default)]
        delay_ms: u64,
        #[serde(default)]
        drop: bool,
    },
    /// Frame differencing against the previous frame of the same stream.
    Motion {
        /// Mean absolute luma difference (0..255) above which motion is
        /// reported.
        #[serde(default = "default_motion_threshold")]
        threshold: f64,
        /// Analysis raster width; height derived from the source aspect.
        #[serde(default = "default_motion_width")]
        width: u32,
        #[serde(default)]
        filter: ScaleFilter,
        /// When set, frames below the threshold are not forwarded.
        #[serde(default)]
        gate: bool,
    },
}

fn default_motion_threshold() -> f64 {
    8.0
}

fn default_motion_width() -> u32 {
    160
}

/// A sink node at the edge of the graph.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputNode {
    pub name: String,
    /// Retry failed deliveries at this interval; 0 drops them instead.
    #[serde(default)]
    pub resend_interval_ms: u64,
    #[serde(flatten)]
    pub delivery: DeliveryConfig,
}

/// Concrete delivery selected by the `type` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryConfig {
    /// Structured event line per delivered frame.
    Log,
    /// `<root>/<stream>/<timestamp>/frame.jpg` + `meta.json` artifacts.
    Disk {
        root: PathBuf,
        /// Name artifact directories in local time instead of UTC.
        #[serde(default)]
        local_time: bool,
        #[serde(default = "default_jpeg_quality")]
        quality: u8,
        /// Encode at most this wide; 0 keeps the source size.
        #[serde(default)]
        width: u32,
        #[serde(default)]
        format: Option<PixelFormat>,
    },
}

fn default_jpeg_quality() -> u8 {
    80
}

impl InputNode {
    pub fn type_name(&self) -> &'static str {
        match self.source {
            SourceConfig::Pattern { .. } => "pattern",
            SourceConfig::Y4m { .. } => "y4m",
        }
    }
}

impl ProcessingNode {
    pub fn type_name(&self) -> &'static str {
        match self.transform {
            TransformConfig::Passthrough { .. } => "passthrough",
            TransformConfig::Motion { .. } => "motion",
        }
    }
}

impl OutputNode {
    pub fn type_name(&self) -> &'static str {
        match self.delivery {
            DeliveryConfig::Log => "log",
            DeliveryConfig::Disk { .. } => "disk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PipelineConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn full_pipeline_parses() {
        let cfg = parse(
            r#"{
                "name": "demo",
                "input": [
                    {"name": "cam0", "type": "pattern", "width": 64, "height": 48,
                     "fps": 10, "out": ["motion"]}
                ],
                "processing": [
                    {"name": "motion", "type": "motion", "threshold": 12.5,
                     "gate": true, "out": ["sink"]}
                ],
                "output": [
                    {"name": "sink", "type": "disk", "root": "/tmp/fs",
                     "local_time": true, "resend_interval_ms": 500}
                ]
            }"#,
        );
        assert_eq!(cfg.name, "demo");
        assert_eq!(cfg.input[0].type_name(), "pattern");
        assert!(!cfg.input[0].live);
        match &cfg.processing[0].transform {
            TransformConfig::Motion { threshold, gate, width, .. } => {
                assert_eq!(*threshold, 12.5);
                assert!(*gate);
                assert_eq!(*width, 160); // default
            }
            other => panic!("wrong transform: {other:?}"),
        }
        assert_eq!(cfg.output[0].resend_interval_ms, 500);
        match &cfg.output[0].delivery {
            DeliveryConfig::Disk { local_time, quality, .. } => {
                assert!(*local_time);
                assert_eq!(*quality, 80); // default
            }
            DeliveryConfig::Log => panic!("wrong delivery"),
        }
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let result: serde_json::Result<InputNode> = serde_json::from_str(
            r#"{"name": "x", "type": "rtsp", "out": ["p"]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn defaults_fill_in() {
        let cfg = parse(
            r#"{
                "name": "min",
                "input": [{"name": "i", "type": "pattern", "out": ["p"]}],
                "processing": [{"name": "p", "type": "passthrough", "out": ["o"]}],
                "output": [{"name": "o", "type": "log"}]
            }"#,
        );
        match cfg.input[0].source {
            SourceConfig::Pattern { width, height, fps, frames } => {
                assert_eq!((width, height, fps), (320, 240, 25));
                assert!(frames.is_none());
            }
            _ => unreachable!(),
        }
        assert_eq!(cfg.output[0].resend_interval_ms, 0);
    }

    #[test]
    fn missing_sections_default_empty() {
        let cfg = parse(r#"{"name": "empty"}"#);
        assert!(cfg.input.is_empty());
        assert!(cfg.processing.is_empty());
        assert!(cfg.output.is_empty());
    }
}
