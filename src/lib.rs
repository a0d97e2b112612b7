//! # Framesight: configurable video-analysis pipelines
//!
//! A headless daemon that runs one or more frame-processing pipelines, each
//! described as a DAG of input, processing and output stages in a JSON
//! document. Every stage is an independent OS thread; frames live in shared
//! reference-counted slots and only small routing records travel between
//! stages.
//!
//! ## Architecture
//!
//! - **Inputs** decode a stream into a ring of [`slot::Slot`]s and announce
//!   each frame to their downstream queues
//! - **Processing** stages analyse shared slots (derived views are computed
//!   once and cached per slot) and annotate them with metadata
//! - **Outputs** snapshot finished frames and deliver them from a dedicated
//!   sender thread, so slow sinks never stall the ring
//! - **Communication**: crossbeam channels with bounded waits, so every
//!   thread observes cancellation promptly
//!
//! ## Example
//!
//! ```no_run
//! use framesight::config::RootConfig;
//! use framesight::pipeline::Pipeline;
//! use framesight::stage::Worker;
//!
//! # fn main() -> framesight::error::Result<()> {
//! let root = RootConfig::load(std::path::Path::new("pipelines.json"))?;
//! let mut workers: Vec<Worker> = Vec::new();
//! for config in root.pipeline {
//!     let pipeline = Pipeline::new(config)?;
//!     let mut worker = Worker::new(Box::new(pipeline));
//!     worker.run();
//!     workers.push(worker);
//! }
//! for worker in &mut workers {
//!     worker.terminate();
//!     worker.wait();
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod frame;
pub mod graph;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod queue;
pub mod slot;
pub mod stage;

// Re-export commonly used types
pub use config::{PipelineConfig, RootConfig};
pub use error::{FramesightError, Result};
pub use frame::{PixelFormat, ScaleFilter, VideoFrame};
pub use pipeline::Pipeline;
pub use queue::{Queue, QueueSender, RouteMsg};
pub use slot::{Slot, SlotSnapshot, SlotTable};
pub use stage::{Stage, StageCtl, Worker};
