//! Pipeline orchestration.
//!
//! A [`Pipeline`] turns a validated configuration into running machinery:
//! slot rings sized from the graph, one inbound queue per consuming node,
//! and one worker thread per stage. The pipeline itself implements
//! [`Stage`], so the daemon runs each pipeline under an ordinary
//! [`Worker`]; its task loop supervises the inputs and finishes the whole
//! pipeline once every input has finished.
//!
//! Startup brings consumers up before producers (outputs, processing,
//! inputs); shutdown tears down in the opposite direction, joining each
//! phase before the next so no stage ever feeds a dead queue's slot
//! accounting.

use crate::config::{DeliveryConfig, PipelineConfig, SourceConfig, TransformConfig};
use crate::error::Result;
use crate::graph::{Graph, NodeRef};
use crate::input::{FrameSource, InputStage, PatternSource, Y4mSource};
use crate::output::{Delivery, DiskDelivery, LogDelivery, OutputStage};
use crate::processing::{MotionTransform, PassthroughTransform, ProcessingStage, Transform};
use crate::queue::{Queue, QueueSender, RouteMsg};
use crate::slot::{Slot, SlotTable};
use crate::stage::{Stage, StageCtl, Worker};
use std::sync::Arc;
use std::time::Duration;

/// How often the pipeline checks whether its inputs are done.
const SUPERVISOR_POLL: Duration = Duration::from_millis(500);

pub struct Pipeline {
    name: String,
    inputs: Vec<Worker>,
    processing: Vec<Worker>,
    outputs: Vec<Worker>,
}

impl Pipeline {
    /// Validate the configuration and assemble all stages. Nothing runs
    /// until the pipeline is started.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let graph = Graph::build(&config)?;

        // Slot rings, one per input stream, sized from the topology.
        let rings: Vec<Vec<Arc<Slot>>> = graph
            .inputs
            .iter()
            .enumerate()
            .map(|(stream, plan)| {
                (0..plan.ring_depth)
                    .map(|_| Arc::new(Slot::new(stream as u16, plan.name.clone(), plan.fanout)))
                    .collect()
            })
            .collect();
        let table = SlotTable::new(rings.clone());

        // Inbound queues for every consuming node; senders resolved per
        // out-edge before the queues move into their stages.
        let processing_queues: Vec<Queue<RouteMsg>> =
            (0..graph.processing.len()).map(|_| Queue::new()).collect();
        let output_queues: Vec<Queue<RouteMsg>> =
            (0..graph.outputs.len()).map(|_| Queue::new()).collect();
        let senders = |out: &[NodeRef]| -> Vec<QueueSender<RouteMsg>> {
            out.iter()
                .map(|target| match target {
                    NodeRef::Processing(i) => processing_queues[*i].sender(),
                    NodeRef::Output(i) => output_queues[*i].sender(),
                })
                .collect()
        };
        let input_senders: Vec<_> = graph.inputs.iter().map(|plan| senders(&plan.out)).collect();
        let processing_senders: Vec<_> = graph
            .processing
            .iter()
            .map(|plan| senders(&plan.out))
            .collect();

        let inputs = config
            .input
            .iter()
            .zip(input_senders)
            .enumerate()
            .map(|(stream, (node, outs))| {
                if let SourceConfig::Y4m { repeat: true, .. } = node.source {
                    if !node.live {
                        tracing::warn!(
                            input = node.name,
                            "repeat without live: the stream loops but frames still pace consumers"
                        );
                    }
                }
                let stage = InputStage::new(
                    node.name.clone(),
                    stream as u16,
                    node.live,
                    build_source(&node.source),
                    rings[stream].clone(),
                    outs,
                );
                Worker::new(Box::new(stage))
            })
            .collect();

        let processing = config
            .processing
            .iter()
            .zip(processing_queues)
            .zip(processing_senders)
            .map(|((node, queue), outs)| {
                let stage = ProcessingStage::new(
                    node.name.clone(),
                    queue,
                    table.clone(),
                    outs,
                    build_transform(&node.transform),
                );
                Worker::new(Box::new(stage))
            })
            .collect();

        let outputs = config
            .output
            .iter()
            .zip(output_queues)
            .map(|(node, queue)| {
                let stage = OutputStage::new(
                    node.name.clone(),
                    queue,
                    table.clone(),
                    Duration::from_millis(node.resend_interval_ms),
                    build_delivery(&node.delivery),
                );
                Worker::new(Box::new(stage))
            })
            .collect();

        tracing::info!(
            pipeline = config.name,
            inputs = config.input.len(),
            processing = config.processing.len(),
            outputs = config.output.len(),
            "pipeline assembled"
        );
        Ok(Self {
            name: config.name,
            inputs,
            processing,
            outputs,
        })
    }
}

impl Stage for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> bool {
        // Consumers first, so the first frame finds its queues live.
        for worker in self
            .outputs
            .iter_mut()
            .chain(&mut self.processing)
            .chain(&mut self.inputs)
        {
            worker.run();
        }
        tracing::info!(pipeline = self.name, "pipeline started");
        true
    }

    fn task(&mut self, ctl: &StageCtl) {
        ctl.sleep(SUPERVISOR_POLL);
        if !ctl.active() {
            return;
        }
        if self.inputs.iter().all(|worker| !worker.running()) {
            tracing::info!(pipeline = self.name, "all inputs finished");
            ctl.deactivate();
        }
    }

    fn stop(&mut self) {
        // Producers down first, each phase fully joined.
        for phase in [&mut self.inputs, &mut self.processing, &mut self.outputs] {
            for worker in phase.iter_mut() {
                worker.terminate();
            }
            for worker in phase.iter_mut() {
                worker.wait();
            }
        }
        tracing::info!(pipeline = self.name, "pipeline stopped");
    }
}

fn build_source(config: &SourceConfig) -> Box<dyn FrameSource> {
    match config {
        SourceConfig::Pattern {
            width,
            height,
            fps,
            frames,
        } => Box::new(PatternSource::new(*width, *height, *fps, *frames)),
        SourceConfig::Y4m { path, repeat } => Box::new(Y4mSource::new(path.clone(), *repeat)),
    }
}

fn build_transform(config: &TransformConfig) -> Box<dyn Transform> {
    match config {
        TransformConfig::Passthrough { delay_ms, drop } => {
            Box::new(PassthroughTransform::new(*delay_ms, *drop))
        }
        TransformConfig::Motion {
            threshold,
            width,
            filter,
            gate,
        } => Box::new(MotionTransform::new(*threshold, *width, *filter, *gate)),
    }
}

fn build_delivery(config: &DeliveryConfig) -> Box<dyn Delivery> {
    match config {
        DeliveryConfig::Log => Box::new(LogDelivery),
        DeliveryConfig::Disk {
            root,
            local_time,
            quality,
            width,
            format,
        } => Box::new(DiskDelivery::new(
            root.clone(),
            *local_time,
            *quality,
            *width,
            *format,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> PipelineConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn invalid_graph_fails_construction() {
        let result = Pipeline::new(config(
            r#"{
                "name": "broken",
                "input": [{"name": "in", "type": "pattern", "out": ["ghost"]}],
                "output": [{"name": "sink", "type": "log"}]
            }"#,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn finite_pipeline_finishes_itself() {
        let pipeline = Pipeline::new(config(
            r#"{
                "name": "short",
                "input": [{"name": "in", "type": "pattern", "width": 16,
                           "height": 16, "fps": 1000, "frames": 5, "out": ["p"]}],
                "processing": [{"name": "p", "type": "passthrough", "out": ["sink"]}],
                "output": [{"name": "sink", "type": "log"}]
            }"#,
        ))
        .unwrap();

        let mut worker = Worker::new(Box::new(pipeline));
        worker.run();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while worker.running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!worker.running(), "pipeline did not finish on its own");
        worker.wait();
    }

    #[test]
    fn endless_pipeline_stops_on_terminate() {
        let pipeline = Pipeline::new(config(
            r#"{
                "name": "endless",
                "input": [{"name": "in", "type": "pattern", "width": 16,
                           "height": 16, "fps": 200, "out": ["p"]}],
                "processing": [{"name": "p", "type": "passthrough", "out": ["sink"]}],
                "output": [{"name": "sink", "type": "log"}]
            }"#,
        ))
        .unwrap();

        let mut worker = Worker::new(Box::new(pipeline));
        worker.run();
        std::thread::sleep(Duration::from_millis(200));
        assert!(worker.running());
        worker.terminate();
        worker.wait();
        assert!(!worker.running());
    }
}
