//! Pipeline graph validation and sizing.
//!
//! Turns a parsed [`PipelineConfig`] into a [`Graph`]: node names resolved
//! to role-scoped indices, every wiring rule checked, and the per-input
//! buffer sizes computed from topology. Orchestration never touches raw
//! name strings after this point.
//!
//! Wiring rules: node names are unique across all three sections; inputs
//! feed processing nodes only; processing nodes feed processing or output
//! nodes; every processing and output node is fed by at least one edge;
//! `out` lists are non-empty and duplicate-free; the graph is acyclic.

use crate::config::PipelineConfig;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline '{pipeline}' has no {section} nodes")]
    EmptySection {
        pipeline: String,
        section: &'static str,
    },

    #[error("duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("node '{node}' targets unknown node '{target}'")]
    UnknownTarget { node: String, target: String },

    #[error("node '{node}' may not target '{target}': {reason}")]
    BadEdge {
        node: String,
        target: String,
        reason: &'static str,
    },

    #[error("node '{node}' lists target '{target}' more than once")]
    DuplicateTarget { node: String, target: String },

    #[error("node '{node}' has an empty target list")]
    NoTargets { node: String },

    #[error("node '{0}' is not fed by any edge")]
    Unreferenced(String),

    #[error("cycle through nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Resolved edge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Processing(usize),
    Output(usize),
}

/// Sizing and wiring for one input stream.
#[derive(Debug, Clone)]
pub struct InputPlan {
    pub name: String,
    /// Ring buffer depth: 1 + the longest hop path to any output, so a
    /// frame can sit at every stage of the deepest path while the input
    /// keeps producing.
    pub ring_depth: usize,
    /// Total downstream stage invocations per frame; the slot reference
    /// count armed by each `reset()`.
    pub fanout: usize,
    pub out: Vec<NodeRef>,
}

/// Wiring for one processing node.
#[derive(Debug, Clone)]
pub struct ProcessingPlan {
    pub name: String,
    pub out: Vec<NodeRef>,
}

/// Validated pipeline topology.
#[derive(Debug, Clone)]
pub struct Graph {
    pub inputs: Vec<InputPlan>,
    pub processing: Vec<ProcessingPlan>,
    pub outputs: Vec<String>,
}

#[derive(Clone, Copy)]
enum Role {
    Input,
    Processing(usize),
    Output(usize),
}

impl Graph {
    /// Validate the configured topology and compute buffer sizing.
    pub fn build(config: &PipelineConfig) -> Result<Self, GraphError> {
        if config.input.is_empty() {
            return Err(GraphError::EmptySection {
                pipeline: config.name.clone(),
                section: "input",
            });
        }
        if config.output.is_empty() {
            return Err(GraphError::EmptySection {
                pipeline: config.name.clone(),
                section: "output",
            });
        }

        // Global name table across all sections.
        let mut names: HashMap<String, Role> = HashMap::new();
        let roles = config
            .input
            .iter()
            .map(|n| (&n.name, Role::Input))
            .chain(
                config
                    .processing
                    .iter()
                    .enumerate()
                    .map(|(i, n)| (&n.name, Role::Processing(i))),
            )
            .chain(
                config
                    .output
                    .iter()
                    .enumerate()
                    .map(|(i, n)| (&n.name, Role::Output(i))),
            );
        for (name, role) in roles {
            if names.insert(name.clone(), role).is_some() {
                return Err(GraphError::DuplicateName(name.clone()));
            }
        }

        let resolve = |node: &str, target: &str, from_input: bool| -> Result<NodeRef, GraphError> {
            match names.get(target) {
                None => Err(GraphError::UnknownTarget {
                    node: node.to_string(),
                    target: target.to_string(),
                }),
                Some(Role::Input) => Err(GraphError::BadEdge {
                    node: node.to_string(),
                    target: target.to_string(),
                    reason: "inputs cannot be edge targets",
                }),
                Some(Role::Output(_)) if from_input => Err(GraphError::BadEdge {
                    node: node.to_string(),
                    target: target.to_string(),
                    reason: "inputs must feed processing nodes",
                }),
                Some(Role::Processing(i)) => Ok(NodeRef::Processing(*i)),
                Some(Role::Output(i)) => Ok(NodeRef::Output(*i)),
            }
        };

        let resolve_list = |node: &str,
                            targets: &[String],
                            from_input: bool|
         -> Result<Vec<NodeRef>, GraphError> {
            if targets.is_empty() {
                return Err(GraphError::NoTargets {
                    node: node.to_string(),
                });
            }
            let mut out = Vec::with_capacity(targets.len());
            for (i, target) in targets.iter().enumerate() {
                if targets[..i].contains(target) {
                    return Err(GraphError::DuplicateTarget {
                        node: node.to_string(),
                        target: target.clone(),
                    });
                }
                out.push(resolve(node, target, from_input)?);
            }
            Ok(out)
        };

        let input_edges: Vec<Vec<NodeRef>> = config
            .input
            .iter()
            .map(|n| resolve_list(&n.name, &n.out, true))
            .collect::<Result<_, _>>()?;
        let processing_edges: Vec<Vec<NodeRef>> = config
            .processing
            .iter()
            .map(|n| resolve_list(&n.name, &n.out, false))
            .collect::<Result<_, _>>()?;

        Self::check_referenced(config, &input_edges, &processing_edges)?;
        Self::check_acyclic(config, &processing_edges)?;

        // Depth/fan-out recursions are safe now: the graph is acyclic.
        let mut depth_memo = vec![None; config.processing.len()];
        let mut fanout_memo = vec![None; config.processing.len()];
        let inputs = config
            .input
            .iter()
            .zip(&input_edges)
            .map(|(node, out)| InputPlan {
                name: node.name.clone(),
                ring_depth: 1 + Self::longest_path(out, &processing_edges, &mut depth_memo),
                fanout: Self::fanout(out, &processing_edges, &mut fanout_memo),
                out: out.clone(),
            })
            .collect();
        let processing = config
            .processing
            .iter()
            .zip(&processing_edges)
            .map(|(node, out)| ProcessingPlan {
                name: node.name.clone(),
                out: out.clone(),
            })
            .collect();

        Ok(Graph {
            inputs,
            processing,
            outputs: config.output.iter().map(|n| n.name.clone()).collect(),
        })
    }

    fn check_referenced(
        config: &PipelineConfig,
        input_edges: &[Vec<NodeRef>],
        processing_edges: &[Vec<NodeRef>],
    ) -> Result<(), GraphError> {
        let mut fed_processing = vec![false; config.processing.len()];
        let mut fed_output = vec![false; config.output.len()];
        for out in input_edges.iter().chain(processing_edges) {
            for target in out {
                match target {
                    NodeRef::Processing(i) => fed_processing[*i] = true,
                    NodeRef::Output(i) => fed_output[*i] = true,
                }
            }
        }
        for (i, fed) in fed_processing.iter().enumerate() {
            if !fed {
                return Err(GraphError::Unreferenced(config.processing[i].name.clone()));
            }
        }
        for (i, fed) in fed_output.iter().enumerate() {
            if !fed {
                return Err(GraphError::Unreferenced(config.output[i].name.clone()));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over processing-to-processing edges. Nodes left
    /// standing after all zero-indegree removals form a cycle.
    fn check_acyclic(
        config: &PipelineConfig,
        processing_edges: &[Vec<NodeRef>],
    ) -> Result<(), GraphError> {
        let n = config.processing.len();
        let mut indegree = vec![0usize; n];
        for out in processing_edges {
            for target in out {
                if let NodeRef::Processing(i) = target {
                    indegree[*i] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0;
        while let Some(node) = ready.pop() {
            visited += 1;
            for target in &processing_edges[node] {
                if let NodeRef::Processing(i) = target {
                    indegree[*i] -= 1;
                    if indegree[*i] == 0 {
                        ready.push(*i);
                    }
                }
            }
        }

        if visited < n {
            let cycle = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| config.processing[i].name.clone())
                .collect();
            return Err(GraphError::Cycle(cycle));
        }
        Ok(())
    }

    /// Longest hop count from this edge set to any output.
    fn longest_path(
        out: &[NodeRef],
        processing_edges: &[Vec<NodeRef>],
        memo: &mut Vec<Option<usize>>,
    ) -> usize {
        out.iter()
            .map(|target| match target {
                NodeRef::Output(_) => 1,
                NodeRef::Processing(i) => {
                    if let Some(depth) = memo[*i] {
                        return 1 + depth;
                    }
                    let depth =
                        Self::longest_path(&processing_edges[*i], processing_edges, memo);
                    memo[*i] = Some(depth);
                    1 + depth
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Total stage invocations downstream of this edge set: each edge is
    /// one invocation plus whatever its target fans out to.
    fn fanout(
        out: &[NodeRef],
        processing_edges: &[Vec<NodeRef>],
        memo: &mut Vec<Option<usize>>,
    ) -> usize {
        out.iter()
            .map(|target| match target {
                NodeRef::Output(_) => 1,
                NodeRef::Processing(i) => {
                    if let Some(fanout) = memo[*i] {
                        return 1 + fanout;
                    }
                    let fanout = Self::fanout(&processing_edges[*i], processing_edges, memo);
                    memo[*i] = Some(fanout);
                    1 + fanout
                }
            })
            .sum()
    }
}
