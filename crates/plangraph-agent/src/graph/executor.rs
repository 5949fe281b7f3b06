use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::event::EventBus;
use plangraph_core::types::{GraphEvent, RunId};
use plangraph_llm::Generator;

use super::builder::Graph;
use super::node::NodeContext;
use super::state::RunState;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::resolver::DEFAULT_FALLBACK_CAP;

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node: String,
    /// Fields the node's diff wrote.
    pub fields: Vec<String>,
    pub elapsed_ms: u64,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// Nodes executed by this call, in merge order. Excludes nodes
    /// restored from a checkpoint.
    pub node_results: Vec<NodeResult>,
    /// The final merged state.
    pub state: RunState,
    pub resumed: bool,
    pub total_elapsed_ms: u64,
}

/// Runs a [`Graph`] to completion, one level of ready nodes at a time.
///
/// Nodes in the same level run concurrently against the same snapshot.
/// Their diffs are merged in registration order, and a checkpoint is
/// written after every merge. A run id that already has a checkpoint
/// resumes after its completed nodes.
pub struct GraphExecutor {
    graph: Graph,
    generator: Generator,
    store: Arc<dyn CheckpointStore>,
    event_bus: Option<Arc<EventBus>>,
    fallback_cap: usize,
}

impl GraphExecutor {
    pub fn new(graph: Graph, generator: Generator, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            generator,
            store,
            event_bus: None,
            fallback_cap: DEFAULT_FALLBACK_CAP,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_fallback_cap(mut self, cap: usize) -> Self {
        self.fallback_cap = cap;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Latest checkpoint of a run, e.g. to inspect state after a failure.
    pub fn checkpoint(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        self.store.load(run_id)
    }

    fn publish(&self, event: GraphEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Execute the graph for `run_id`.
    ///
    /// `initial` is used only when the run has no checkpoint. A node failure
    /// aborts the run with `NodeFailed` after its successful siblings have
    /// been merged and checkpointed.
    pub async fn run(
        &self,
        initial: RunState,
        run_id: &RunId,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();

        let (mut state, mut completed, resumed) = match self.store.load(run_id)? {
            Some(cp) => {
                info!(
                    run_id = %run_id,
                    last_node = %cp.last_node,
                    completed = cp.completed.len(),
                    "Resuming run from checkpoint"
                );
                self.publish(GraphEvent::RunResumed {
                    run_id: run_id.clone(),
                    last_node: cp.last_node.clone(),
                    completed: cp.completed.len(),
                });
                (cp.state, cp.completed, true)
            }
            None => {
                info!(run_id = %run_id, nodes = self.graph.len(), "Starting run");
                self.publish(GraphEvent::RunStarted {
                    run_id: run_id.clone(),
                });
                (initial, Vec::new(), false)
            }
        };
        let mut done: HashSet<String> = completed.iter().cloned().collect();
        let mut node_results = Vec::new();

        loop {
            let level = self.graph.frontier(&done);
            if level.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                warn!(run_id = %run_id, "Run cancelled before scheduling next level");
                return Err(PlanGraphError::Cancelled);
            }

            let snapshot = Arc::new(state.clone());
            let invocations = level.iter().map(|&idx| {
                let node = self.graph.node(idx).node.clone();
                let snapshot = snapshot.clone();
                let ctx = NodeContext {
                    run_id: run_id.clone(),
                    generator: self.generator.clone(),
                    cancel: cancel.clone(),
                    fallback_cap: self.fallback_cap,
                };
                self.publish(GraphEvent::NodeStarted {
                    run_id: run_id.clone(),
                    node: node.name().to_string(),
                });
                debug!(run_id = %run_id, node = node.name(), "Executing graph node");
                async move {
                    let started = Instant::now();
                    let outcome = node.invoke(snapshot, ctx).await;
                    (node, outcome, started.elapsed().as_millis() as u64)
                }
            });
            let outcomes = join_all(invocations).await;

            let mut failure: Option<PlanGraphError> = None;
            let mut writers: HashMap<String, String> = HashMap::new();

            for (node, outcome, elapsed_ms) in outcomes {
                let name = node.name().to_string();
                let diff = match outcome {
                    Ok(diff) => diff,
                    Err(e) => {
                        error!(run_id = %run_id, node = %name, error = %e, "Graph node failed");
                        self.publish(GraphEvent::NodeFailed {
                            run_id: run_id.clone(),
                            node: name.clone(),
                            error: e.to_string(),
                        });
                        if failure.is_none() {
                            failure = Some(match e {
                                PlanGraphError::Cancelled => PlanGraphError::Cancelled,
                                other => PlanGraphError::node_failed(&name, other),
                            });
                        }
                        continue;
                    }
                };

                let fields: Vec<String> = diff.field_names().map(str::to_string).collect();
                for field in &fields {
                    if let Some(previous) = writers.insert(field.clone(), name.clone()) {
                        warn!(
                            run_id = %run_id,
                            field = %field,
                            first = %previous,
                            last = %name,
                            "Sibling nodes wrote the same field; last writer wins"
                        );
                    }
                }

                state.merge(diff);
                completed.push(name.clone());
                done.insert(name.clone());
                self.store
                    .save(&Checkpoint::new(run_id.clone(), &name, completed.clone(), state.clone()))?;

                info!(run_id = %run_id, node = %name, elapsed_ms, "Node complete");
                self.publish(GraphEvent::NodeCompleted {
                    run_id: run_id.clone(),
                    node: name.clone(),
                    elapsed_ms,
                });
                node_results.push(NodeResult {
                    node: name,
                    fields,
                    elapsed_ms,
                });
            }

            if let Some(e) = failure {
                return Err(e);
            }
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            executed = node_results.len(),
            resumed,
            total_elapsed_ms,
            "Run complete"
        );
        self.publish(GraphEvent::RunComplete {
            run_id: run_id.clone(),
            nodes_executed: node_results.len(),
            elapsed_ms: total_elapsed_ms,
        });

        Ok(ExecutionResult {
            run_id: run_id.clone(),
            node_results,
            state,
            resumed,
            total_elapsed_ms,
        })
    }
}
