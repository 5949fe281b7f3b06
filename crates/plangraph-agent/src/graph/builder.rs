use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use plangraph_core::error::GraphError;

use super::node::Node;

struct Registration {
    node: Arc<dyn Node>,
    successors: Vec<String>,
}

/// Assembles a [`Graph`] from nodes and their declared successors.
///
/// Registration order matters: it is the order in which results of one
/// level are merged. All checks run in [`GraphBuilder::build`].
#[derive(Default)]
pub struct GraphBuilder {
    registrations: Vec<Registration>,
    entries: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its outgoing edges.
    pub fn register(self, node: impl Node + 'static, successors: &[&str]) -> Self {
        self.register_arc(Arc::new(node), successors)
    }

    pub fn register_arc(mut self, node: Arc<dyn Node>, successors: &[&str]) -> Self {
        self.registrations.push(Registration {
            node,
            successors: successors.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Declare an entry node. Without any, nodes with no predecessors are entries.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entries.push(name.into());
        self
    }

    /// Validate the topology and freeze it.
    pub fn build(self) -> Result<Graph, GraphError> {
        if self.registrations.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, reg) in self.registrations.iter().enumerate() {
            let name = reg.node.name().to_string();
            if index.insert(name.clone(), i).is_some() {
                return Err(GraphError::DuplicateName(name));
            }
        }

        let mut successors = vec![Vec::new(); self.registrations.len()];
        let mut predecessors = vec![Vec::new(); self.registrations.len()];
        for (i, reg) in self.registrations.iter().enumerate() {
            for succ in &reg.successors {
                let Some(&j) = index.get(succ) else {
                    return Err(GraphError::UnknownSuccessor {
                        node: reg.node.name().to_string(),
                        successor: succ.clone(),
                    });
                };
                if !successors[i].contains(&j) {
                    successors[i].push(j);
                    predecessors[j].push(i);
                }
            }
        }

        let names: Vec<String> = self
            .registrations
            .iter()
            .map(|r| r.node.name().to_string())
            .collect();

        if let Some(name) = find_cycle(&successors, &predecessors, &names) {
            return Err(GraphError::Cycle(name));
        }

        let entries = if self.entries.is_empty() {
            (0..names.len()).filter(|&i| predecessors[i].is_empty()).collect()
        } else {
            let mut entries = Vec::new();
            for name in &self.entries {
                match index.get(name) {
                    Some(&i) if !entries.contains(&i) => entries.push(i),
                    Some(_) => {}
                    None => return Err(GraphError::UnknownEntry(name.clone())),
                }
            }
            entries
        };

        let reachable = reachable_from(&entries, &successors);
        let nodes = self
            .registrations
            .into_iter()
            .enumerate()
            .map(|(i, reg)| GraphNode {
                node: reg.node,
                successors: std::mem::take(&mut successors[i]),
                predecessors: std::mem::take(&mut predecessors[i]),
                reachable: reachable[i],
            })
            .collect();

        Ok(Graph {
            nodes,
            index,
            entries,
        })
    }
}

/// Kahn's algorithm; returns the first node (declaration order) left on a cycle.
fn find_cycle(successors: &[Vec<usize>], predecessors: &[Vec<usize>], names: &[String]) -> Option<String> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..names.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut removed = vec![false; names.len()];

    while let Some(i) = queue.pop_front() {
        removed[i] = true;
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                queue.push_back(j);
            }
        }
    }

    removed
        .iter()
        .position(|done| !done)
        .map(|i| names[i].clone())
}

fn reachable_from(entries: &[usize], successors: &[Vec<usize>]) -> Vec<bool> {
    let mut seen = vec![false; successors.len()];
    let mut stack: Vec<usize> = entries.to_vec();
    while let Some(i) = stack.pop() {
        if seen[i] {
            continue;
        }
        seen[i] = true;
        stack.extend(successors[i].iter().copied());
    }
    seen
}

pub(crate) struct GraphNode {
    pub(crate) node: Arc<dyn Node>,
    successors: Vec<usize>,
    predecessors: Vec<usize>,
    reachable: bool,
}

/// A validated, acyclic node graph.
pub struct Graph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    entries: Vec<usize>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in registration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node.name()).collect()
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|&i| self.nodes[i].node.name()).collect()
    }

    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.nodes[i]
                    .successors
                    .iter()
                    .map(|&j| self.nodes[j].node.name())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn node(&self, idx: usize) -> &GraphNode {
        &self.nodes[idx]
    }

    /// Nodes ready to run given what has already completed.
    ///
    /// A node is ready when it is reachable from an entry, has not completed,
    /// and every reachable predecessor has completed. The result is in
    /// registration order; an empty result means the run is finished.
    pub fn frontier(&self, completed: &HashSet<String>) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.reachable && !completed.contains(n.node.name()))
            .filter(|(_, n)| {
                n.predecessors.iter().all(|&p| {
                    let pred = &self.nodes[p];
                    !pred.reachable || completed.contains(pred.node.name())
                })
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn frontier_names(&self, completed: &HashSet<String>) -> Vec<&str> {
        self.frontier(completed)
            .into_iter()
            .map(|i| self.nodes[i].node.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeContext;
    use crate::graph::state::{RunState, StateDiff};
    use futures::future::BoxFuture;
    use plangraph_core::error::Result;

    struct Named(&'static str);

    impl Node for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn invoke(&self, _state: Arc<RunState>, _ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>> {
            Box::pin(async { Ok(StateDiff::new()) })
        }
    }

    fn done(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn diamond() -> Graph {
        GraphBuilder::new()
            .register(Named("a"), &["b", "c"])
            .register(Named("b"), &["d"])
            .register(Named("c"), &["d"])
            .register(Named("d"), &[])
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_successor_names_both_ends() {
        let err = GraphBuilder::new()
            .register(Named("a"), &["ghost"])
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::UnknownSuccessor {
                node: "a".into(),
                successor: "ghost".into()
            }
        );
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = GraphBuilder::new()
            .register(Named("a"), &[])
            .register(Named("a"), &[])
            .build()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::DuplicateName("a".into()));
    }

    #[test]
    fn test_empty_and_unknown_entry() {
        assert_eq!(GraphBuilder::new().build().err(), Some(GraphError::Empty));
        let err = GraphBuilder::new()
            .register(Named("a"), &[])
            .entry("nope")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::UnknownEntry("nope".into()));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = GraphBuilder::new()
            .register(Named("start"), &["a"])
            .register(Named("a"), &["b"])
            .register(Named("b"), &["a"])
            .build()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::Cycle("a".into()));
    }

    #[test]
    fn test_default_entries_have_no_predecessors() {
        let graph = diamond();
        assert_eq!(graph.entry_names(), vec!["a"]);
        assert_eq!(graph.successors("a"), vec!["b", "c"]);
    }

    #[test]
    fn test_frontier_fan_out_and_fan_in() {
        let graph = diamond();
        assert_eq!(graph.frontier_names(&done(&[])), vec!["a"]);
        assert_eq!(graph.frontier_names(&done(&["a"])), vec!["b", "c"]);
        // d waits for both of its predecessors
        assert_eq!(graph.frontier_names(&done(&["a", "b"])), vec!["c"]);
        assert_eq!(graph.frontier_names(&done(&["a", "b", "c"])), vec!["d"]);
        assert!(graph.frontier_names(&done(&["a", "b", "c", "d"])).is_empty());
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let graph = GraphBuilder::new()
            .register(Named("orphan"), &["join"])
            .register(Named("start"), &["join"])
            .register(Named("join"), &[])
            .entry("start")
            .build()
            .unwrap();
        assert_eq!(graph.frontier_names(&done(&[])), vec!["start"]);
        // the unreachable predecessor does not block fan-in
        assert_eq!(graph.frontier_names(&done(&["start"])), vec!["join"]);
    }
}
