/// Topology resolver
///
/// Builds a petgraph DAG from a graph snapshot and computes a deterministic
/// execution order: Kahn's algorithm with ties broken by node insertion order.
/// The engine does not walk the linear order directly; it consumes a [`ReadySet`]
/// so that independent nodes can run at the same time.

use crate::error::GraphError;
use crate::graph::Graph;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Execution plan for one graph
///
/// Nodes are addressed by their insertion index in the source graph.
#[derive(Debug, Clone)]
pub struct Schedule {
    node_ids: Vec<String>,
    index: HashMap<String, usize>,
    /// Topological order of node indices
    order: Vec<usize>,
    /// Distinct predecessors per node, ascending
    predecessors: Vec<Vec<usize>>,
    /// Distinct successors per node, ascending
    successors: Vec<Vec<usize>>,
    /// Indices into `graph.edges` targeting each node, in edge order
    incoming: Vec<Vec<usize>>,
}

impl Schedule {
    /// Resolve the execution order of a graph
    ///
    /// Fails on duplicate node ids, edges with unknown endpoints, and cycles
    /// (self-loops included).
    pub fn build(graph: &Graph) -> Result<Self, GraphError> {
        tracing::debug!(
            "🏗️ Building schedule for '{}' ({} nodes, {} edges)",
            graph.id,
            graph.nodes.len(),
            graph.edges.len()
        );

        let mut dag: DiGraph<usize, usize> = DiGraph::with_capacity(graph.nodes.len(), graph.edges.len());
        let mut index = HashMap::with_capacity(graph.nodes.len());
        let mut node_ids = Vec::with_capacity(graph.nodes.len());

        for (position, node) in graph.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            dag.add_node(position);
            node_ids.push(node.id.clone());
        }

        let mut incoming = vec![Vec::new(); node_ids.len()];
        for (edge_index, edge) in graph.edges.iter().enumerate() {
            let from = *index.get(&edge.source).ok_or_else(|| GraphError::DanglingEdge {
                edge: edge.id.clone(),
                node: edge.source.clone(),
            })?;
            let to = *index.get(&edge.target).ok_or_else(|| GraphError::DanglingEdge {
                edge: edge.id.clone(),
                node: edge.target.clone(),
            })?;
            dag.add_edge(NodeIndex::new(from), NodeIndex::new(to), edge_index);
            incoming[to].push(edge_index);
        }

        let order = kahn_order(&dag);
        if order.len() < node_ids.len() {
            let error = cycle_error(&dag, &node_ids, graph);
            tracing::error!("❌ {}", error);
            return Err(error);
        }

        let mut predecessors = vec![BTreeSet::new(); node_ids.len()];
        let mut successors = vec![BTreeSet::new(); node_ids.len()];
        for edge in dag.edge_references() {
            let (from, to) = (edge.source().index(), edge.target().index());
            predecessors[to].insert(from);
            successors[from].insert(to);
        }

        let schedule = Self {
            node_ids,
            index,
            order,
            predecessors: predecessors.into_iter().map(|set| set.into_iter().collect()).collect(),
            successors: successors.into_iter().map(|set| set.into_iter().collect()).collect(),
            incoming,
        };
        tracing::debug!("📋 Execution order: {:?}", schedule.execution_order());
        Ok(schedule)
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Node ids in a valid execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.node_ids[i].as_str()).collect()
    }

    /// Node indices in a valid execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    pub fn node_id(&self, index: usize) -> &str {
        &self.node_ids[index]
    }

    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Edge indices feeding a node, in edge order
    pub fn incoming_edges(&self, index: usize) -> &[usize] {
        &self.incoming[index]
    }

    /// Nodes with no predecessors, in insertion order
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.predecessors[i].is_empty()).collect()
    }

    /// Every node reachable from `start`, excluding `start`, in insertion order
    pub fn descendants(&self, start: usize) -> Vec<usize> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for &next in &self.successors[current] {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        let mut descendants: Vec<usize> = reachable.into_iter().collect();
        descendants.sort_unstable();
        descendants
    }
}

/// Kahn's algorithm; the ready queue is ordered by insertion index
fn kahn_order(dag: &DiGraph<usize, usize>) -> Vec<usize> {
    let mut in_degree: Vec<usize> = dag
        .node_indices()
        .map(|n| dag.edges_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for edge in dag.edges_directed(NodeIndex::new(next), Direction::Outgoing) {
            let target = edge.target().index();
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.insert(target);
            }
        }
    }

    order
}

/// Describe the strongly connected components that make the graph cyclic
fn cycle_error(dag: &DiGraph<usize, usize>, node_ids: &[String], graph: &Graph) -> GraphError {
    let mut cyclic: HashSet<usize> = HashSet::new();
    let mut component_of: HashMap<usize, usize> = HashMap::new();

    for (component, members) in tarjan_scc(dag).into_iter().enumerate() {
        let self_loop = members.len() == 1 && dag.contains_edge(members[0], members[0]);
        if members.len() > 1 || self_loop {
            for member in members {
                cyclic.insert(member.index());
                component_of.insert(member.index(), component);
            }
        }
    }

    let mut nodes: Vec<usize> = cyclic.iter().copied().collect();
    nodes.sort_unstable();

    let mut edges: Vec<usize> = dag
        .edge_references()
        .filter(|edge| {
            let (from, to) = (edge.source().index(), edge.target().index());
            matches!((component_of.get(&from), component_of.get(&to)), (Some(a), Some(b)) if a == b)
        })
        .map(|edge| *edge.weight())
        .collect();
    edges.sort_unstable();

    GraphError::Cycle {
        nodes: nodes.into_iter().map(|i| node_ids[i].clone()).collect(),
        edges: edges.into_iter().map(|i| graph.edges[i].id.clone()).collect(),
    }
}

/// Per-node dispatch state tracked by the engine during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Waiting,
    Running,
    Completed,
    Failed,
    /// Never started because an upstream node failed
    Skipped,
}

/// The set of nodes whose dependencies are all satisfied
///
/// Tracks, for every node, how many predecessors still have to complete.
#[derive(Debug, Clone)]
pub struct ReadySet {
    order: Vec<usize>,
    successors: Vec<Vec<usize>>,
    descendants: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    slots: Vec<Slot>,
}

impl ReadySet {
    pub fn new(schedule: &Schedule) -> Self {
        Self {
            order: schedule.order().to_vec(),
            successors: schedule.successors.clone(),
            descendants: (0..schedule.len()).map(|i| schedule.descendants(i)).collect(),
            remaining: schedule.predecessors.iter().map(Vec::len).collect(),
            slots: vec![Slot::Waiting; schedule.len()],
        }
    }

    /// Waiting nodes with every predecessor completed, in execution order
    pub fn ready(&self) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&i| self.slots[i] == Slot::Waiting && self.remaining[i] == 0)
            .collect()
    }

    pub fn slot(&self, index: usize) -> Slot {
        self.slots[index]
    }

    pub fn mark_running(&mut self, index: usize) {
        self.slots[index] = Slot::Running;
    }

    pub fn mark_completed(&mut self, index: usize) {
        self.slots[index] = Slot::Completed;
        for &next in &self.successors[index] {
            self.remaining[next] = self.remaining[next].saturating_sub(1);
        }
    }

    /// Mark a node failed and skip its waiting descendants, which are returned
    pub fn mark_failed(&mut self, index: usize) -> Vec<usize> {
        self.slots[index] = Slot::Failed;
        let mut skipped = Vec::new();
        for &descendant in &self.descendants[index] {
            if self.slots[descendant] == Slot::Waiting {
                self.slots[descendant] = Slot::Skipped;
                skipped.push(descendant);
            }
        }
        skipped
    }

    pub fn running(&self) -> usize {
        self.count(Slot::Running)
    }

    pub fn count(&self, slot: Slot) -> usize {
        self.slots.iter().filter(|&&s| s == slot).count()
    }

    /// True once no node is waiting or running
    pub fn is_settled(&self) -> bool {
        self.slots
            .iter()
            .all(|s| !matches!(s, Slot::Waiting | Slot::Running))
    }
}
